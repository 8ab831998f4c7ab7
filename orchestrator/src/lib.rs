#![allow(clippy::missing_docs_in_private_items)]

mod command;
mod concurrency;
mod config;
mod process;

pub use command::{
    build_argv, check_model_allowed, sanitize_prompt, Effort, GenerationRequest, Verbosity,
};
pub use concurrency::{ConcurrencyLease, ConcurrencyPool};
pub use config::OrchestratorConfig;
pub use process::{strip_markdown_fence, GenerationState, GenerationStream, Orchestrator};
