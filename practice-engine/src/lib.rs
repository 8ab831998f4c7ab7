#![allow(clippy::missing_docs_in_private_items)]

mod due_queue;
mod grader;
mod question_generator;
mod sm2;
mod xp;

pub use due_queue::due_queue;
pub use grader::{Grader, GradingResult};
pub use question_generator::{GenerationRequestParams, QuestionGenerator};
pub use sm2::{derive_quality, transition, Sm2Transition};
pub use xp::{compute_xp, xp_for_level};
