pub mod error;
pub mod storage;
pub mod utils;

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
