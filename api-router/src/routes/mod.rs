pub mod chat;
pub mod conversations;
pub mod liveness;
pub mod materials;
pub mod questions;
pub mod readiness;
