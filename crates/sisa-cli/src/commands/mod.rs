pub mod common;
pub mod completions;
pub mod config;
pub mod errors;
pub mod mirror;
pub mod queue;
pub mod record;
pub mod status;
pub mod sync;
