pub mod backend;
pub mod cli;
pub mod config;
pub mod criteria;
pub mod error;
pub mod http;
pub mod model;
pub mod recurrence;
pub mod report;
pub mod sweep;
pub mod targets;

pub use error::{SweepError, SweepResult};
