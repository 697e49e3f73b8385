pub mod attributes;
pub mod config;
pub mod error;
pub mod host;
pub mod ids;
pub mod model;
pub mod time;

pub use error::{ApmError, Result};
