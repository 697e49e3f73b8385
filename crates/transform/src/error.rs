use apmx_core::ApmError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transaction {guid} has no segments")]
    EmptyTransaction { guid: String },

    #[error("{maker} failed: {reason}")]
    Maker { maker: &'static str, reason: String },

    #[error(transparent)]
    Core(#[from] ApmError),
}

pub type Result<T> = std::result::Result<T, TransformError>;
