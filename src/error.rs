use thiserror::Error;

#[derive(Debug, Error)]
pub enum HalocaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Communication error: {0}")]
    Comm(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HalocaError>;
