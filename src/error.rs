use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum JobFlowError {
    BrokerError(String),
    DispatchError(String),
    BatchError(String),
    RecoveryError(String),
    ValidationError(String),
    ConfigurationError(String),
}

impl fmt::Display for JobFlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFlowError::BrokerError(msg) => write!(f, "Broker error: {msg}"),
            JobFlowError::DispatchError(msg) => write!(f, "Dispatch error: {msg}"),
            JobFlowError::BatchError(msg) => write!(f, "Batch error: {msg}"),
            JobFlowError::RecoveryError(msg) => write!(f, "Recovery error: {msg}"),
            JobFlowError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            JobFlowError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for JobFlowError {}

pub type Result<T> = std::result::Result<T, JobFlowError>;
