use derive_more::From;
use drip_core::CoreReason;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum RuntimeReason {
    #[error("bootstrap error")]
    Bootstrap,
    #[error("shutdown error")]
    Shutdown,
    #[error("query timed out")]
    Timeout,
    #[error("task panicked")]
    Panic,
    #[error("{0}")]
    Core(CoreReason),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl RuntimeReason {
    /// Failures the scheduler may retry on its next tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Core(c) => c.is_retryable(),
            _ => false,
        }
    }
}

impl ErrorCode for RuntimeReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Bootstrap => 2001,
            Self::Shutdown => 2002,
            Self::Timeout => 2003,
            Self::Panic => 2004,
            Self::Core(c) => c.error_code(),
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type RuntimeError = StructError<RuntimeReason>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
