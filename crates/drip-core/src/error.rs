use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("rule configuration error")]
    Config,
    #[error("rule is disabled")]
    DisabledRule,
    #[error("unknown registry key")]
    UnknownKind,
    #[error("subject store error")]
    Store,
    #[error("message render error")]
    Render,
    #[error("message delivery error")]
    Delivery,
    #[error("send ledger error")]
    Ledger,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl CoreReason {
    /// Store failures are transient: the scheduler may retry the whole walk.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store)
    }
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Config => 1001,
            Self::DisabledRule => 1002,
            Self::UnknownKind => 1003,
            Self::Store => 1004,
            Self::Render => 1005,
            Self::Delivery => 1006,
            Self::Ledger => 1007,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
