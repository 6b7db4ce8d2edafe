use rhai::{Dynamic, EvalAltResult, Position};
use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by sandbox-facing queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("entity {0} no longer exists")]
    EntityGone(Uuid),
    #[error("{what} is not available yet; access it from {retry_in} instead")]
    NotYetAvailable { what: &'static str, retry_in: &'static str },
    #[error("capability '{0}' denied by trust settings")]
    CapabilityDenied(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::InvalidArgument(message.into())
    }

    /// Short machine-readable tag, used in fault records and harness output.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::EntityGone(_) => "EntityGone",
            ApiError::NotYetAvailable { .. } => "NotYetAvailable",
            ApiError::CapabilityDenied(_) => "CapabilityDenied",
            ApiError::InvalidArgument(_) => "InvalidArgument",
        }
    }
}

impl From<ApiError> for Box<EvalAltResult> {
    fn from(err: ApiError) -> Self {
        let message = format!("{}: {err}", err.kind());
        Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(message), Position::NONE))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
