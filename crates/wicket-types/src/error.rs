use thiserror::Error;

/// Failure codes surfaced across the API boundary.
///
/// Synchronous contract violations come back as `Err` directly; transport
/// failures arrive as a [`Status::RequestError`](crate::Status::RequestError)
/// notification carrying the translated code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("handle does not refer to a live object")]
    InvalidHandle,
    #[error("operation not valid for this handle kind")]
    IncorrectHandleType,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("operation cancelled")]
    OperationCancelled,
    #[error("operation timed out")]
    Timeout,
    #[error("cannot connect to server")]
    CannotConnect,
    #[error("buffer too small, {required} bytes required")]
    InsufficientBuffer { required: usize },
    #[error("transport engine failure: {0}")]
    Engine(String),
}
