/// Shared plain types for the wicket client surface.
///
/// Everything here crosses the API boundary: opaque handles, status
/// notification codes and their mask bits, notification payloads, option
/// keys/values, header query levels, and the public error enum.

pub mod error;
pub mod handle;
pub mod option;
pub mod status;

pub use error::Error;
pub use handle::{Handle, HandleKind};
pub use option::{
    HeaderQuery, HeaderValue, OptionKey, OptionValue, SECURITY_FLAG_IGNORE_ALL,
    SECURITY_FLAG_IGNORE_CERT_CN_INVALID, SECURITY_FLAG_IGNORE_CERT_DATE_INVALID,
    SECURITY_FLAG_IGNORE_CERT_WRONG_USAGE, SECURITY_FLAG_IGNORE_UNKNOWN_CA,
};
pub use status::{NOTIFY_ALL, Payload, Status, StatusCallback, reason_phrase};
