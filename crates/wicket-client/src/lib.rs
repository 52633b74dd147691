/// OS-API-compatible asynchronous HTTP client surface over a pluggable
/// transport engine.
///
/// The concurrency core is three long-lived pieces wired with channels:
///
/// ```text
/// [caller threads] --> Client API --> [Multiplexer loop] --> engine
///        |                                  |
///        |            notification records  v
///        +------------------------> [Dispatcher thread] --> status callback
/// ```
///
/// The multiplexer advances every in-flight exchange through the
/// transport engine and finalizes completions; the dispatcher delivers
/// ordered status notifications to the registered callback; per-request
/// state interleaves caller-supplied read/write buffers with engine data
/// and survives handle teardown while notifications are still in flight.

mod client;
mod config;
mod multiplexer;
mod notify;
mod registry;
mod request;
mod session;

pub use client::{Client, ENABLE_SSL_REVOCATION};
pub use config::Config;

pub use wicket_engine::{
    Completion, EngineError, Pull, TransferHandler, TransferId, TransferInfo, TransferOptions,
    TransferResult, TransportEngine, scripted, tcp,
};
pub use wicket_types::{
    Error, Handle, HandleKind, HeaderQuery, HeaderValue, NOTIFY_ALL, OptionKey, OptionValue,
    Payload, SECURITY_FLAG_IGNORE_ALL, SECURITY_FLAG_IGNORE_CERT_CN_INVALID,
    SECURITY_FLAG_IGNORE_CERT_DATE_INVALID, SECURITY_FLAG_IGNORE_CERT_WRONG_USAGE,
    SECURITY_FLAG_IGNORE_UNKNOWN_CA, Status, StatusCallback, reason_phrase,
};
