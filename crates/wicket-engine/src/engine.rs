use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Identifier of one transfer inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub(crate) u64);

impl TransferId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer#{}", self.0)
    }
}

/// Engine-side failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unknown {0}")]
    UnknownTransfer(TransferId),
    #[error("invalid url: {0}")]
    BadUrl(String),
    #[error("transfer not configured")]
    NotConfigured,
}

/// Per-transfer configuration, assembled by the client core and handed to
/// the engine before the transfer starts.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub url: String,
    pub method: String,
    /// Raw `Name: value` header lines, in order.
    pub headers: Vec<String>,
    pub connect_timeout: Option<Duration>,
    pub total_timeout: Option<Duration>,
    /// I/O staging buffer size; also the cap passed to upload pulls.
    pub io_buffer: usize,
    /// The transfer has a request body pulled through the handler.
    pub upload: bool,
    /// Declared body length; `None` with `upload` means chunked.
    pub content_length: Option<u64>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub verify_peer: bool,
    pub verify_host: bool,
    /// TLS protocol selection bits, forwarded verbatim.
    pub secure_protocols: u32,
    /// Connection cap hint.
    pub max_connections: u32,
    /// Proxy URL; requests go through it in absolute form.
    pub proxy: Option<String>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".into(),
            headers: Vec::new(),
            connect_timeout: None,
            total_timeout: None,
            io_buffer: 16 * 1024,
            upload: false,
            content_length: None,
            follow_redirects: true,
            max_redirects: 30,
            verify_peer: true,
            verify_host: true,
            secure_protocols: 0,
            max_connections: 0,
            proxy: None,
        }
    }
}

/// Outcome of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    Ok,
    Timeout,
    ConnectFailed,
    Failed(String),
}

/// Completion event drained by the multiplexer loop.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Correlation token set by the client core (the request id).
    pub token: u64,
    pub result: TransferResult,
}

/// Facts queryable from a transfer after its head arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub status_code: u32,
    pub effective_url: String,
    pub http_version: (u32, u32),
}

/// Answer to an upload pull.
#[derive(Debug, Clone)]
pub enum Pull {
    /// Bytes to send. Empty data signals end of the body, like `Eof`.
    Data(Bytes),
    /// Nothing to send yet; suspend the transfer until resumed.
    Pause,
    /// End of the request body.
    Eof,
    /// Abort the transfer.
    Abort,
}

/// Per-transfer callbacks, invoked by the engine on whichever thread is
/// advancing the transfer (the multiplexer loop, or the calling thread
/// for a blocking perform).
///
/// Implementations must not call back into the engine; the engine may be
/// holding its own lock across an invocation.
pub trait TransferHandler: Send + Sync {
    /// Raw response-head bytes, delivered as they arrive. Each response
    /// head of a redirect chain is delivered.
    fn on_header_data(&self, data: &[u8]);
    /// Decoded response-body bytes.
    fn on_body_data(&self, data: &[u8]);
    /// The engine wants up to `max` request-body bytes.
    fn pull_upload(&self, max: usize) -> Pull;
    /// Transport diagnostics, free-form.
    fn on_debug(&self, _text: &str) {}
}

/// A multiplexing transport engine.
///
/// Mirrors the shape the client core needs: create and configure a
/// transfer, register callbacks and a correlation token, add it to the
/// multiplexed set, advance the set in bounded steps, drain completion
/// events, and resume transfers suspended by an upload pull. `perform`
/// drives a single transfer to completion on the calling thread for the
/// blocking call path.
pub trait TransportEngine: Send + Sync {
    fn create(&self) -> TransferId;
    fn configure(&self, id: TransferId, opts: TransferOptions) -> Result<(), EngineError>;
    fn set_handler(
        &self,
        id: TransferId,
        handler: Weak<dyn TransferHandler>,
    ) -> Result<(), EngineError>;
    fn set_token(&self, id: TransferId, token: u64) -> Result<(), EngineError>;
    /// Add to the multiplexed set. Clears any stale registration of the
    /// same transfer first; thread-safe.
    fn add(&self, id: TransferId) -> Result<(), EngineError>;
    /// Detach from the multiplexed set; optionally forget the correlation
    /// token.
    fn remove(&self, id: TransferId, clear_token: bool) -> Result<(), EngineError>;
    /// Advance the multiplexed set for at most `budget`. Returns the
    /// number of transfers still running.
    fn step(&self, budget: Duration) -> usize;
    /// Drain completion events accumulated since the last call.
    fn completions(&self) -> Vec<Completion>;
    /// Resume a transfer suspended by [`Pull::Pause`].
    fn resume(&self, id: TransferId);
    fn info(&self, id: TransferId) -> Option<TransferInfo>;
    /// Drive one transfer to completion on the calling thread. A paused
    /// upload is re-polled with a bounded sleep.
    fn perform(&self, id: TransferId) -> TransferResult;
    fn destroy(&self, id: TransferId);
}
