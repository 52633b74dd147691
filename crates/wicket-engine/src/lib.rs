/// Transport engine boundary: the multiplexed-transfer interface the
/// client core drives, plus two implementations.
///
/// - [`tcp::TcpEngine`] — HTTP/1.1 over non-blocking TCP, the production
///   engine.
/// - [`scripted::ScriptedEngine`] — transfers driven by a canned script,
///   used to exercise the client core deterministically.
///
/// The engine owns the wire; the client core owns request state and
/// notification ordering. The seam between them is [`TransportEngine`]
/// (what the core calls) and [`TransferHandler`] (what the engine calls
/// back into, always on the thread that is advancing the transfer).

mod engine;
mod http1;
pub mod scripted;
pub mod tcp;

pub use engine::{
    Completion, EngineError, Pull, TransferHandler, TransferId, TransferInfo, TransferOptions,
    TransferResult, TransportEngine,
};
