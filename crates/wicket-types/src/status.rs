use std::sync::Arc;

use bytes::Bytes;

use crate::error::Error;
use crate::handle::Handle;

/// Status codes delivered to the registered status callback.
///
/// Each code maps to a notification-mask bit; a callback registered with a
/// mask only sees the statuses whose bits are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// A request is being dispatched to the transport.
    SendingRequest,
    /// The request head left the process.
    RequestSent,
    /// The send call finished; the exchange is in flight.
    SendRequestComplete,
    /// The response head is being received.
    ReceivingResponse,
    /// The response head arrived; payload is the raw header length.
    ResponseReceived,
    /// The transport followed a redirect. One notification per redirect.
    Redirect,
    /// The full response head is parsed and queryable.
    HeadersAvailable,
    /// Response body bytes are available; payload is the byte count.
    DataAvailable,
    /// A queued read finished; payload is the data read (possibly empty,
    /// which signals end of stream).
    ReadComplete,
    /// A queued write was fully consumed; payload is the byte count.
    WriteComplete,
    /// The exchange failed; payload is the translated error.
    RequestError,
    /// Terminal notification: the handle is going away.
    HandleClosing,
}

impl Status {
    /// Notification-mask bit for this status.
    pub fn mask_bit(self) -> u32 {
        match self {
            Self::ReadComplete => 0x1,
            Self::HeadersAvailable => 0x2,
            Self::WriteComplete => 0x4,
            Self::SendRequestComplete => 0x8,
            Self::RequestError => 0x10,
            Self::HandleClosing => 0x20,
            Self::SendingRequest => 0x80,
            Self::DataAvailable => 0x100,
            Self::ReceivingResponse => 0x1_0000,
            Self::ResponseReceived => 0x2_0000,
            Self::RequestSent => 0x4_0000,
            Self::Redirect => 0x8_0000,
        }
    }
}

/// Mask selecting every notification.
pub const NOTIFY_ALL: u32 = u32::MAX;

/// Payload attached to a status notification.
///
/// Payloads are owned; data payloads are cheap `Bytes` handles. The
/// contract is call-scoped validity — a callback that needs the bytes past
/// the call clones them.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    /// A byte count (data available, write complete, header length).
    Size(usize),
    /// Read data. Empty bytes mean end of stream.
    Data(Bytes),
    /// Translated failure for [`Status::RequestError`].
    Error(Error),
}

impl Payload {
    /// Length reported alongside the notification, mirroring the emulated
    /// API's information-length argument.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Size(n) => *n,
            Self::Data(b) => b.len(),
            Self::Error(_) => std::mem::size_of::<u32>(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Status callback registered per session or request.
///
/// Invoked on the dispatcher thread as `(handle, context, status,
/// payload)`; never reentrant — the next invocation waits for the previous
/// one to return.
pub type StatusCallback = Arc<dyn Fn(Handle, u64, Status, &Payload) + Send + Sync>;

/// Canned reason phrase for an HTTP status code, used when the status line
/// carried none.
pub fn reason_phrase(code: u32) -> Option<&'static str> {
    let text = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None,
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_bits_are_distinct() {
        let all = [
            Status::SendingRequest,
            Status::RequestSent,
            Status::SendRequestComplete,
            Status::ReceivingResponse,
            Status::ResponseReceived,
            Status::Redirect,
            Status::HeadersAvailable,
            Status::DataAvailable,
            Status::ReadComplete,
            Status::WriteComplete,
            Status::RequestError,
            Status::HandleClosing,
        ];
        let mut seen = 0u32;
        for s in all {
            let bit = s.mask_bit();
            assert_eq!(bit.count_ones(), 1);
            assert_eq!(seen & bit, 0, "duplicate mask bit for {s:?}");
            seen |= bit;
        }
    }

    #[test]
    fn payload_lengths() {
        assert_eq!(Payload::None.len(), 0);
        assert_eq!(Payload::Size(7).len(), 7);
        assert_eq!(Payload::Data(Bytes::from_static(b"abc")).len(), 3);
    }

    #[test]
    fn reason_phrases() {
        assert_eq!(reason_phrase(200), Some("OK"));
        assert_eq!(reason_phrase(404), Some("Not Found"));
        assert_eq!(reason_phrase(999), None);
    }
}
