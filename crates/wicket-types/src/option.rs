/// Option plumbing and header query levels for the emulated surface.

/// Ignore an unknown certificate authority.
pub const SECURITY_FLAG_IGNORE_UNKNOWN_CA: u32 = 0x01;
/// Ignore certificate date validity.
pub const SECURITY_FLAG_IGNORE_CERT_DATE_INVALID: u32 = 0x02;
/// Ignore a certificate common-name mismatch.
pub const SECURITY_FLAG_IGNORE_CERT_CN_INVALID: u32 = 0x04;
/// Ignore certificate usage restrictions.
pub const SECURITY_FLAG_IGNORE_CERT_WRONG_USAGE: u32 = 0x10;
/// All four ignore flags together — disables peer and host verification.
pub const SECURITY_FLAG_IGNORE_ALL: u32 = SECURITY_FLAG_IGNORE_UNKNOWN_CA
    | SECURITY_FLAG_IGNORE_CERT_DATE_INVALID
    | SECURITY_FLAG_IGNORE_CERT_CN_INVALID
    | SECURITY_FLAG_IGNORE_CERT_WRONG_USAGE;

/// Writable / readable option slots on a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Caller context delivered with every notification.
    ContextValue(u64),
    /// Connection cap hint forwarded to the transport.
    MaxConnections(u32),
    /// TLS protocol selection bits, stored and forwarded verbatim.
    SecureProtocols(u32),
    /// Certificate-verification relaxation flags (requests only).
    SecurityFlags(u32),
    /// Feature toggle; only revocation checking is recognized.
    EnableFeature(u32),
    /// Connect timeout in milliseconds (query only).
    ConnectTimeoutMs(u32),
    /// Effective URL after redirects (query only, requests).
    Url(String),
    /// Negotiated HTTP version (query only, requests).
    HttpVersion { major: u32, minor: u32 },
}

/// Keys accepted by the option query call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKey {
    ContextValue,
    MaxConnections,
    SecureProtocols,
    ConnectTimeout,
    Url,
    HttpVersion,
}

/// Header query levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderQuery {
    /// Raw response head, CRLF line endings preserved.
    RawHeadersCrlf,
    /// Raw response head as NUL-separated lines with a double-NUL end.
    RawHeaders,
    /// Numeric status code of the final response.
    StatusCode,
    /// Reason phrase of the final response status line.
    StatusText,
    /// HTTP version from the status line, e.g. "1.1".
    Version,
}

/// Result of a header query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    Number(u32),
}

impl HeaderValue {
    /// Flat text form, used by the buffer-filling query variant.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}
