/// HTTP/1.1 wire helpers: URL parsing, request-head serialization,
/// response-head parsing, and chunked transfer decoding.

use crate::engine::TransferOptions;

/// Decomposed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedUrl {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    /// Path plus query, always starting with '/'.
    pub path: String,
}

impl ParsedUrl {
    pub fn parse(url: &str) -> Result<Self, String> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| format!("missing scheme in {url:?}"))?;
        let secure = match scheme {
            "http" => false,
            "https" => true,
            other => return Err(format!("unsupported scheme {other:?}")),
        };
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        // Strip userinfo if present; credentials travel via options.
        let authority = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port: u16 = p.parse().map_err(|_| format!("bad port in {url:?}"))?;
                (h, port)
            }
            None => (authority, if secure { 443 } else { 80 }),
        };
        if host.is_empty() {
            return Err(format!("empty host in {url:?}"));
        }
        Ok(Self {
            secure,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    pub fn absolute(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let default = if self.secure { 443 } else { 80 };
        if self.port == default {
            format!("{}://{}{}", scheme, self.host, self.path)
        } else {
            format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
        }
    }

    /// Resolve a `Location` header against this URL.
    pub fn resolve(&self, location: &str) -> Result<Self, String> {
        if location.contains("://") {
            return Self::parse(location);
        }
        let mut next = self.clone();
        if location.starts_with('/') {
            next.path = location.to_string();
        } else {
            // Relative reference: replace the last path segment.
            let base = match self.path.rfind('/') {
                Some(i) => &self.path[..=i],
                None => "/",
            };
            next.path = format!("{base}{location}");
        }
        Ok(next)
    }
}

/// Case-insensitive check whether a raw header line list names a header.
fn has_header(headers: &[String], name: &str) -> bool {
    headers.iter().any(|line| {
        line.split_once(':')
            .map(|(n, _)| n.trim().eq_ignore_ascii_case(name))
            .unwrap_or(false)
    })
}

/// Serialize the request head. `via_proxy` switches the request target to
/// absolute form.
pub(crate) fn build_request_head(
    opts: &TransferOptions,
    url: &ParsedUrl,
    via_proxy: bool,
) -> Vec<u8> {
    let target = if via_proxy {
        url.absolute()
    } else {
        url.path.clone()
    };
    let mut head = format!("{} {} HTTP/1.1\r\n", opts.method, target);
    if !has_header(&opts.headers, "Host") {
        let default = if url.secure { 443 } else { 80 };
        if url.port == default {
            head.push_str(&format!("Host: {}\r\n", url.host));
        } else {
            head.push_str(&format!("Host: {}:{}\r\n", url.host, url.port));
        }
    }
    for line in &opts.headers {
        head.push_str(line);
        head.push_str("\r\n");
    }
    if opts.upload {
        match opts.content_length {
            Some(n) => {
                if !has_header(&opts.headers, "Content-Length") {
                    head.push_str(&format!("Content-Length: {n}\r\n"));
                }
            }
            None => {
                if !has_header(&opts.headers, "Transfer-Encoding") {
                    head.push_str("Transfer-Encoding: chunked\r\n");
                }
            }
        }
    }
    if !has_header(&opts.headers, "Connection") {
        head.push_str("Connection: close\r\n");
    }
    head.push_str("\r\n");
    head.into_bytes()
}

/// Parsed response head.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResponseHead {
    pub status: u32,
    pub version: (u32, u32),
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub location: Option<String>,
}

/// Find the end of the response head in `buf`. Returns the length of the
/// head including the terminator.
pub(crate) fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
        .or_else(|| buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2))
}

/// Parse the status line and the framing-relevant headers.
pub(crate) fn parse_response_head(head: &[u8]) -> Result<ResponseHead, String> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.lines();
    let status_line = lines.next().ok_or("empty response head")?;
    let mut parts = status_line.split_whitespace();
    let proto = parts.next().ok_or("malformed status line")?;
    let version = match proto {
        "HTTP/1.0" => (1, 0),
        "HTTP/1.1" => (1, 1),
        other => {
            if let Some(v) = other.strip_prefix("HTTP/") {
                let mut it = v.splitn(2, '.');
                let major = it.next().and_then(|s| s.parse().ok()).unwrap_or(1);
                let minor = it.next().and_then(|s| s.parse().ok()).unwrap_or(1);
                (major, minor)
            } else {
                return Err(format!("malformed status line {status_line:?}"));
            }
        }
    };
    let status: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("missing status code in {status_line:?}"))?;

    let mut parsed = ResponseHead {
        status,
        version,
        ..Default::default()
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            parsed.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            if value.to_ascii_lowercase().contains("chunked") {
                parsed.chunked = true;
            }
        } else if name.eq_ignore_ascii_case("location") {
            parsed.location = Some(value.to_string());
        }
    }
    Ok(parsed)
}

/// Incremental decoder for `Transfer-Encoding: chunked` bodies.
#[derive(Debug)]
pub(crate) struct ChunkDecoder {
    phase: ChunkPhase,
    line: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
    Done,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            phase: ChunkPhase::Size,
            line: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == ChunkPhase::Done
    }

    /// Feed raw bytes; decoded payload goes to `sink`. Returns true once
    /// the terminal chunk and trailers are consumed.
    pub fn feed(
        &mut self,
        mut input: &[u8],
        sink: &mut dyn FnMut(&[u8]),
    ) -> Result<bool, String> {
        while !input.is_empty() {
            match self.phase {
                ChunkPhase::Size => {
                    let Some(nl) = input.iter().position(|&b| b == b'\n') else {
                        self.line.extend_from_slice(input);
                        break;
                    };
                    self.line.extend_from_slice(&input[..nl]);
                    input = &input[nl + 1..];
                    let text = String::from_utf8_lossy(&self.line);
                    let size_text = text.trim().split(';').next().unwrap_or("").trim();
                    let size = u64::from_str_radix(size_text, 16)
                        .map_err(|_| format!("bad chunk size {size_text:?}"))?;
                    self.line.clear();
                    self.phase = if size == 0 {
                        ChunkPhase::Trailer
                    } else {
                        ChunkPhase::Data(size)
                    };
                }
                ChunkPhase::Data(remaining) => {
                    let take = remaining.min(input.len() as u64) as usize;
                    sink(&input[..take]);
                    input = &input[take..];
                    let left = remaining - take as u64;
                    self.phase = if left == 0 {
                        ChunkPhase::DataEnd
                    } else {
                        ChunkPhase::Data(left)
                    };
                }
                ChunkPhase::DataEnd => {
                    // Consume the CRLF after the chunk payload.
                    match input[0] {
                        b'\r' => input = &input[1..],
                        b'\n' => {
                            input = &input[1..];
                            self.phase = ChunkPhase::Size;
                        }
                        other => return Err(format!("expected chunk CRLF, got {other:#x}")),
                    }
                }
                ChunkPhase::Trailer => {
                    let Some(nl) = input.iter().position(|&b| b == b'\n') else {
                        self.line.extend_from_slice(input);
                        break;
                    };
                    self.line.extend_from_slice(&input[..nl]);
                    input = &input[nl + 1..];
                    let blank = self.line.iter().all(|&b| b == b'\r');
                    self.line.clear();
                    if blank {
                        self.phase = ChunkPhase::Done;
                    }
                }
                ChunkPhase::Done => break,
            }
        }
        Ok(self.is_done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_url() {
        let u = ParsedUrl::parse("http://example.com/a/b?x=1").unwrap();
        assert!(!u.secure);
        assert_eq!(u.host, "example.com");
        assert_eq!(u.port, 80);
        assert_eq!(u.path, "/a/b?x=1");
    }

    #[test]
    fn parse_url_with_port_and_no_path() {
        let u = ParsedUrl::parse("https://example.com:8443").unwrap();
        assert!(u.secure);
        assert_eq!(u.port, 8443);
        assert_eq!(u.path, "/");
    }

    #[test]
    fn resolve_locations() {
        let base = ParsedUrl::parse("http://a.example/x/y").unwrap();
        assert_eq!(
            base.resolve("http://b.example/z").unwrap().host,
            "b.example"
        );
        assert_eq!(base.resolve("/root").unwrap().path, "/root");
        assert_eq!(base.resolve("sibling").unwrap().path, "/x/sibling");
    }

    #[test]
    fn head_end_detection() {
        assert_eq!(find_head_end(b"HTTP/1.1 200 OK\r\n\r\nrest"), Some(19));
        assert_eq!(find_head_end(b"HTTP/1.1 200 OK\n\nrest"), Some(17));
        assert_eq!(find_head_end(b"HTTP/1.1 200 OK\r\n"), None);
    }

    #[test]
    fn parse_head_fields() {
        let head = b"HTTP/1.1 301 Moved Permanently\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n";
        let parsed = parse_response_head(head).unwrap();
        assert_eq!(parsed.status, 301);
        assert_eq!(parsed.version, (1, 1));
        assert_eq!(parsed.location.as_deref(), Some("/next"));
        assert_eq!(parsed.content_length, Some(0));
        assert!(!parsed.chunked);
    }

    #[test]
    fn chunked_decode_across_splits() {
        let wire = b"4\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n";
        for split in 1..wire.len() {
            let mut dec = ChunkDecoder::new();
            let mut out = Vec::new();
            let done1 = dec
                .feed(&wire[..split], &mut |d| out.extend_from_slice(d))
                .unwrap();
            let done2 = dec
                .feed(&wire[split..], &mut |d| out.extend_from_slice(d))
                .unwrap();
            assert!(!done1 || split == wire.len());
            assert!(done2, "split at {split}");
            assert_eq!(out, b"wikipedia");
        }
    }

    #[test]
    fn request_head_chunked_upload() {
        let opts = TransferOptions {
            method: "PUT".into(),
            upload: true,
            content_length: None,
            headers: vec!["X-Custom: 1".into()],
            ..Default::default()
        };
        let url = ParsedUrl::parse("http://h.example/up").unwrap();
        let head = String::from_utf8(build_request_head(&opts, &url, false)).unwrap();
        assert!(head.starts_with("PUT /up HTTP/1.1\r\n"));
        assert!(head.contains("Host: h.example\r\n"));
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(head.contains("X-Custom: 1\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }
}
