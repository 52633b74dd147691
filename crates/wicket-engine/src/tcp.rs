/// Production transport engine: HTTP/1.1 over non-blocking TCP.
///
/// Every transfer is a small state machine (connect → send head → send
/// body → receive head → receive body) advanced by `step()` under one
/// coarse engine lock, mirroring the process-wide engine policy of the
/// client core. Handler callbacks run on whichever thread is stepping.
///
/// The bundled engine speaks plaintext HTTP/1.1. TLS verification options
/// are accepted and logged so a TLS-capable engine can honor them behind
/// the same trait; an `https` target fails the transfer with a reported
/// error instead of a silent downgrade.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, Weak};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace, warn};

use crate::engine::{
    Completion, EngineError, Pull, TransferHandler, TransferId, TransferInfo, TransferOptions,
    TransferResult, TransportEngine,
};
use crate::http1::{
    ChunkDecoder, ParsedUrl, build_request_head, find_head_end, parse_response_head,
};

/// Sleep applied when a step pass makes no progress.
const IDLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Phase {
    Created,
    Connecting,
    SendHead,
    SendBody,
    RecvHead,
    RecvBody,
    Finished,
}

enum Framing {
    Length(u64),
    Chunked(ChunkDecoder),
    ToClose,
}

struct Transfer {
    opts: TransferOptions,
    handler: Option<Weak<dyn TransferHandler>>,
    token: Option<u64>,
    url: Option<ParsedUrl>,
    proxy: Option<ParsedUrl>,
    phase: Phase,
    sock: Option<TcpStream>,
    out: Vec<u8>,
    out_pos: usize,
    head_acc: Vec<u8>,
    framing: Option<Framing>,
    paused: bool,
    upload_eof: bool,
    sent_body: u64,
    redirects: u32,
    status: u32,
    version: (u32, u32),
    in_multi: bool,
    done: Option<TransferResult>,
    completion_posted: bool,
    connect_deadline: Option<Instant>,
    total_deadline: Option<Instant>,
}

impl Transfer {
    fn new() -> Self {
        Self {
            opts: TransferOptions::default(),
            handler: None,
            token: None,
            url: None,
            proxy: None,
            phase: Phase::Created,
            sock: None,
            out: Vec::new(),
            out_pos: 0,
            head_acc: Vec::new(),
            framing: None,
            paused: false,
            upload_eof: false,
            sent_body: 0,
            redirects: 0,
            status: 0,
            version: (1, 1),
            in_multi: false,
            done: None,
            completion_posted: false,
            connect_deadline: None,
            total_deadline: None,
        }
    }

    /// Reset transient state so the transfer can (re)start from scratch.
    fn rewind(&mut self) {
        self.phase = Phase::Created;
        self.sock = None;
        self.out.clear();
        self.out_pos = 0;
        self.head_acc.clear();
        self.framing = None;
        self.paused = false;
        self.upload_eof = false;
        self.sent_body = 0;
        self.redirects = 0;
        self.status = 0;
        self.done = None;
        self.completion_posted = false;
        self.connect_deadline = None;
        self.total_deadline = None;
    }

    fn handler(&self) -> Option<std::sync::Arc<dyn TransferHandler>> {
        self.handler.as_ref().and_then(|w| w.upgrade())
    }

    fn finish(&mut self, result: TransferResult) {
        debug!(status = self.status, ?result, "transfer finished");
        self.phase = Phase::Finished;
        self.sock = None;
        self.done = Some(result);
    }
}

struct EngineInner {
    transfers: HashMap<u64, Transfer>,
    active: Vec<u64>,
    completions: VecDeque<Completion>,
    next_id: u64,
}

/// HTTP/1.1 engine over non-blocking TCP sockets.
pub struct TcpEngine {
    inner: Mutex<EngineInner>,
}

impl TcpEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EngineInner {
                transfers: HashMap::new(),
                active: Vec::new(),
                completions: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    /// One pass over the active set. Returns (made progress, still running).
    fn advance_all(&self) -> (bool, usize) {
        let mut inner = self.inner.lock().unwrap();
        let ids = inner.active.clone();
        let mut progress = false;
        for id in ids {
            let posted = {
                let Some(t) = inner.transfers.get_mut(&id) else {
                    continue;
                };
                if t.done.is_some() {
                    None
                } else {
                    progress |= advance(t);
                    match (&t.done, t.in_multi, t.completion_posted) {
                        (Some(result), true, false) => {
                            t.completion_posted = true;
                            Some(Completion {
                                token: t.token.unwrap_or(0),
                                result: result.clone(),
                            })
                        }
                        _ => None,
                    }
                }
            };
            if let Some(c) = posted {
                inner.completions.push_back(c);
            }
        }
        let running = inner
            .active
            .iter()
            .filter(|id| {
                inner
                    .transfers
                    .get(*id)
                    .map(|t| t.done.is_none())
                    .unwrap_or(false)
            })
            .count();
        (progress, running)
    }
}

impl Default for TcpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportEngine for TcpEngine {
    fn create(&self) -> TransferId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.transfers.insert(id, Transfer::new());
        TransferId(id)
    }

    fn configure(&self, id: TransferId, opts: TransferOptions) -> Result<(), EngineError> {
        let url = ParsedUrl::parse(&opts.url).map_err(EngineError::BadUrl)?;
        let proxy = match &opts.proxy {
            Some(p) => Some(ParsedUrl::parse(p).map_err(EngineError::BadUrl)?),
            None => None,
        };
        let mut inner = self.inner.lock().unwrap();
        let t = inner
            .transfers
            .get_mut(&id.0)
            .ok_or(EngineError::UnknownTransfer(id))?;
        if !opts.verify_peer || !opts.verify_host {
            debug!(%id, verify_peer = opts.verify_peer, verify_host = opts.verify_host,
                   "certificate verification relaxed");
        }
        t.url = Some(url);
        t.proxy = proxy;
        t.opts = opts;
        Ok(())
    }

    fn set_handler(
        &self,
        id: TransferId,
        handler: Weak<dyn TransferHandler>,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let t = inner
            .transfers
            .get_mut(&id.0)
            .ok_or(EngineError::UnknownTransfer(id))?;
        t.handler = Some(handler);
        Ok(())
    }

    fn set_token(&self, id: TransferId, token: u64) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let t = inner
            .transfers
            .get_mut(&id.0)
            .ok_or(EngineError::UnknownTransfer(id))?;
        t.token = Some(token);
        Ok(())
    }

    fn add(&self, id: TransferId) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.transfers.contains_key(&id.0) {
            return Err(EngineError::UnknownTransfer(id));
        }
        // Clear any stale registration before re-adding.
        inner.active.retain(|&a| a != id.0);
        let t = inner.transfers.get_mut(&id.0).unwrap();
        if t.url.is_none() {
            return Err(EngineError::NotConfigured);
        }
        t.rewind();
        t.in_multi = true;
        inner.active.push(id.0);
        Ok(())
    }

    fn remove(&self, id: TransferId, clear_token: bool) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.active.retain(|&a| a != id.0);
        let t = inner
            .transfers
            .get_mut(&id.0)
            .ok_or(EngineError::UnknownTransfer(id))?;
        t.in_multi = false;
        if clear_token {
            t.token = None;
        }
        Ok(())
    }

    fn step(&self, budget: Duration) -> usize {
        let deadline = Instant::now() + budget;
        loop {
            let (progress, running) = self.advance_all();
            if running == 0 {
                return 0;
            }
            let now = Instant::now();
            if now >= deadline {
                return running;
            }
            if !progress {
                std::thread::sleep(IDLE_POLL.min(deadline - now));
            }
        }
    }

    fn completions(&self) -> Vec<Completion> {
        let mut inner = self.inner.lock().unwrap();
        inner.completions.drain(..).collect()
    }

    fn resume(&self, id: TransferId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.transfers.get_mut(&id.0) {
            if t.paused {
                trace!(%id, "transfer resumed");
            }
            t.paused = false;
        }
    }

    fn info(&self, id: TransferId) -> Option<TransferInfo> {
        let inner = self.inner.lock().unwrap();
        let t = inner.transfers.get(&id.0)?;
        if t.status == 0 {
            return None;
        }
        Some(TransferInfo {
            status_code: t.status,
            effective_url: t.url.as_ref().map(|u| u.absolute()).unwrap_or_default(),
            http_version: t.version,
        })
    }

    fn perform(&self, id: TransferId) -> TransferResult {
        loop {
            let done = {
                let mut inner = self.inner.lock().unwrap();
                let Some(t) = inner.transfers.get_mut(&id.0) else {
                    return TransferResult::Failed("unknown transfer".into());
                };
                // Blocking path: a paused upload is re-polled after a
                // bounded sleep rather than waiting on a condition.
                t.paused = false;
                while t.done.is_none() && advance(t) {}
                t.done.clone()
            };
            match done {
                Some(result) => return result,
                None => std::thread::sleep(IDLE_POLL),
            }
        }
    }

    fn destroy(&self, id: TransferId) {
        let mut inner = self.inner.lock().unwrap();
        inner.active.retain(|&a| a != id.0);
        inner.transfers.remove(&id.0);
    }
}

/// Advance one transfer as far as it will go without blocking. Returns
/// true if any progress was made.
fn advance(t: &mut Transfer) -> bool {
    let now = Instant::now();
    if let Some(d) = t.total_deadline {
        if now >= d && t.phase != Phase::Finished {
            t.finish(TransferResult::Timeout);
            return true;
        }
    }
    match t.phase {
        Phase::Finished => false,
        Phase::Created => start(t, now),
        Phase::Connecting => poll_connect(t, now),
        Phase::SendHead => send_head(t),
        Phase::SendBody => send_body(t),
        Phase::RecvHead => recv_head(t),
        Phase::RecvBody => recv_body(t),
    }
}

fn start(t: &mut Transfer, now: Instant) -> bool {
    let Some(url) = t.url.clone() else {
        t.finish(TransferResult::Failed("transfer not configured".into()));
        return true;
    };
    if url.secure && t.proxy.is_none() {
        warn!(host = %url.host, "https target on the plaintext engine");
        t.finish(TransferResult::Failed("tls is not supported by this engine".into()));
        return true;
    }
    if let Some(ct) = t.opts.connect_timeout {
        t.connect_deadline = Some(now + ct);
    }
    if t.total_deadline.is_none() {
        if let Some(tt) = t.opts.total_timeout {
            t.total_deadline = Some(now + tt);
        }
    }
    let target = t.proxy.clone().unwrap_or(url);
    match open_connection(&target.host, target.port) {
        Ok(sock) => {
            debug!(host = %target.host, port = target.port, "connecting");
            t.sock = Some(sock);
            t.phase = Phase::Connecting;
            true
        }
        Err(e) => {
            debug!(host = %target.host, error = %e, "connect setup failed");
            t.finish(TransferResult::ConnectFailed);
            true
        }
    }
}

fn poll_connect(t: &mut Transfer, now: Instant) -> bool {
    if let Some(d) = t.connect_deadline {
        if now >= d {
            t.finish(TransferResult::Timeout);
            return true;
        }
    }
    let Some(sock) = t.sock.as_ref() else {
        t.finish(TransferResult::ConnectFailed);
        return true;
    };
    if let Ok(Some(err)) = sock.take_error() {
        debug!(error = %err, "connect failed");
        t.finish(TransferResult::ConnectFailed);
        return true;
    }
    match sock.peer_addr() {
        Ok(_) => {
            let url = t.url.clone().unwrap();
            t.out = build_request_head(&t.opts, &url, t.proxy.is_some());
            t.out_pos = 0;
            t.phase = Phase::SendHead;
            if let Some(h) = t.handler() {
                h.on_debug("connected, sending request head");
            }
            true
        }
        Err(ref e)
            if e.kind() == io::ErrorKind::NotConnected
                || e.kind() == io::ErrorKind::WouldBlock =>
        {
            false
        }
        Err(e) => {
            debug!(error = %e, "connect failed");
            t.finish(TransferResult::ConnectFailed);
            true
        }
    }
}

/// Flush the pending output buffer. Ok(true) when fully flushed.
fn flush_out(t: &mut Transfer) -> Result<bool, String> {
    while t.out_pos < t.out.len() {
        let sock = t.sock.as_mut().ok_or("socket gone")?;
        match sock.write(&t.out[t.out_pos..]) {
            Ok(0) => return Err("connection closed while sending".into()),
            Ok(n) => t.out_pos += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(format!("send error: {e}")),
        }
    }
    t.out.clear();
    t.out_pos = 0;
    Ok(true)
}

fn send_head(t: &mut Transfer) -> bool {
    let before = t.out_pos;
    match flush_out(t) {
        Ok(true) => {
            t.phase = if t.opts.upload {
                Phase::SendBody
            } else {
                Phase::RecvHead
            };
            true
        }
        Ok(false) => t.out_pos != before,
        Err(e) => {
            t.finish(TransferResult::Failed(e));
            true
        }
    }
}

fn send_body(t: &mut Transfer) -> bool {
    let mut progress = false;
    loop {
        let before = t.out_pos;
        match flush_out(t) {
            Ok(true) => {}
            Ok(false) => return progress || t.out_pos != before,
            Err(e) => {
                t.finish(TransferResult::Failed(e));
                return true;
            }
        }
        if t.upload_eof {
            t.phase = Phase::RecvHead;
            return true;
        }
        if t.paused {
            return progress;
        }
        let Some(handler) = t.handler() else {
            t.finish(TransferResult::Failed("request released mid-transfer".into()));
            return true;
        };
        let chunked = t.opts.content_length.is_none();
        let max = t.opts.io_buffer;
        match handler.pull_upload(max) {
            Pull::Pause => {
                trace!("upload paused, waiting for data");
                t.paused = true;
                return progress;
            }
            Pull::Abort => {
                t.finish(TransferResult::Failed("aborted by handler".into()));
                return true;
            }
            Pull::Eof => {
                end_body(t, chunked);
                progress = true;
            }
            Pull::Data(d) if d.is_empty() => {
                end_body(t, chunked);
                progress = true;
            }
            Pull::Data(d) => {
                trace!(len = d.len(), "upload chunk pulled");
                if chunked {
                    t.out.extend_from_slice(format!("{:x}\r\n", d.len()).as_bytes());
                    t.out.extend_from_slice(&d);
                    t.out.extend_from_slice(b"\r\n");
                } else {
                    t.out.extend_from_slice(&d);
                }
                t.sent_body += d.len() as u64;
                if let Some(total) = t.opts.content_length {
                    if t.sent_body >= total {
                        t.upload_eof = true;
                    }
                }
                progress = true;
            }
        }
    }
}

fn end_body(t: &mut Transfer, chunked: bool) {
    if chunked {
        t.out.extend_from_slice(b"0\r\n\r\n");
    }
    t.upload_eof = true;
}

fn recv_head(t: &mut Transfer) -> bool {
    // A 1xx head and the final head can arrive in one burst; whatever is
    // already accumulated gets processed before reading again.
    if let Some(end) = find_head_end(&t.head_acc) {
        process_head(t, end);
        return true;
    }
    let mut buf = vec![0u8; t.opts.io_buffer];
    let mut progress = false;
    loop {
        let Some(sock) = t.sock.as_mut() else {
            t.finish(TransferResult::Failed("socket gone".into()));
            return true;
        };
        match sock.read(&mut buf) {
            Ok(0) => {
                t.finish(TransferResult::Failed(
                    "connection closed before response head".into(),
                ));
                return true;
            }
            Ok(n) => {
                progress = true;
                t.head_acc.extend_from_slice(&buf[..n]);
                if let Some(end) = find_head_end(&t.head_acc) {
                    process_head(t, end);
                    return true;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return progress,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                t.finish(TransferResult::Failed(format!("receive error: {e}")));
                return true;
            }
        }
    }
}

fn process_head(t: &mut Transfer, end: usize) {
    let head = t.head_acc[..end].to_vec();
    let rest = t.head_acc[end..].to_vec();
    t.head_acc.clear();

    let parsed = match parse_response_head(&head) {
        Ok(p) => p,
        Err(e) => {
            t.finish(TransferResult::Failed(e));
            return;
        }
    };
    if let Some(h) = t.handler() {
        h.on_header_data(&head);
    }
    debug!(status = parsed.status, "response head received");

    // Informational head: the final head follows on the same connection.
    if (100..200).contains(&parsed.status) {
        t.head_acc = rest;
        return;
    }

    // Auto-followed redirects; other 3xx surface as final responses.
    if (parsed.status == 301 || parsed.status == 302)
        && t.opts.follow_redirects
        && parsed.location.is_some()
    {
        if t.redirects >= t.opts.max_redirects {
            t.finish(TransferResult::Failed("too many redirects".into()));
            return;
        }
        let location = parsed.location.unwrap();
        let next = match t.url.as_ref().unwrap().resolve(&location) {
            Ok(u) => u,
            Err(e) => {
                t.finish(TransferResult::Failed(e));
                return;
            }
        };
        debug!(to = %next.absolute(), "following redirect");
        if let Some(h) = t.handler() {
            h.on_debug(&format!("following redirect to {}", next.absolute()));
        }
        t.redirects += 1;
        t.url = Some(next);
        // Redirected requests are replayed as bodyless GETs; the request
        // body was already consumed from the caller.
        if t.opts.upload {
            t.opts.method = "GET".into();
            t.opts.upload = false;
            t.opts.content_length = None;
        }
        let redirects = t.redirects;
        let total_deadline = t.total_deadline;
        let status_keep = t.status;
        t.rewind();
        t.redirects = redirects;
        t.total_deadline = total_deadline;
        t.status = status_keep;
        return;
    }

    t.status = parsed.status;
    t.version = parsed.version;

    let bodyless =
        t.opts.method.eq_ignore_ascii_case("HEAD") || parsed.status == 204 || parsed.status == 304;
    if bodyless {
        t.finish(TransferResult::Ok);
        return;
    }
    t.framing = Some(if parsed.chunked {
        Framing::Chunked(ChunkDecoder::new())
    } else if let Some(n) = parsed.content_length {
        if n == 0 {
            t.finish(TransferResult::Ok);
            return;
        }
        Framing::Length(n)
    } else {
        Framing::ToClose
    });
    t.phase = Phase::RecvBody;
    if !rest.is_empty() {
        feed_body(t, &rest);
    }
}

fn feed_body(t: &mut Transfer, data: &[u8]) {
    let handler = t.handler();
    let deliver = |h: &Option<std::sync::Arc<dyn TransferHandler>>, d: &[u8]| {
        if let Some(h) = h {
            h.on_body_data(d);
        }
    };
    match t.framing.take() {
        Some(Framing::Length(remaining)) => {
            let take = remaining.min(data.len() as u64) as usize;
            if take > 0 {
                deliver(&handler, &data[..take]);
            }
            let left = remaining - take as u64;
            if left == 0 {
                t.finish(TransferResult::Ok);
            } else {
                t.framing = Some(Framing::Length(left));
            }
        }
        Some(Framing::Chunked(mut dec)) => {
            let mut sink = |d: &[u8]| deliver(&handler, d);
            match dec.feed(data, &mut sink) {
                Ok(true) => t.finish(TransferResult::Ok),
                Ok(false) => t.framing = Some(Framing::Chunked(dec)),
                Err(e) => t.finish(TransferResult::Failed(e)),
            }
        }
        Some(Framing::ToClose) => {
            deliver(&handler, data);
            t.framing = Some(Framing::ToClose);
        }
        None => {}
    }
}

fn recv_body(t: &mut Transfer) -> bool {
    let mut buf = vec![0u8; t.opts.io_buffer];
    let mut progress = false;
    loop {
        let Some(sock) = t.sock.as_mut() else {
            // feed_body finished the transfer on a previous iteration.
            return progress;
        };
        match sock.read(&mut buf) {
            Ok(0) => {
                let framed = matches!(
                    t.framing,
                    Some(Framing::Length(_)) | Some(Framing::Chunked(_))
                );
                if framed {
                    t.finish(TransferResult::Failed("response body truncated".into()));
                } else {
                    t.finish(TransferResult::Ok);
                }
                return true;
            }
            Ok(n) => {
                progress = true;
                trace!(len = n, "body bytes received");
                feed_body(t, &buf[..n]);
                if t.done.is_some() {
                    return true;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return progress,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                t.finish(TransferResult::Failed(format!("receive error: {e}")));
                return true;
            }
        }
    }
}

fn open_connection(host: &str, port: u16) -> io::Result<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address for host"))?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    match socket.connect(&addr.into()) {
        Ok(_) => {}
        // EINPROGRESS (115 on Linux, 36 on macOS) is the normal result
        // of a non-blocking connect; Windows reports WouldBlock.
        Err(ref e)
            if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == Some(115)
                || e.raw_os_error() == Some(36) => {}
        Err(e) => return Err(e),
    }
    let stream: TcpStream = socket.into();
    let _ = stream.set_nodelay(true);
    Ok(stream)
}
