/// The emulated client surface: open session/connection/request, send,
/// receive, query/read/write, options, callbacks, close.
///
/// `Client` owns the process-wide pieces — the transport engine, the
/// multiplexer loop, the dispatcher thread, and one registry per handle
/// kind — and hands out opaque handles validated on every call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info};

use wicket_engine::tcp::TcpEngine;
use wicket_engine::{TransferId, TransferOptions, TransferResult, TransportEngine};
use wicket_types::{
    Error, Handle, HandleKind, HeaderQuery, HeaderValue, OptionKey, OptionValue, Payload,
    SECURITY_FLAG_IGNORE_ALL, SECURITY_FLAG_IGNORE_CERT_CN_INVALID, Status, StatusCallback,
    reason_phrase,
};

use crate::config::Config;
use crate::multiplexer::Multiplexer;
use crate::notify::Notifier;
use crate::registry::Registry;
use crate::request::{CallbackSlot, Request, parse_status_code};
use crate::session::{Connection, Session};

/// Feature toggle accepted by `EnableFeature`: TLS revocation checking.
pub const ENABLE_SSL_REVOCATION: u32 = 1;

struct ClientInner {
    config: Config,
    engine: Arc<dyn TransportEngine>,
    notifier: Arc<Notifier>,
    mux: Multiplexer,
    sessions: Registry<Session>,
    connections: Registry<Connection>,
    requests: Registry<Request>,
    next_id: AtomicU64,
}

/// Front object for the emulated API.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client backed by the bundled TCP engine.
    pub fn new() -> Self {
        Self::with_engine(Arc::new(TcpEngine::new()), Config::from_env())
    }

    /// Client backed by a caller-supplied engine (tests use the scripted
    /// engine through this).
    pub fn with_engine(engine: Arc<dyn TransportEngine>, config: Config) -> Self {
        let notifier = Notifier::new();
        let mux = Multiplexer::new(engine.clone());
        Self {
            inner: Arc::new(ClientInner {
                config,
                engine,
                notifier,
                mux,
                sessions: Registry::new(),
                connections: Registry::new(),
                requests: Registry::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, SeqCst)
    }

    // ── Handle resolution ──────────────────────────────────────────────

    fn session(&self, handle: Handle) -> Result<Arc<Session>, Error> {
        if handle.kind() != HandleKind::Session {
            return Err(Error::IncorrectHandleType);
        }
        self.inner.sessions.get(handle.id()).ok_or(Error::InvalidHandle)
    }

    fn connection(&self, handle: Handle) -> Result<Arc<Connection>, Error> {
        if handle.kind() != HandleKind::Connection {
            return Err(Error::IncorrectHandleType);
        }
        self.inner
            .connections
            .get(handle.id())
            .ok_or(Error::InvalidHandle)
    }

    fn request(&self, handle: Handle) -> Result<Arc<Request>, Error> {
        if handle.kind() != HandleKind::Request {
            return Err(Error::IncorrectHandleType);
        }
        self.inner
            .requests
            .get(handle.id())
            .ok_or(Error::InvalidHandle)
    }

    /// Resolve the session behind any handle kind.
    fn session_of(&self, handle: Handle) -> Result<Arc<Session>, Error> {
        match handle.kind() {
            HandleKind::Session => self.session(handle),
            HandleKind::Connection => {
                let conn = self.connection(handle)?;
                self.inner
                    .sessions
                    .get(conn.session)
                    .ok_or(Error::InvalidHandle)
            }
            HandleKind::Request => {
                let request = self.request(handle)?;
                let conn = self
                    .inner
                    .connections
                    .get(request.connection)
                    .ok_or(Error::InvalidHandle)?;
                self.inner
                    .sessions
                    .get(conn.session)
                    .ok_or(Error::InvalidHandle)
            }
        }
    }

    // ── Open / connect / open-request ──────────────────────────────────

    pub fn open_session(
        &self,
        agent: Option<&str>,
        proxy: Option<&str>,
        async_mode: bool,
    ) -> Result<Handle, Error> {
        let id = self.next_id();
        let proxies: Vec<String> = proxy
            .map(|p| {
                p.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if proxy.is_some() && proxies.is_empty() {
            return Err(Error::InvalidParameter);
        }
        let session = Session::new(
            id,
            async_mode,
            agent.map(String::from),
            proxies,
            self.inner.config.connect_timeout_ms,
            self.inner.config.receive_timeout_ms,
        );
        self.inner.sessions.register(id, Arc::new(session));
        let handle = Handle::new(HandleKind::Session, id);
        info!(session = id, async_mode, "session opened");
        Ok(handle)
    }

    pub fn connect(&self, session: Handle, server: &str, port: u16) -> Result<Handle, Error> {
        let session = self.session(session)?;
        if server.is_empty() {
            return Err(Error::InvalidParameter);
        }
        let id = self.next_id();
        let connection = Connection::new(id, session.id, server.to_string(), port);
        self.inner.connections.register(id, Arc::new(connection));
        info!(connection = id, server, port, "connection opened");
        Ok(Handle::new(HandleKind::Connection, id))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open_request(
        &self,
        connection: Handle,
        verb: Option<&str>,
        object: Option<&str>,
        version: Option<&str>,
        referrer: Option<&str>,
        accept: &[&str],
        secure: bool,
    ) -> Result<Handle, Error> {
        let conn = self.connection(connection)?;
        let session = self
            .inner
            .sessions
            .get(conn.session)
            .ok_or(Error::InvalidHandle)?;
        match version {
            None | Some("1.0") | Some("1.1") => {}
            Some(_) => return Err(Error::InvalidParameter),
        }
        let verb = verb.unwrap_or("GET").to_string();

        let scheme = if secure { "https" } else { "http" };
        let default_port: u16 = if secure { 443 } else { 80 };
        // Fragment markers are percent-escaped so links to fragments stay
        // part of the request target.
        let mut object = object.unwrap_or("").replace('#', "%23");
        if !object.is_empty() && !object.starts_with('/') {
            object.insert(0, '/');
        }
        let url = if conn.port == default_port || conn.port == 0 {
            format!("{scheme}://{}{object}", conn.server)
        } else {
            format!("{scheme}://{}:{}{object}", conn.server, conn.port)
        };

        let mut headers = Vec::new();
        if let Some(agent) = &session.agent {
            headers.push(format!("User-Agent: {agent}"));
        }
        if let Some(referrer) = referrer {
            headers.push(format!("Referer: {referrer}"));
        }
        if !accept.is_empty() {
            headers.push(format!("Accept: {}", accept.join(", ")));
        }

        let options = TransferOptions {
            url: url.clone(),
            method: verb.clone(),
            headers,
            connect_timeout: ms_opt(session.connect_timeout_ms()),
            total_timeout: ms_opt(session.receive_timeout_ms()),
            io_buffer: self.inner.config.io_buffer,
            upload: false,
            content_length: None,
            follow_redirects: true,
            max_redirects: self.inner.config.max_redirects,
            verify_peer: true,
            verify_host: true,
            secure_protocols: session.secure_protocols.load(SeqCst),
            max_connections: session.max_connections.load(SeqCst),
            proxy: session.proxies.lock().unwrap().last().cloned(),
        };

        let (slot, context) = if session.async_mode {
            let slot = session.callback();
            let context = (*conn.context.lock().unwrap())
                .or(*session.context.lock().unwrap())
                .unwrap_or(0);
            (slot, context)
        } else {
            (CallbackSlot::default(), 0)
        };

        let id = self.next_id();
        let handle = Handle::new(HandleKind::Request, id);
        let transfer = self.inner.engine.create();
        let request = Request::new(
            id,
            handle,
            conn.id,
            transfer,
            self.inner.engine.clone(),
            self.inner.notifier.clone(),
            session.async_mode,
            verb.clone(),
            options,
            slot,
            context,
        );
        let as_handler: Arc<dyn wicket_engine::TransferHandler> = request.clone();
        self.inner
            .engine
            .set_handler(transfer, Arc::downgrade(&as_handler))
            .map_err(|e| Error::Engine(e.to_string()))?;
        self.inner
            .engine
            .set_token(transfer, id)
            .map_err(|e| Error::Engine(e.to_string()))?;
        self.inner.requests.register(id, request);
        info!(request = id, verb, url, "request opened");
        Ok(handle)
    }

    /// Correlation id of the underlying engine transfer, for engine-level
    /// introspection (the scripted engine keys its scripts on this).
    pub fn transfer_id(&self, request: Handle) -> Result<TransferId, Error> {
        Ok(self.request(request)?.transfer)
    }

    // ── Headers / send ─────────────────────────────────────────────────

    pub fn add_request_headers(&self, request: Handle, headers: &str) -> Result<(), Error> {
        let request = self.request(request)?;
        append_header_lines(&request, headers);
        Ok(())
    }

    /// Dispatch the exchange. `total_length` declares the upload size; a
    /// zero total with a body-bearing verb and no preset body selects a
    /// chunked upload (asynchronous sessions only).
    pub fn send_request(
        &self,
        request: Handle,
        headers: Option<&str>,
        body: Option<&[u8]>,
        total_length: u64,
        context: Option<u64>,
    ) -> Result<(), Error> {
        let request = self.request(request)?;
        if request.is_closing() {
            return Err(Error::OperationCancelled);
        }
        if let Some(text) = headers {
            append_header_lines(&request, text);
        }
        let preset_len = body.map(|b| b.len()).unwrap_or(0);
        if body.is_some() && preset_len == 0 {
            return Err(Error::InvalidParameter);
        }
        let uploading = request.is_uploading();
        let is_post = request.verb.eq_ignore_ascii_case("POST");

        // A blocking upload without a declared total length cannot make
        // progress: there is no completion signal to poll for.
        if (uploading || is_post) && !request.is_async() && total_length == 0 {
            return Err(Error::InvalidParameter);
        }

        if uploading && total_length == 0 && preset_len == 0 {
            append_header_lines(&request, "Transfer-Encoding: chunked");
        }
        if let Some(b) = body {
            request.set_preset_body(b);
        }
        let total_effective = total_length.max(preset_len as u64);
        request.set_total_length(if total_length == 0 {
            preset_len as u64
        } else {
            total_length
        });

        {
            let mut opts = request.options.lock().unwrap().clone();
            opts.upload = uploading || preset_len > 0 || total_length > 0;
            opts.content_length = if total_effective > 0 {
                Some(total_effective)
            } else {
                None
            };
            self.inner
                .engine
                .configure(request.transfer, opts)
                .map_err(|e| Error::Engine(e.to_string()))?;
        }
        if let Some(ctx) = context {
            request.set_context(ctx);
        }

        if request.is_async() {
            request.clean_up();
            request.async_queue(Status::SendingRequest, Payload::None);
            self.inner.mux.add(&request)?;
            self.inner.mux.wake();
            request.async_queue(Status::RequestSent, Payload::None);
            request.async_queue(Status::SendRequestComplete, Payload::None);
            debug!(request = request.id(), "request dispatched");
            return Ok(());
        }

        if total_length > 0 && !is_post {
            // Blocking upload: a short-lived driver thread advances this
            // one transfer while the caller feeds it with write calls.
            let driver = request.clone();
            let engine = self.inner.engine.clone();
            thread::Builder::new()
                .name("wicket-upload".into())
                .spawn(move || {
                    let result = engine.perform(driver.transfer);
                    debug!(request = driver.id(), ?result, "upload transfer finished");
                    driver.set_result(result);
                    driver.mark_completed();
                    driver.set_upload_thread_done();
                })
                .map_err(|e| Error::Engine(e.to_string()))?;
            return Ok(());
        }

        let result = self.inner.engine.perform(request.transfer);
        request.set_result(result.clone());
        request.mark_completed();
        match result {
            TransferResult::Ok => Ok(()),
            TransferResult::Timeout => Err(Error::Timeout),
            TransferResult::ConnectFailed => Err(Error::CannotConnect),
            TransferResult::Failed(message) => {
                error!(request = request.id(), error = %message, "transfer failed");
                Err(Error::OperationCancelled)
            }
        }
    }

    // ── Receive / query / read / write ─────────────────────────────────

    pub fn receive_response(&self, request: Handle) -> Result<(), Error> {
        let request = self.request(request)?;
        let chunked_upload = request.total_length() == 0
            && request.preset_len() == 0
            && request.is_uploading();
        if chunked_upload && request.is_async() {
            // Ends the chunked body: the next pull sees the bumped wake
            // counter with an empty queue and reports end-of-stream.
            request.signal_upload_end();
            self.inner.mux.wake();
        }
        if request.is_async() {
            request.wait_receive();
            return Ok(());
        }

        if request.is_uploading() {
            // Blocking upload: poll with a bounded sleep, never on the
            // multiplexer's own conditions.
            loop {
                let sent = request.upload_sent();
                let total = request.total_length();
                if sent == total {
                    return Ok(());
                }
                if request.upload_thread_done() {
                    return if request.upload_sent() == total {
                        Ok(())
                    } else {
                        Err(Error::OperationCancelled)
                    };
                }
                thread::sleep(self.inner.config.poll_interval);
            }
        }
        match request.result() {
            Some(TransferResult::Timeout) => Err(Error::Timeout),
            Some(TransferResult::ConnectFailed) => Err(Error::CannotConnect),
            Some(TransferResult::Failed(_)) => Err(Error::OperationCancelled),
            _ => {
                if request.header_text().is_empty() {
                    Err(Error::OperationCancelled)
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn query_data_available(&self, request: Handle) -> Result<usize, Error> {
        self.request(request)?.query_data_available()
    }

    pub fn read_data(&self, request: Handle, max: usize) -> Result<Bytes, Error> {
        self.request(request)?.read_data(max)
    }

    pub fn write_data(&self, request: Handle, data: &[u8]) -> Result<usize, Error> {
        let request = self.request(request)?;
        let written = request.write_data(data)?;
        if request.is_async() {
            self.inner.mux.wake();
        }
        Ok(written)
    }

    // ── Callbacks / timeouts / options ─────────────────────────────────

    /// Register the status callback and its notification mask; returns
    /// the previously registered callback.
    pub fn set_status_callback(
        &self,
        handle: Handle,
        callback: Option<StatusCallback>,
        mask: u32,
    ) -> Result<Option<StatusCallback>, Error> {
        let slot = CallbackSlot { cb: callback, mask };
        match handle.kind() {
            HandleKind::Session => Ok(self.session(handle)?.set_callback(slot).cb),
            HandleKind::Request => Ok(self.request(handle)?.set_callback(slot).cb),
            HandleKind::Connection => Err(Error::IncorrectHandleType),
        }
    }

    /// Resolve/send timeouts are accepted for interface compatibility;
    /// only connect and receive timeouts reach the transport.
    pub fn set_timeouts(
        &self,
        handle: Handle,
        _resolve_ms: u32,
        connect_ms: u32,
        _send_ms: u32,
        receive_ms: u32,
    ) -> Result<(), Error> {
        match handle.kind() {
            HandleKind::Session => {
                let session = self.session(handle)?;
                session.connect_timeout_ms.store(connect_ms, SeqCst);
                session.receive_timeout_ms.store(receive_ms, SeqCst);
                Ok(())
            }
            HandleKind::Request => {
                let request = self.request(handle)?;
                let mut opts = request.options.lock().unwrap();
                opts.connect_timeout = ms_opt(connect_ms);
                opts.total_timeout = ms_opt(receive_ms);
                Ok(())
            }
            HandleKind::Connection => Err(Error::IncorrectHandleType),
        }
    }

    pub fn set_option(&self, handle: Handle, option: OptionValue) -> Result<(), Error> {
        match option {
            OptionValue::ContextValue(value) => match handle.kind() {
                HandleKind::Session => {
                    *self.session(handle)?.context.lock().unwrap() = Some(value);
                    Ok(())
                }
                HandleKind::Connection => {
                    *self.connection(handle)?.context.lock().unwrap() = Some(value);
                    Ok(())
                }
                HandleKind::Request => {
                    self.request(handle)?.set_context(value);
                    Ok(())
                }
            },
            OptionValue::MaxConnections(value) => match handle.kind() {
                HandleKind::Session => {
                    self.session(handle)?.max_connections.store(value, SeqCst);
                    Ok(())
                }
                HandleKind::Request => {
                    self.request(handle)?.options.lock().unwrap().max_connections = value;
                    Ok(())
                }
                HandleKind::Connection => Err(Error::IncorrectHandleType),
            },
            OptionValue::SecureProtocols(value) => match handle.kind() {
                HandleKind::Session => {
                    self.session(handle)?.secure_protocols.store(value, SeqCst);
                    Ok(())
                }
                HandleKind::Request => {
                    self.request(handle)?.options.lock().unwrap().secure_protocols = value;
                    Ok(())
                }
                HandleKind::Connection => Err(Error::IncorrectHandleType),
            },
            OptionValue::EnableFeature(value) => {
                if value == ENABLE_SSL_REVOCATION {
                    Ok(())
                } else {
                    Err(Error::InvalidParameter)
                }
            }
            OptionValue::SecurityFlags(value) => {
                let request = self.request(handle)?;
                let (peer, host) = if value == 0 {
                    (true, true)
                } else if value == SECURITY_FLAG_IGNORE_CERT_CN_INVALID {
                    (true, false)
                } else if value == SECURITY_FLAG_IGNORE_ALL {
                    (false, false)
                } else {
                    return Err(Error::InvalidParameter);
                };
                let mut opts = request.options.lock().unwrap();
                opts.verify_peer = peer;
                opts.verify_host = host;
                Ok(())
            }
            OptionValue::ConnectTimeoutMs(_)
            | OptionValue::Url(_)
            | OptionValue::HttpVersion { .. } => Err(Error::InvalidParameter),
        }
    }

    pub fn query_option(&self, handle: Handle, key: OptionKey) -> Result<OptionValue, Error> {
        match key {
            OptionKey::ContextValue => {
                let value = match handle.kind() {
                    HandleKind::Session => {
                        self.session(handle)?.context.lock().unwrap().unwrap_or(0)
                    }
                    HandleKind::Connection => {
                        self.connection(handle)?.context.lock().unwrap().unwrap_or(0)
                    }
                    HandleKind::Request => self.request(handle)?.context(),
                };
                Ok(OptionValue::ContextValue(value))
            }
            OptionKey::MaxConnections => match handle.kind() {
                HandleKind::Session => Ok(OptionValue::MaxConnections(
                    self.session(handle)?.max_connections.load(SeqCst),
                )),
                HandleKind::Request => Ok(OptionValue::MaxConnections(
                    self.request(handle)?.options.lock().unwrap().max_connections,
                )),
                HandleKind::Connection => Err(Error::IncorrectHandleType),
            },
            OptionKey::SecureProtocols => match handle.kind() {
                HandleKind::Session => Ok(OptionValue::SecureProtocols(
                    self.session(handle)?.secure_protocols.load(SeqCst),
                )),
                HandleKind::Request => Ok(OptionValue::SecureProtocols(
                    self.request(handle)?.options.lock().unwrap().secure_protocols,
                )),
                HandleKind::Connection => Err(Error::IncorrectHandleType),
            },
            OptionKey::ConnectTimeout => Ok(OptionValue::ConnectTimeoutMs(
                self.session_of(handle)?.connect_timeout_ms(),
            )),
            OptionKey::Url => {
                let request = self.request(handle)?;
                let url = self
                    .inner
                    .engine
                    .info(request.transfer)
                    .map(|i| i.effective_url)
                    .unwrap_or_else(|| request.options.lock().unwrap().url.clone());
                Ok(OptionValue::Url(url))
            }
            OptionKey::HttpVersion => {
                let request = self.request(handle)?;
                let info = self
                    .inner
                    .engine
                    .info(request.transfer)
                    .ok_or(Error::InvalidParameter)?;
                Ok(OptionValue::HttpVersion {
                    major: info.http_version.0,
                    minor: info.http_version.1,
                })
            }
        }
    }

    // ── Header queries ─────────────────────────────────────────────────

    pub fn query_headers(&self, request: Handle, query: HeaderQuery) -> Result<HeaderValue, Error> {
        let request = self.request(request)?;
        let headers = request.header_text();
        if headers.is_empty() {
            return Err(Error::InvalidParameter);
        }
        match query {
            HeaderQuery::RawHeadersCrlf => Ok(HeaderValue::Text(headers)),
            HeaderQuery::RawHeaders => Ok(HeaderValue::Text(nullize(&headers))),
            HeaderQuery::StatusCode => Ok(HeaderValue::Number(self.status_code(&request)?)),
            HeaderQuery::StatusText => {
                let line = headers.lines().next().unwrap_or("");
                if let Some(text) = line.splitn(3, ' ').nth(2) {
                    if !text.trim().is_empty() {
                        return Ok(HeaderValue::Text(text.trim().to_string()));
                    }
                }
                let code = self.status_code(&request)?;
                reason_phrase(code)
                    .map(|t| HeaderValue::Text(t.to_string()))
                    .ok_or(Error::InvalidParameter)
            }
            HeaderQuery::Version => {
                let line = headers.lines().next().unwrap_or("");
                let version = line
                    .split_whitespace()
                    .next()
                    .and_then(|t| t.strip_prefix("HTTP/"))
                    .ok_or(Error::InvalidParameter)?;
                Ok(HeaderValue::Text(version.to_string()))
            }
        }
    }

    /// Buffer-filling header query: writes the value plus a terminating
    /// NUL into `buf`, returning the text length. A short buffer fails
    /// with the required capacity.
    pub fn query_headers_into(
        &self,
        request: Handle,
        query: HeaderQuery,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let text = self.query_headers(request, query)?.to_text();
        let required = text.len() + 1;
        if buf.len() < required {
            return Err(Error::InsufficientBuffer { required });
        }
        buf[..text.len()].copy_from_slice(text.as_bytes());
        buf[text.len()] = 0;
        Ok(text.len())
    }

    fn status_code(&self, request: &Arc<Request>) -> Result<u32, Error> {
        if let Some(info) = self.inner.engine.info(request.transfer) {
            return Ok(info.status_code);
        }
        parse_status_code(&request.header_text()).ok_or(Error::InvalidParameter)
    }

    // ── Close ──────────────────────────────────────────────────────────

    /// Close any handle kind. The kind tag picks the registry; a dangling
    /// or foreign handle is rejected rather than probed.
    pub fn close_handle(&self, handle: Handle) -> Result<(), Error> {
        match handle.kind() {
            HandleKind::Request => {
                let request = self
                    .inner
                    .requests
                    .get(handle.id())
                    .ok_or(Error::InvalidHandle)?;
                // Subsequent calls fail fast; in-flight engine callbacks
                // finish against the still-referenced object, and the
                // terminal closing notification fires on last release.
                request.set_closing();
                self.inner.requests.unregister(handle.id());
                info!(request = handle.id(), "request closed");
                Ok(())
            }
            HandleKind::Session => {
                self.inner
                    .sessions
                    .unregister(handle.id())
                    .ok_or(Error::InvalidHandle)?;
                info!(session = handle.id(), "session closed");
                Ok(())
            }
            HandleKind::Connection => {
                self.inner
                    .connections
                    .unregister(handle.id())
                    .ok_or(Error::InvalidHandle)?;
                info!(connection = handle.id(), "connection closed");
                Ok(())
            }
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        debug!("client shutting down");
        self.mux.shutdown();
        self.requests.clear();
        self.connections.clear();
        self.sessions.clear();
        self.notifier.shutdown();
    }
}

fn ms_opt(ms: u32) -> Option<Duration> {
    if ms > 0 {
        Some(Duration::from_millis(ms as u64))
    } else {
        None
    }
}

fn append_header_lines(request: &Arc<Request>, text: &str) {
    let mut opts = request.options.lock().unwrap();
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r').trim();
        if !line.is_empty() {
            opts.headers.push(line.to_string());
        }
    }
}

/// Raw headers as NUL-separated lines with a double-NUL terminator.
fn nullize(headers: &str) -> String {
    let mut out = String::new();
    for line in headers.lines().filter(|l| !l.is_empty()) {
        out.push_str(line);
        out.push('\0');
    }
    out.push('\0');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullize_terminates_lines() {
        let out = nullize("HTTP/1.1 200 OK\r\nA: b\r\n\r\n");
        assert_eq!(out, "HTTP/1.1 200 OK\0A: b\0\0");
    }
}
