/// Per-exchange request state machine and the transfer callback bridge.
///
/// Progress is tracked as independent flags rather than one linear
/// automaton: header reception, body reception, read-queue draining, and
/// write-queue draining each advance on their own and are separately
/// resumable. The single-owner guards (`receive_pending`,
/// `query_data_pending`) are lock-free atomics safe to trip from the
/// engine-callback thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering::SeqCst};
use std::sync::{Arc, Mutex, Weak};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use wicket_engine::{
    Pull, TransferHandler, TransferId, TransferOptions, TransferResult, TransportEngine,
};
use wicket_types::{Error, Handle, Payload, Status, StatusCallback};

use crate::notify::{Notifier, Record};

/// Registered callback plus its notification mask.
#[derive(Clone, Default)]
pub(crate) struct CallbackSlot {
    pub cb: Option<StatusCallback>,
    pub mask: u32,
}

/// Response-body side: buffered bytes plus the FIFO of caller read slots.
struct BodyState {
    buf: BytesMut,
    /// Requested capacities of queued async reads.
    reads: VecDeque<usize>,
    completed: bool,
}

/// One queued write: owned bytes and how much the engine consumed so far.
/// `used` goes 0 → len exactly once; the slot is then retired.
struct WriteSlot {
    data: Bytes,
    used: usize,
}

/// Upload side: preset body, write-slot FIFO, the blocking-mode byte
/// queue, the pull wake counter, and the running sent count.
struct UploadState {
    preset: Bytes,
    writes: VecDeque<WriteSlot>,
    sync_queue: Vec<u8>,
    ready: u32,
    sent: u64,
}

/// Send-side state of the receive progression, guarded by its own mutex
/// so re-entrant drivers emit each checkpoint exactly once.
struct Progression {
    sent: u32,
    redirects_emitted: u32,
}

pub(crate) struct Request {
    me: Weak<Request>,
    id: u64,
    handle: Handle,
    /// Non-owning back-reference, resolved through the registry.
    pub connection: u64,
    pub transfer: TransferId,
    engine: Arc<dyn TransportEngine>,
    notifier: Arc<Notifier>,
    async_mode: bool,
    pub verb: String,

    /// Engine options assembled at open time, finalized at send time.
    pub options: Mutex<TransferOptions>,
    callback: Mutex<CallbackSlot>,
    context: AtomicU64,

    headers: Mutex<String>,
    header_arrivals: AtomicU32,
    receive_pending: AtomicBool,
    progression: Mutex<Progression>,
    redirects_observed: AtomicU32,
    header_complete: AtomicBool,

    body: Mutex<BodyState>,
    query_data_pending: AtomicBool,
    data_notified: AtomicBool,
    transfer_finished: AtomicBool,

    upload: Mutex<UploadState>,
    total_length: AtomicU64,
    uploading: AtomicBool,
    upload_thread_done: AtomicBool,

    result: Mutex<Option<TransferResult>>,
    closing: AtomicBool,
    closed: AtomicBool,
}

impl Request {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        handle: Handle,
        connection: u64,
        transfer: TransferId,
        engine: Arc<dyn TransportEngine>,
        notifier: Arc<Notifier>,
        async_mode: bool,
        verb: String,
        options: TransferOptions,
        callback: CallbackSlot,
        context: u64,
    ) -> Arc<Self> {
        let uploading = !matches!(
            verb.to_ascii_uppercase().as_str(),
            "GET" | "POST" | "HEAD"
        );
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id,
            handle,
            connection,
            transfer,
            engine,
            notifier,
            async_mode,
            verb,
            options: Mutex::new(options),
            callback: Mutex::new(callback),
            context: AtomicU64::new(context),
            headers: Mutex::new(String::new()),
            header_arrivals: AtomicU32::new(0),
            receive_pending: AtomicBool::new(false),
            progression: Mutex::new(Progression {
                sent: 0,
                redirects_emitted: 0,
            }),
            redirects_observed: AtomicU32::new(0),
            header_complete: AtomicBool::new(false),
            body: Mutex::new(BodyState {
                buf: BytesMut::new(),
                reads: VecDeque::new(),
                completed: false,
            }),
            query_data_pending: AtomicBool::new(false),
            data_notified: AtomicBool::new(false),
            transfer_finished: AtomicBool::new(false),
            upload: Mutex::new(UploadState {
                preset: Bytes::new(),
                writes: VecDeque::new(),
                sync_queue: Vec::new(),
                ready: 0,
                sent: 0,
            }),
            total_length: AtomicU64::new(0),
            uploading: AtomicBool::new(uploading),
            upload_thread_done: AtomicBool::new(false),
            result: Mutex::new(None),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_async(&self) -> bool {
        self.async_mode
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(SeqCst)
    }

    pub fn set_closing(&self) {
        self.closing.store(true, SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(SeqCst)
    }

    pub fn set_closed(&self) {
        self.closed.store(true, SeqCst);
    }

    pub fn set_context(&self, context: u64) {
        self.context.store(context, SeqCst);
    }

    pub fn context(&self) -> u64 {
        self.context.load(SeqCst)
    }

    pub fn set_callback(&self, slot: CallbackSlot) -> CallbackSlot {
        std::mem::replace(&mut *self.callback.lock().unwrap(), slot)
    }

    pub fn total_length(&self) -> u64 {
        self.total_length.load(SeqCst)
    }

    pub fn set_total_length(&self, total: u64) {
        self.total_length.store(total, SeqCst);
    }

    pub fn set_preset_body(&self, data: &[u8]) {
        self.upload.lock().unwrap().preset = Bytes::copy_from_slice(data);
    }

    pub fn preset_len(&self) -> usize {
        self.upload.lock().unwrap().preset.len()
    }

    pub fn upload_sent(&self) -> u64 {
        self.upload.lock().unwrap().sent
    }

    pub fn upload_thread_done(&self) -> bool {
        self.upload_thread_done.load(SeqCst)
    }

    pub fn set_upload_thread_done(&self) {
        self.upload_thread_done.store(true, SeqCst);
    }

    pub fn header_text(&self) -> String {
        self.headers.lock().unwrap().clone()
    }

    pub fn result(&self) -> Option<TransferResult> {
        self.result.lock().unwrap().clone()
    }

    pub fn set_result(&self, result: TransferResult) {
        *self.result.lock().unwrap() = Some(result);
    }

    pub fn set_transfer_finished(&self) {
        self.transfer_finished.store(true, SeqCst);
    }

    /// Reset per-exchange state so the handle can be sent again.
    pub fn clean_up(&self) {
        *self.result.lock().unwrap() = None;
        {
            let mut body = self.body.lock().unwrap();
            body.buf.clear();
            body.reads.clear();
            body.completed = false;
        }
        self.headers.lock().unwrap().clear();
        {
            let mut up = self.upload.lock().unwrap();
            up.writes.clear();
            up.sync_queue.clear();
            up.ready = 0;
            up.sent = 0;
        }
        {
            let mut p = self.progression.lock().unwrap();
            p.sent = 0;
            p.redirects_emitted = 0;
        }
        self.header_arrivals.store(0, SeqCst);
        self.receive_pending.store(false, SeqCst);
        self.redirects_observed.store(0, SeqCst);
        self.header_complete.store(false, SeqCst);
        self.query_data_pending.store(false, SeqCst);
        self.data_notified.store(false, SeqCst);
        self.transfer_finished.store(false, SeqCst);
        self.upload_thread_done.store(false, SeqCst);
    }

    /// Queue a notification for the dispatcher. No-op for blocking-mode
    /// requests, which have no callback contract.
    pub(crate) fn async_queue(&self, status: Status, payload: Payload) {
        if !self.async_mode {
            return;
        }
        let slot = self.callback.lock().unwrap().clone();
        self.notifier.queue(Record {
            request: self.me.upgrade(),
            handle: self.handle,
            context: self.context.load(SeqCst),
            status,
            payload,
            callback: slot.cb,
            mask: slot.mask,
        });
    }

    pub(crate) fn queue_error(&self, error: Error) {
        self.async_queue(Status::RequestError, Payload::Error(error));
    }

    // ── Header ingestion ───────────────────────────────────────────────

    /// Bridge: raw response-head bytes from the engine.
    fn ingest_header_chunk(&self, data: &[u8]) {
        let complete = {
            let mut headers = self.headers.lock().unwrap();
            headers.push_str(&String::from_utf8_lossy(data));
            headers.contains("\r\n\r\n") || headers.contains("\n\n")
        };
        trace!(request = self.id, len = data.len(), complete, "header bytes");
        if !complete || !self.async_mode {
            return;
        }
        let status = parse_status_code(&self.headers.lock().unwrap());
        match status {
            Some(code) if code == 301 || code == 302 => {
                // The engine follows the redirect; the next head replaces
                // this one.
                self.headers.lock().unwrap().clear();
                let seen = self.redirects_observed.fetch_add(1, SeqCst) + 1;
                debug!(request = self.id, redirects = seen, "redirect observed");
            }
            Some(code) if (100..200).contains(&code) => {
                self.headers.lock().unwrap().clear();
                trace!(request = self.id, code, "informational head discarded");
            }
            _ => {
                self.header_arrivals.fetch_add(1, SeqCst);
                self.handle_receive_notifications();
            }
        }
    }

    /// Drive the receive progression. Single-owner: only the caller that
    /// wins the pending flag emits, and each checkpoint fires once.
    pub(crate) fn handle_receive_notifications(&self) {
        if self
            .receive_pending
            .compare_exchange(true, false, SeqCst, SeqCst)
            .is_err()
        {
            return;
        }
        let observed = self.redirects_observed.load(SeqCst);
        let mut p = self.progression.lock().unwrap();
        if p.sent == 0 {
            self.async_queue(Status::ReceivingResponse, Payload::None);
            p.sent = 1;
        }
        if p.sent == 1 {
            let header_len = self.headers.lock().unwrap().len();
            self.async_queue(Status::ResponseReceived, Payload::Size(header_len));
            p.sent = 2;
        }
        while p.redirects_emitted < observed {
            self.async_queue(Status::Redirect, Payload::None);
            p.redirects_emitted += 1;
            p.sent += 1;
        }
        if p.sent == 2 + p.redirects_emitted && self.outcome_ok() {
            self.header_complete.store(true, SeqCst);
            self.async_queue(Status::HeadersAvailable, Payload::None);
            p.sent += 1;
        }
    }

    fn outcome_ok(&self) -> bool {
        matches!(
            &*self.result.lock().unwrap(),
            None | Some(TransferResult::Ok)
        )
    }

    /// Arm the receive waiter; emit immediately if the head already
    /// arrived. Called from the receive-response API.
    pub(crate) fn wait_receive(&self) {
        let _ = self
            .receive_pending
            .compare_exchange(false, true, SeqCst, SeqCst);
        if self.header_arrivals.load(SeqCst) > 0 {
            self.handle_receive_notifications();
        }
    }

    /// Emit any still-pending progression checkpoints; called by the
    /// multiplexer when a transfer completes successfully.
    pub(crate) fn finish_receive_progression(&self) {
        if self.receive_pending.load(SeqCst) && self.header_arrivals.load(SeqCst) > 0 {
            self.handle_receive_notifications();
        }
    }

    // ── Body ingestion ─────────────────────────────────────────────────

    /// Bridge: decoded response-body bytes from the engine.
    fn ingest_body_chunk(&self, data: &[u8]) {
        let mut incoming = Bytes::copy_from_slice(data);
        let appended = {
            let mut body = self.body.lock().unwrap();
            // Outstanding reads drain buffered bytes first, then the new
            // chunk, preserving arrival order.
            self.drain_buffered(&mut body);
            self.consume_into_reads(&mut body, &mut incoming);
            if !incoming.is_empty() {
                body.buf.extend_from_slice(&incoming);
            }
            incoming.len()
        };
        trace!(request = self.id, len = data.len(), appended, "body bytes");
        if appended > 0 {
            // New bytes re-arm the data-available emission.
            self.data_notified.store(false, SeqCst);
            if self.async_mode {
                self.handle_query_data(appended);
            }
        }
    }

    /// Satisfy queued reads from the body buffer, oldest slot first. A
    /// slot is retired by its first (possibly partial) fill.
    fn drain_buffered(&self, body: &mut BodyState) {
        while !body.buf.is_empty() {
            let Some(cap) = body.reads.pop_front() else {
                break;
            };
            let take = cap.min(body.buf.len());
            let out = body.buf.split_to(take).freeze();
            trace!(request = self.id, len = out.len(), "queued read satisfied");
            self.async_queue(Status::ReadComplete, Payload::Data(out));
        }
    }

    /// Satisfy queued reads straight from an arriving chunk.
    fn consume_into_reads(&self, body: &mut BodyState, data: &mut Bytes) {
        while !data.is_empty() {
            let Some(cap) = body.reads.pop_front() else {
                break;
            };
            let take = cap.min(data.len());
            let out = data.split_to(take);
            trace!(request = self.id, len = out.len(), "queued read satisfied");
            self.async_queue(Status::ReadComplete, Payload::Data(out));
        }
    }

    /// Success completion: flush buffered bytes into queued reads, then
    /// post a zero-length completion per still-waiting slot as the
    /// end-of-stream signal.
    pub(crate) fn complete_body(&self) {
        let mut body = self.body.lock().unwrap();
        body.completed = true;
        self.drain_buffered(&mut body);
        while body.reads.pop_front().is_some() {
            self.async_queue(Status::ReadComplete, Payload::Data(Bytes::new()));
        }
    }

    /// Error completion: mark the body finished without flushing.
    pub(crate) fn mark_completed(&self) {
        self.body.lock().unwrap().completed = true;
    }

    // ── Data-available query ───────────────────────────────────────────

    /// Emit the deferred data-available notification if the single-owner
    /// flag is armed. `available == 0` means "report whatever is
    /// buffered" (used at completion).
    pub(crate) fn handle_query_data(&self, available: usize) -> bool {
        if self
            .query_data_pending
            .compare_exchange(true, false, SeqCst, SeqCst)
            .is_err()
        {
            return false;
        }
        let count = if available == 0 {
            self.body.lock().unwrap().buf.len()
        } else {
            available
        };
        debug!(request = self.id, available = count, "data available");
        self.data_notified.store(true, SeqCst);
        self.async_queue(Status::DataAvailable, Payload::Size(count));
        true
    }

    pub(crate) fn query_data_available(&self) -> Result<usize, Error> {
        if self.is_closing() {
            return Err(Error::OperationCancelled);
        }
        let mut available = self.body.lock().unwrap().buf.len();
        if self.async_mode {
            if available == 0 {
                // Defer the emission until bytes arrive or the transfer
                // completes (the count is then whatever remains).
                self.query_data_pending.store(true, SeqCst);
                if self.transfer_finished.load(SeqCst) {
                    self.handle_query_data(0);
                }
                available = self.body.lock().unwrap().buf.len();
            } else if !self.data_notified.swap(true, SeqCst) {
                // Re-query before new bytes arrive returns the same count
                // without another notification.
                self.async_queue(Status::DataAvailable, Payload::Size(available));
            }
        }
        Ok(available)
    }

    // ── Read / write ───────────────────────────────────────────────────

    pub(crate) fn read_data(&self, max: usize) -> Result<Bytes, Error> {
        if self.is_closing() {
            return Err(Error::OperationCancelled);
        }
        if max == 0 {
            // Never touches the buffer, but async mode still answers.
            if self.async_mode {
                self.async_queue(Status::ReadComplete, Payload::Data(Bytes::new()));
            }
            return Ok(Bytes::new());
        }
        let mut body = self.body.lock().unwrap();
        let take = body.buf.len().min(max);
        let out = body.buf.split_to(take).freeze();
        if self.async_mode {
            if out.is_empty() && !body.completed {
                trace!(request = self.id, max, "read queued until data arrives");
                body.reads.push_back(max);
            } else {
                self.async_queue(Status::ReadComplete, Payload::Data(out.clone()));
            }
        }
        Ok(out)
    }

    pub(crate) fn write_data(&self, data: &[u8]) -> Result<usize, Error> {
        if self.is_closing() {
            return Err(Error::OperationCancelled);
        }
        let len = data.len();
        if self.async_mode {
            {
                let mut up = self.upload.lock().unwrap();
                up.writes.push_back(WriteSlot {
                    data: Bytes::copy_from_slice(data),
                    used: 0,
                });
                up.ready += 1;
            }
            trace!(request = self.id, len, "write queued, resuming transfer");
            // Resume outside the upload lock; the engine may be holding
            // its own lock while pulling from this request.
            self.engine.resume(self.transfer);
        } else {
            let mut up = self.upload.lock().unwrap();
            up.sync_queue.extend_from_slice(data);
            up.ready += 1;
        }
        Ok(len)
    }

    /// Bump the pull wake counter and resume; ends a chunked upload when
    /// nothing further is queued.
    pub(crate) fn signal_upload_end(&self) {
        self.upload.lock().unwrap().ready += 1;
        self.engine.resume(self.transfer);
    }

    // ── Upload draining (engine pulls) ─────────────────────────────────

    fn pull(&self, max: usize) -> Pull {
        let mut guard = self.upload.lock().unwrap();
        let up = &mut *guard;
        if !up.preset.is_empty() {
            let take = up.preset.len().min(max);
            let out = up.preset.split_to(take);
            up.sent += out.len() as u64;
            trace!(request = self.id, len = out.len(), "preset body drained");
            return Pull::Data(out);
        }
        if self.is_closing() || self.is_closed() {
            return Pull::Abort;
        }
        let total = self.total_length.load(SeqCst);
        if ((total == 0 && self.uploading.load(SeqCst)) || total != up.sent) && up.ready == 0 {
            trace!(request = self.id, sent = up.sent, total, "upload pull suspended");
            return Pull::Pause;
        }
        if self.async_mode {
            let Some(front) = up.writes.front_mut() else {
                // Woken with nothing queued: end of the request body.
                return Pull::Eof;
            };
            let mut take = (front.data.len() - front.used).min(max);
            if total != 0 {
                take = take.min((total - up.sent) as usize);
            }
            let out = front.data.slice(front.used..front.used + take);
            front.used += take;
            up.sent += take as u64;
            if front.used == front.data.len() {
                let slot_len = front.data.len();
                up.writes.pop_front();
                up.ready = up.ready.saturating_sub(1);
                trace!(request = self.id, len = slot_len, "write slot completed");
                self.async_queue(Status::WriteComplete, Payload::Size(slot_len));
            }
            if out.is_empty() {
                return Pull::Eof;
            }
            Pull::Data(out)
        } else {
            up.ready = up.ready.saturating_sub(1);
            let take = up.sync_queue.len().min(max);
            if take == 0 {
                return Pull::Eof;
            }
            let out = Bytes::copy_from_slice(&up.sync_queue[..take]);
            up.sync_queue.drain(..take);
            up.sent += take as u64;
            Pull::Data(out)
        }
    }
}

impl TransferHandler for Request {
    fn on_header_data(&self, data: &[u8]) {
        self.ingest_header_chunk(data);
    }

    fn on_body_data(&self, data: &[u8]) {
        self.ingest_body_chunk(data);
    }

    fn pull_upload(&self, max: usize) -> Pull {
        self.pull(max)
    }

    fn on_debug(&self, text: &str) {
        trace!(request = self.id, "{text}");
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        debug!(request = self.id, "last reference released");
        self.engine.destroy(self.transfer);
        if self.async_mode {
            // The terminal notification outlives the object: the record
            // carries everything it needs by value.
            let slot = self.callback.lock().unwrap().clone();
            self.notifier.queue(Record {
                request: None,
                handle: self.handle,
                context: self.context.load(SeqCst),
                status: Status::HandleClosing,
                payload: Payload::None,
                callback: slot.cb,
                mask: slot.mask,
            });
        }
    }
}

/// Status code from the first line of an accumulated response head.
pub(crate) fn parse_status_code(head: &str) -> Option<u32> {
    let line = head.lines().next()?;
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status_code("HTTP/1.1 200 OK\r\n"), Some(200));
        assert_eq!(parse_status_code("HTTP/1.0 301 Moved\r\nX: y\r\n"), Some(301));
        assert_eq!(parse_status_code("garbage"), None);
        assert_eq!(parse_status_code(""), None);
    }
}
