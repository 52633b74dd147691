/// Notification queue and dispatcher thread.
///
/// Producers (the multiplexer loop, any API-calling thread, a request's
/// final release) append records to one ordered channel; a single
/// dispatcher thread delivers them to the client callback. Strict FIFO
/// with one consumer means per-request order is exactly submission order.

use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, trace};

use wicket_types::{Handle, Payload, Status, StatusCallback};

use crate::request::Request;

/// One boxed callback invocation.
pub(crate) struct Record {
    /// Keeps the target request alive while the record is in flight. The
    /// terminal handle-closing record is queued from the request's drop
    /// and carries no reference.
    pub request: Option<Arc<Request>>,
    pub handle: Handle,
    pub context: u64,
    pub status: Status,
    pub payload: Payload,
    pub callback: Option<StatusCallback>,
    pub mask: u32,
}

enum Msg {
    Deliver(Record),
    Shutdown,
}

pub(crate) struct Notifier {
    tx: Sender<Msg>,
    closing: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        let closing = Arc::new(AtomicBool::new(false));
        let loop_closing = closing.clone();
        let thread = thread::Builder::new()
            .name("wicket-dispatch".into())
            .spawn(move || dispatch_loop(rx, loop_closing))
            .expect("spawn dispatcher thread");
        Arc::new(Self {
            tx,
            closing,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn queue(&self, record: Record) {
        trace!(handle = %record.handle, status = ?record.status, "notification queued");
        // A send after shutdown means the record is dropped undelivered,
        // which is the shutdown-drain contract anyway.
        let _ = self.tx.send(Msg::Deliver(record));
    }

    pub fn shutdown(&self) {
        self.closing.store(true, SeqCst);
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn dispatch_loop(rx: Receiver<Msg>, closing: Arc<AtomicBool>) {
    debug!("dispatcher started");
    let mut drained = 0usize;
    while let Ok(msg) = rx.recv() {
        match msg {
            Msg::Shutdown => break,
            // Once shutdown starts, remaining records are freed without
            // invoking callbacks.
            Msg::Deliver(_) if closing.load(SeqCst) => drained += 1,
            Msg::Deliver(record) => deliver(record),
        }
    }
    while rx.try_recv().is_ok() {
        drained += 1;
    }
    if drained > 0 {
        debug!(drained, "notification queue drained at shutdown");
    }
    debug!("dispatcher stopped");
}

fn deliver(record: Record) {
    let finished_closing = record
        .request
        .as_ref()
        .map(|r| r.is_closed())
        .unwrap_or(false);
    if !finished_closing {
        if let Some(cb) = &record.callback {
            if record.mask & record.status.mask_bit() != 0 {
                trace!(handle = %record.handle, status = ?record.status,
                       len = record.payload.len(), "notification delivered");
                cb(record.handle, record.context, record.status, &record.payload);
            }
        }
    }
    // Completion hook runs even for suppressed or masked records: the
    // closing notification is what flips the request to closed.
    if record.status == Status::HandleClosing {
        if let Some(request) = &record.request {
            request.set_closed();
        }
    }
    // Dropping the record may release the last reference to the request,
    // which queues that request's terminal handle-closing record.
}
