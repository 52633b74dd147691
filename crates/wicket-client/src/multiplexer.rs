/// Transport multiplexer: one dedicated loop advancing every active
/// asynchronous transfer, coordinated through a lock-protected active set
/// and a wake channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, warn};

use wicket_engine::{Completion, TransferResult, TransportEngine};
use wicket_types::Error;

use crate::request::Request;

/// Engine readiness is awaited with a bounded budget so shutdown stays
/// observable.
const STEP_BUDGET: Duration = Duration::from_millis(50);

struct MuxShared {
    engine: Arc<dyn TransportEngine>,
    active: Mutex<HashMap<u64, Arc<Request>>>,
    wake_tx: Sender<()>,
    closing: AtomicBool,
}

pub(crate) struct Multiplexer {
    shared: Arc<MuxShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Multiplexer {
    pub fn new(engine: Arc<dyn TransportEngine>) -> Self {
        let (wake_tx, wake_rx) = unbounded();
        let shared = Arc::new(MuxShared {
            engine,
            active: Mutex::new(HashMap::new()),
            wake_tx,
            closing: AtomicBool::new(false),
        });
        let loop_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("wicket-mux".into())
            .spawn(move || mux_loop(loop_shared, wake_rx))
            .expect("spawn multiplexer thread");
        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Register a transfer with the engine's multiplexed set. Clears any
    /// stale registration of the same transfer first.
    pub fn add(&self, request: &Arc<Request>) -> Result<(), Error> {
        let token = request.id();
        let mut active = self.shared.active.lock().unwrap();
        if active.remove(&token).is_some() {
            let _ = self.shared.engine.remove(request.transfer, false);
        }
        self.shared
            .engine
            .add(request.transfer)
            .map_err(|e| Error::Engine(e.to_string()))?;
        active.insert(token, request.clone());
        Ok(())
    }

    /// Detach a transfer; optionally clears its completion correlation.
    #[allow(dead_code)]
    pub fn remove(&self, request: &Arc<Request>, clear_correlation: bool) -> Result<(), Error> {
        let mut active = self.shared.active.lock().unwrap();
        self.shared
            .engine
            .remove(request.transfer, clear_correlation)
            .map_err(|e| Error::Engine(e.to_string()))?;
        active.remove(&request.id());
        Ok(())
    }

    /// Guarantee the loop observes new or resumed work.
    pub fn wake(&self) {
        let _ = self.shared.wake_tx.send(());
    }

    pub fn shutdown(&self) {
        self.shared.closing.store(true, SeqCst);
        self.wake();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn mux_loop(shared: Arc<MuxShared>, wake_rx: Receiver<()>) {
    debug!("multiplexer loop started");
    'outer: loop {
        // Block until woken; every operation that needs progress sends.
        match wake_rx.recv() {
            Ok(()) => {}
            Err(_) => break,
        }
        if shared.closing.load(SeqCst) {
            break;
        }
        loop {
            let running = shared.engine.step(STEP_BUDGET);
            for completion in shared.engine.completions() {
                finalize(&shared, completion);
            }
            // Coalesce wakes that arrived while stepping.
            while wake_rx.try_recv().is_ok() {}
            if shared.closing.load(SeqCst) {
                break 'outer;
            }
            if running == 0 {
                break;
            }
        }
    }
    debug!("multiplexer loop stopped");
}

/// Correlate a completion to its request and finalize the exchange.
fn finalize(shared: &Arc<MuxShared>, completion: Completion) {
    let request = shared
        .active
        .lock()
        .unwrap()
        .get(&completion.token)
        .cloned();
    let Some(request) = request else {
        warn!(token = completion.token, "completion without a live request");
        return;
    };
    debug!(request = completion.token, result = ?completion.result, "transfer completed");
    match completion.result {
        TransferResult::Ok => {
            request.set_result(TransferResult::Ok);
            // A waiter that arrived before any bytes is answered now;
            // arming after this point reports the remaining count.
            request.handle_query_data(0);
            request.set_transfer_finished();
            request.handle_query_data(0);
            request.complete_body();
            request.finish_receive_progression();
        }
        TransferResult::Timeout => {
            request.set_result(completion.result.clone());
            request.mark_completed();
            request.queue_error(Error::Timeout);
        }
        TransferResult::ConnectFailed => {
            request.set_result(completion.result.clone());
            request.mark_completed();
            request.queue_error(Error::CannotConnect);
        }
        TransferResult::Failed(ref message) => {
            // Unexpected engine outcomes are reported, never fatal.
            error!(request = completion.token, error = %message, "transport failure");
            request.set_result(completion.result.clone());
            request.mark_completed();
            request.queue_error(Error::OperationCancelled);
        }
    }
    if let Err(e) = shared.engine.remove(request.transfer, true) {
        warn!(request = completion.token, error = %e, "detach after completion failed");
    }
    shared.active.lock().unwrap().remove(&completion.token);
}
