/// Deterministic engine for driving the client core in tests.
///
/// Each transfer executes a canned script: header chunks, body chunks,
/// upload pulls, explicit hold points, and a final result. Pause/resume
/// and completion correlation behave like the real engine, so the client
/// core cannot tell the difference.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::engine::{
    Completion, EngineError, Pull, TransferHandler, TransferId, TransferInfo, TransferOptions,
    TransferResult, TransportEngine,
};
use crate::http1::{find_head_end, parse_response_head};

/// One step of a scripted transfer.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver raw response-head bytes to the handler.
    Header(&'static str),
    /// Deliver response-body bytes to the handler.
    Body(&'static [u8]),
    /// Pull upload data from the handler until it reports end-of-body.
    /// A pause keeps the step queued until the transfer is resumed.
    Pull { max: usize },
    /// Stall the transfer until [`ScriptedEngine::release`] is called.
    Hold,
    /// Finish the transfer with the given result.
    Finish(TransferResult),
}

struct Scripted {
    handler: Option<Weak<dyn TransferHandler>>,
    token: Option<u64>,
    opts: TransferOptions,
    script: VecDeque<ScriptStep>,
    uploaded: Vec<u8>,
    upload_eof: bool,
    paused: bool,
    held: bool,
    in_multi: bool,
    done: Option<TransferResult>,
    completion_posted: bool,
    head_acc: Vec<u8>,
    status: u32,
    version: (u32, u32),
}

impl Scripted {
    fn new() -> Self {
        Self {
            handler: None,
            token: None,
            opts: TransferOptions::default(),
            script: VecDeque::new(),
            uploaded: Vec::new(),
            upload_eof: false,
            paused: false,
            held: false,
            in_multi: false,
            done: None,
            completion_posted: false,
            head_acc: Vec::new(),
            status: 0,
            version: (1, 1),
        }
    }

    fn handler(&self) -> Option<std::sync::Arc<dyn TransferHandler>> {
        self.handler.as_ref().and_then(|w| w.upgrade())
    }

    /// Track the status line of the last complete, non-informational head
    /// this transfer delivered, so `info()` answers like a real engine.
    fn observe_head(&mut self, chunk: &[u8]) {
        self.head_acc.extend_from_slice(chunk);
        while let Some(end) = find_head_end(&self.head_acc) {
            if let Ok(parsed) = parse_response_head(&self.head_acc[..end]) {
                if !(100..200).contains(&parsed.status) {
                    self.status = parsed.status;
                    self.version = parsed.version;
                }
            }
            self.head_acc.drain(..end);
        }
    }

    /// Execute one script step. Returns true on progress.
    fn advance(&mut self) -> bool {
        if self.done.is_some() || self.held {
            return false;
        }
        let Some(step) = self.script.front().cloned() else {
            return false;
        };
        match step {
            ScriptStep::Header(text) => {
                self.script.pop_front();
                self.observe_head(text.as_bytes());
                if let Some(h) = self.handler() {
                    h.on_header_data(text.as_bytes());
                }
                true
            }
            ScriptStep::Body(data) => {
                self.script.pop_front();
                if let Some(h) = self.handler() {
                    h.on_body_data(data);
                }
                true
            }
            ScriptStep::Pull { max } => {
                if self.paused {
                    return false;
                }
                let Some(h) = self.handler() else {
                    self.script.pop_front();
                    self.done = Some(TransferResult::Failed("handler released".into()));
                    return true;
                };
                let mut progress = false;
                loop {
                    match h.pull_upload(max) {
                        Pull::Pause => {
                            trace!("scripted upload paused");
                            self.paused = true;
                            return progress;
                        }
                        Pull::Abort => {
                            self.script.pop_front();
                            self.done = Some(TransferResult::Failed("aborted by handler".into()));
                            return true;
                        }
                        Pull::Eof => {
                            self.script.pop_front();
                            self.upload_eof = true;
                            return true;
                        }
                        Pull::Data(d) if d.is_empty() => {
                            self.script.pop_front();
                            self.upload_eof = true;
                            return true;
                        }
                        Pull::Data(d) => {
                            self.uploaded.extend_from_slice(&d);
                            progress = true;
                        }
                    }
                }
            }
            ScriptStep::Hold => {
                self.script.pop_front();
                self.held = true;
                true
            }
            ScriptStep::Finish(result) => {
                self.script.pop_front();
                self.done = Some(result);
                true
            }
        }
    }
}

/// Script-driven [`TransportEngine`].
pub struct ScriptedEngine {
    inner: Mutex<ScriptedInner>,
}

struct ScriptedInner {
    transfers: HashMap<u64, Scripted>,
    active: Vec<u64>,
    completions: VecDeque<Completion>,
    next_id: u64,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ScriptedInner {
                transfers: HashMap::new(),
                active: Vec::new(),
                completions: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    /// Install the script for a transfer.
    pub fn set_script(&self, id: TransferId, steps: Vec<ScriptStep>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.transfers.get_mut(&id.raw()) {
            t.script = steps.into();
        }
    }

    /// Let a transfer stalled on [`ScriptStep::Hold`] proceed.
    pub fn release(&self, id: TransferId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.transfers.get_mut(&id.raw()) {
            t.held = false;
        }
    }

    /// Bytes the engine has pulled from the handler so far.
    pub fn uploaded(&self, id: TransferId) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        inner
            .transfers
            .get(&id.raw())
            .map(|t| t.uploaded.clone())
            .unwrap_or_default()
    }

    /// True once the handler signalled end of the upload body.
    pub fn upload_finished(&self, id: TransferId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .transfers
            .get(&id.raw())
            .map(|t| t.upload_eof)
            .unwrap_or(false)
    }

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
                    progress |= t.advance();
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

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportEngine for ScriptedEngine {
    fn create(&self) -> TransferId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.transfers.insert(id, Scripted::new());
        TransferId(id)
    }

    fn configure(&self, id: TransferId, opts: TransferOptions) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let t = inner
            .transfers
            .get_mut(&id.raw())
            .ok_or(EngineError::UnknownTransfer(id))?;
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
            .get_mut(&id.raw())
            .ok_or(EngineError::UnknownTransfer(id))?;
        t.handler = Some(handler);
        Ok(())
    }

    fn set_token(&self, id: TransferId, token: u64) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let t = inner
            .transfers
            .get_mut(&id.raw())
            .ok_or(EngineError::UnknownTransfer(id))?;
        t.token = Some(token);
        Ok(())
    }

    fn add(&self, id: TransferId) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.transfers.contains_key(&id.raw()) {
            return Err(EngineError::UnknownTransfer(id));
        }
        inner.active.retain(|&a| a != id.raw());
        let t = inner.transfers.get_mut(&id.raw()).unwrap();
        t.in_multi = true;
        t.done = None;
        t.completion_posted = false;
        inner.active.push(id.raw());
        Ok(())
    }

    fn remove(&self, id: TransferId, clear_token: bool) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.active.retain(|&a| a != id.raw());
        let t = inner
            .transfers
            .get_mut(&id.raw())
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
                std::thread::sleep(Duration::from_millis(2).min(deadline - now));
            }
        }
    }

    fn completions(&self) -> Vec<Completion> {
        let mut inner = self.inner.lock().unwrap();
        inner.completions.drain(..).collect()
    }

    fn resume(&self, id: TransferId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(t) = inner.transfers.get_mut(&id.raw()) {
            t.paused = false;
        }
    }

    fn info(&self, id: TransferId) -> Option<TransferInfo> {
        let inner = self.inner.lock().unwrap();
        let t = inner.transfers.get(&id.raw())?;
        if t.status == 0 {
            return None;
        }
        Some(TransferInfo {
            status_code: t.status,
            effective_url: t.opts.url.clone(),
            http_version: t.version,
        })
    }

    fn perform(&self, id: TransferId) -> TransferResult {
        loop {
            let done = {
                let mut inner = self.inner.lock().unwrap();
                let Some(t) = inner.transfers.get_mut(&id.raw()) else {
                    return TransferResult::Failed("unknown transfer".into());
                };
                // Blocking path re-polls a paused upload after a bounded
                // sleep instead of waiting on a resume signal.
                t.paused = false;
                while t.done.is_none() && t.advance() {}
                t.done.clone()
            };
            match done {
                Some(result) => return result,
                None => std::thread::sleep(Duration::from_millis(2)),
            }
        }
    }

    fn destroy(&self, id: TransferId) {
        let mut inner = self.inner.lock().unwrap();
        inner.active.retain(|&a| a != id.raw());
        inner.transfers.remove(&id.raw());
    }
}
