use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering::SeqCst};

use crate::request::CallbackSlot;

/// Global per-client-session configuration: proxy list, status callback,
/// timeouts, and the async flag inherited by every request opened under
/// it.
pub(crate) struct Session {
    pub id: u64,
    pub async_mode: bool,
    pub agent: Option<String>,
    pub proxies: Mutex<Vec<String>>,
    pub callback: Mutex<CallbackSlot>,
    pub context: Mutex<Option<u64>>,
    pub connect_timeout_ms: AtomicU32,
    pub receive_timeout_ms: AtomicU32,
    pub max_connections: AtomicU32,
    pub secure_protocols: AtomicU32,
}

impl Session {
    pub fn new(
        id: u64,
        async_mode: bool,
        agent: Option<String>,
        proxies: Vec<String>,
        connect_timeout_ms: u32,
        receive_timeout_ms: u32,
    ) -> Self {
        Self {
            id,
            async_mode,
            agent,
            proxies: Mutex::new(proxies),
            callback: Mutex::new(CallbackSlot::default()),
            context: Mutex::new(None),
            connect_timeout_ms: AtomicU32::new(connect_timeout_ms),
            receive_timeout_ms: AtomicU32::new(receive_timeout_ms),
            max_connections: AtomicU32::new(0),
            secure_protocols: AtomicU32::new(0),
        }
    }

    pub fn set_callback(&self, slot: CallbackSlot) -> CallbackSlot {
        std::mem::replace(&mut *self.callback.lock().unwrap(), slot)
    }

    pub fn callback(&self) -> CallbackSlot {
        self.callback.lock().unwrap().clone()
    }

    pub fn connect_timeout_ms(&self) -> u32 {
        self.connect_timeout_ms.load(SeqCst)
    }

    pub fn receive_timeout_ms(&self) -> u32 {
        self.receive_timeout_ms.load(SeqCst)
    }
}

/// Binding of a session to one server:port. Holds only the session id;
/// the session stays independently destroyable and lookups go through
/// the registry.
pub(crate) struct Connection {
    pub id: u64,
    pub session: u64,
    pub server: String,
    pub port: u16,
    pub context: Mutex<Option<u64>>,
}

impl Connection {
    pub fn new(id: u64, session: u64, server: String, port: u16) -> Self {
        Self {
            id,
            session,
            server,
            port,
            context: Mutex::new(None),
        }
    }
}
