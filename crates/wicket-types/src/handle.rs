use std::fmt;

/// Kind of object an opaque handle refers to.
///
/// The kind travels with the handle so close/dispatch can resolve the
/// concrete object in O(1) instead of probing every registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Session,
    Connection,
    Request,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Connection => write!(f, "connection"),
            Self::Request => write!(f, "request"),
        }
    }
}

/// Opaque reference to a session, connection, or request.
///
/// Handles are plain copyable tokens; liveness is validated against the
/// owning registry on every call, so a stale handle fails with
/// [`Error::InvalidHandle`](crate::Error::InvalidHandle) rather than
/// touching freed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: u64,
    kind: HandleKind,
}

impl Handle {
    pub fn new(kind: HandleKind, id: u64) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_carries_kind_and_id() {
        let h = Handle::new(HandleKind::Request, 42);
        assert_eq!(h.id(), 42);
        assert_eq!(h.kind(), HandleKind::Request);
        assert_eq!(h.to_string(), "request#42");
    }
}
