use std::fmt;
use std::sync::{Arc, Mutex};

/// Authenticated session. Lives in process memory only and is never renewed.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub aid: String,
    pub display_name: String,
    /// Bearer token for the duplex channel.
    pub token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("aid", &self.aid)
            .field("display_name", &self.display_name)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Volatile holder for the current session, shared between tasks.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    inner: Arc<Mutex<Option<Session>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session: Session) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    pub fn get(&self) -> Option<Session> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Logout: forget the session, keep the identity.
    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
