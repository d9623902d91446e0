use parking_lot::RwLock;

/// Identifies the viewer and session every core operation runs against.
/// Passed explicitly into controllers instead of living in ambient globals.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub viewer_id: String,
    /// Whether this participant drives the shared run state. Authorization is
    /// enforced by the backend; this flag only gates local behavior such as
    /// auto-advance.
    pub is_host: bool,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, viewer_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            viewer_id: viewer_id.into(),
            is_host: false,
        }
    }

    pub fn as_host(mut self) -> Self {
        self.is_host = true;
        self
    }
}

#[derive(Debug, Default)]
struct ActiveInner {
    generation: u64,
    session_id: Option<String>,
}

/// Tracks which session is currently active for one client.
///
/// Every async operation captures a [`SessionStamp`] up front and compares it
/// on completion; a mismatch means the session was switched or torn down
/// mid-flight and the result must be discarded. This replaces cooperative
/// cancellation: in-flight work is never interrupted, only ignored.
#[derive(Debug, Default)]
pub struct ActiveSession {
    inner: RwLock<ActiveInner>,
}

/// A point-in-time capture of the active session identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStamp {
    generation: u64,
    session_id: String,
}

impl SessionStamp {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl ActiveSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session_id` the active session, superseding any previous one,
    /// and return the stamp operations against it should carry.
    pub fn activate(&self, session_id: &str) -> SessionStamp {
        let mut inner = self.inner.write();
        inner.generation += 1;
        inner.session_id = Some(session_id.to_string());
        SessionStamp {
            generation: inner.generation,
            session_id: session_id.to_string(),
        }
    }

    /// Tear down without activating a successor. Outstanding completions
    /// stamped against the old session will be discarded.
    pub fn deactivate(&self) {
        let mut inner = self.inner.write();
        inner.generation += 1;
        inner.session_id = None;
    }

    pub fn is_current(&self, stamp: &SessionStamp) -> bool {
        let inner = self.inner.read();
        inner.generation == stamp.generation
            && inner.session_id.as_deref() == Some(stamp.session_id.as_str())
    }
}
