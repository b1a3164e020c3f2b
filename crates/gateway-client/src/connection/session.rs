//! Session state
//!
//! Holds what a resume needs: the session id, the resume URL, and the last sequence number.

use parking_lot::Mutex;
use url::Url;

/// Identity handed out by `READY`
#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionIdentity {
    session_id: String,
    resume_url: Url,
}

/// Everything needed to send a Resume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeInfo {
    pub session_id: String,
    pub resume_url: Url,
    pub sequence: u64,
}

/// Resumability data for the current session
///
/// The sequence number lives behind its own lock: it is written on every received
/// message and read by every heartbeat, and must not contend with the identity.
#[derive(Debug, Default)]
pub struct SessionState {
    identity: Mutex<Option<SessionIdentity>>,
    sequence: Mutex<Option<u64>>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session id, resume URL, and sequence are all known
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.resume_info().is_some()
    }

    /// Snapshot of the resume data, if complete
    #[must_use]
    pub fn resume_info(&self) -> Option<ResumeInfo> {
        let identity = self.identity.lock().clone()?;
        let sequence = (*self.sequence.lock())?;
        Some(ResumeInfo {
            session_id: identity.session_id,
            resume_url: identity.resume_url,
            sequence,
        })
    }

    /// Record the session handed out by `READY`
    pub fn establish(&self, session_id: impl Into<String>, resume_url: Url) {
        *self.identity.lock() = Some(SessionIdentity {
            session_id: session_id.into(),
            resume_url,
        });
    }

    /// Forget the session entirely
    pub fn clear(&self) {
        *self.identity.lock() = None;
        *self.sequence.lock() = None;
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.identity.lock().as_ref().map(|i| i.session_id.clone())
    }

    #[must_use]
    pub fn resume_url(&self) -> Option<Url> {
        self.identity.lock().as_ref().map(|i| i.resume_url.clone())
    }

    /// Store the sequence of a received message
    ///
    /// Last write wins; the wire order is the only order.
    pub fn record_sequence(&self, sequence: u64) {
        *self.sequence.lock() = Some(sequence);
    }

    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        *self.sequence.lock()
    }
}
