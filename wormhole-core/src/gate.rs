//! Pending transfer: the receiver's one-shot decision on an inbound file offer.
//!
//! The first of `accept`/`reject` wins; later calls return `false` and do nothing. Rejecting
//! also ends the owning session with `Cancelled`. A decision made after the session ended is
//! ignored, so the engine never sees an accept for a session nobody is listening to.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use crate::engine::PendingOffer;
use crate::session::{lock, ActiveSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected,
}

#[derive(Clone)]
pub struct PendingTransfer {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    size: u64,
    decision: Mutex<Option<Decision>>,
    offer: Box<dyn PendingOffer>,
    session: Weak<dyn ActiveSession>,
}

impl PendingTransfer {
    pub(crate) fn new(offer: Box<dyn PendingOffer>, session: Weak<dyn ActiveSession>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: offer.name().to_string(),
                size: offer.size(),
                decision: Mutex::new(None),
                offer,
                session,
            }),
        }
    }

    /// Name offered by the sender. Not sanitized.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn decision(&self) -> Option<Decision> {
        *lock(&self.inner.decision)
    }

    pub fn is_accepted(&self) -> bool {
        self.decision() == Some(Decision::Accepted)
    }

    /// Start receiving the file. Returns whether this call made the decision.
    pub fn accept(&self) -> bool {
        let live = self
            .inner
            .session
            .upgrade()
            .map_or(false, |s| !s.is_finished());
        if !live {
            debug!(name = %self.inner.name, "accept after session ended, ignoring");
            return false;
        }
        if !self.resolve(Decision::Accepted) {
            return false;
        }
        info!(name = %self.inner.name, size = self.inner.size, "file offer accepted");
        self.inner.offer.accept();
        true
    }

    /// Decline the file and end the session as cancelled.
    pub fn reject(&self) -> bool {
        if !self.resolve(Decision::Rejected) {
            return false;
        }
        info!(name = %self.inner.name, "file offer rejected");
        self.inner.offer.reject();
        if let Some(session) = self.inner.session.upgrade() {
            session.cancel();
        }
        true
    }

    /// Reject without touching the session; used when the session itself is ending.
    pub(crate) fn dismiss(&self) -> bool {
        if !self.resolve(Decision::Rejected) {
            return false;
        }
        self.inner.offer.reject();
        true
    }

    fn resolve(&self, decision: Decision) -> bool {
        let mut slot = lock(&self.inner.decision);
        if slot.is_some() {
            return false;
        }
        *slot = Some(decision);
        true
    }
}

impl fmt::Debug for PendingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransfer")
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("decision", &self.decision())
            .finish()
    }
}
