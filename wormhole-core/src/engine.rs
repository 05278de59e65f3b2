//! Transfer engine contract. The engine (rendezvous, PAKE, relay, encryption) lives outside this
//! crate; hosts implement [`TransferEngine`] over it.
//!
//! Every operation returns immediately and reports through its callback from the engine's own
//! execution context. Callbacks may be invoked from any thread.

use std::path::Path;
use std::sync::Arc;

/// Parameters applied to the engine before an operation. `None` means engine default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionParams {
    pub rendezvous_url: Option<String>,
    pub code_length: Option<u32>,
}

impl SessionParams {
    /// Use the link's rendezvous endpoint in place of the configured one, if it has one.
    pub fn with_rendezvous(mut self, rendezvous: Option<&str>) -> Self {
        if let Some(url) = rendezvous.filter(|u| !u.is_empty()) {
            self.rendezvous_url = Some(url.to_string());
        }
        self
    }
}

/// Sender-side notifications.
pub trait SendCallback: Send + Sync {
    /// Code generated; share it with the receiver.
    fn on_code(&self, code: &str);
    fn on_progress(&self, sent: u64, total: u64);
    fn on_complete(&self);
    fn on_error(&self, message: &str);
}

/// Receiver-side notifications for auto-accepting receives.
pub trait ReceiveCallback: Send + Sync {
    fn on_text(&self, text: &str);
    /// File transfer begins; `name` is the name offered by the sender.
    fn on_file_start(&self, name: &str, size: u64);
    fn on_file_progress(&self, received: u64, total: u64);
    /// File fully received and saved at `path` (engine scratch storage).
    fn on_file_complete(&self, path: &Path);
    fn on_error(&self, message: &str);
}

/// Receiver-side notifications when file offers need an explicit decision.
pub trait ReceiveOfferCallback: Send + Sync {
    fn on_text(&self, text: &str);
    /// File offered. Nothing is written until [`PendingOffer::accept`] is called.
    fn on_file_offer(&self, offer: Box<dyn PendingOffer>);
    fn on_file_progress(&self, received: u64, total: u64);
    fn on_file_complete(&self, path: &Path);
    fn on_error(&self, message: &str);
}

/// Engine-side handle of an inbound file offer.
pub trait PendingOffer: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    /// Start receiving; progress and completion arrive on the offer callback.
    fn accept(&self);
    fn reject(&self);
}

/// One engine instance runs at most one operation at a time.
pub trait TransferEngine: Send + Sync {
    fn configure(&self, params: &SessionParams);
    fn send_text(&self, message: &str, callback: Arc<dyn SendCallback>);
    fn send_file(&self, path: &Path, name: &str, callback: Arc<dyn SendCallback>);
    fn receive(&self, code: &str, callback: Arc<dyn ReceiveCallback>);
    fn receive_with_accept(&self, code: &str, callback: Arc<dyn ReceiveOfferCallback>);
    /// Abandon the in-flight operation. Safe to call with nothing in flight.
    fn cancel(&self);
}
