//! In-process engine double: records what it was asked to do and hands the registered callback
//! back to the test, which then plays the engine's side of the conversation.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{
    PendingOffer, ReceiveCallback, ReceiveOfferCallback, SendCallback, SessionParams,
    TransferEngine,
};

#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    configured: Mutex<Vec<SessionParams>>,
    cancels: AtomicUsize,
    send: Mutex<Option<Arc<dyn SendCallback>>>,
    receive: Mutex<Option<Arc<dyn ReceiveCallback>>>,
    offer: Mutex<Option<Arc<dyn ReceiveOfferCallback>>>,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn configured(&self) -> Vec<SessionParams> {
        self.configured.lock().unwrap().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn send_callback(&self) -> Arc<dyn SendCallback> {
        self.send.lock().unwrap().clone().expect("no send in flight")
    }

    pub fn receive_callback(&self) -> Arc<dyn ReceiveCallback> {
        self.receive.lock().unwrap().clone().expect("no receive in flight")
    }

    pub fn offer_callback(&self) -> Arc<dyn ReceiveOfferCallback> {
        self.offer.lock().unwrap().clone().expect("no receive-with-accept in flight")
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl TransferEngine for FakeEngine {
    fn configure(&self, params: &SessionParams) {
        self.configured.lock().unwrap().push(params.clone());
    }

    fn send_text(&self, message: &str, callback: Arc<dyn SendCallback>) {
        self.record(format!("send_text:{message}"));
        *self.send.lock().unwrap() = Some(callback);
    }

    fn send_file(&self, _path: &Path, name: &str, callback: Arc<dyn SendCallback>) {
        self.record(format!("send_file:{name}"));
        *self.send.lock().unwrap() = Some(callback);
    }

    fn receive(&self, code: &str, callback: Arc<dyn ReceiveCallback>) {
        self.record(format!("receive:{code}"));
        *self.receive.lock().unwrap() = Some(callback);
    }

    fn receive_with_accept(&self, code: &str, callback: Arc<dyn ReceiveOfferCallback>) {
        self.record(format!("receive_with_accept:{code}"));
        *self.offer.lock().unwrap() = Some(callback);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Offer that counts decisions; clones share counters.
#[derive(Clone)]
pub struct FakeOffer {
    name: String,
    size: u64,
    accepted: Arc<AtomicUsize>,
    rejected: Arc<AtomicUsize>,
}

impl FakeOffer {
    pub fn new(name: &str, size: u64) -> Self {
        Self {
            name: name.to_string(),
            size,
            accepted: Arc::default(),
            rejected: Arc::default(),
        }
    }

    pub fn accepts(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn rejects(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl PendingOffer for FakeOffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn accept(&self) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    fn reject(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }
}
