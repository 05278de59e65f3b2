//! Session controller: turns the engine's push-style callbacks into a pull-style, cancellable
//! sequence of states that always ends in exactly one terminal state.
//!
//! Each session owns a bounded channel. Engine callbacks push into it without blocking; the
//! consumer pulls with [`Session::next`]. Terminal states go into a single-slot cell rather than
//! the channel, so they cannot be lost to a full buffer and are delivered after everything that
//! was queued before them. The cell is also the single-resolution guard that decides whether the
//! engine's terminal signal or a `cancel()` wins.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

use crate::commit::{mime_type_for, Committer, CommitError, DownloadRef};
use crate::engine::{
    PendingOffer, ReceiveCallback, ReceiveOfferCallback, SendCallback, SessionParams,
    TransferEngine,
};
use crate::gate::PendingTransfer;
use crate::link::TransferCode;
use crate::progress::progress_fraction;

/// Default number of states buffered between engine and consumer.
pub const DEFAULT_STATE_BUFFER: usize = 64;
/// Every flow emits at most three non-progress states before progress starts.
const MIN_STATE_BUFFER: usize = 8;

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Behaviour the controller needs from every flow's state type.
pub trait SessionState: fmt::Debug + Send + 'static {
    fn cancelled() -> Self;
    fn is_progress(&self) -> bool;
    fn is_terminal(&self) -> bool;
}

/// Sender flow: `Idle -> WaitingForCode -> Progress* -> Complete | Error | Cancelled`.
#[derive(Debug, Clone, PartialEq)]
pub enum SendState {
    Idle,
    WaitingForCode(String),
    Progress { sent: u64, total: u64 },
    Complete,
    Error(String),
    Cancelled,
}

impl SendState {
    pub fn fraction(&self) -> Option<f32> {
        match self {
            SendState::Progress { sent, total } => Some(progress_fraction(*sent, *total)),
            SendState::Complete => Some(1.0),
            _ => None,
        }
    }
}

impl SessionState for SendState {
    fn cancelled() -> Self {
        SendState::Cancelled
    }
    fn is_progress(&self) -> bool {
        matches!(self, SendState::Progress { .. })
    }
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            SendState::Complete | SendState::Error(_) | SendState::Cancelled
        )
    }
}

/// What happened to a received file after the transfer itself succeeded.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// No committer configured; the file stays where the engine put it.
    NotRequested,
    Saved(DownloadRef),
    /// Commit failed and was rolled back. The transfer still counts as complete.
    Failed(Arc<CommitError>),
}

/// Auto-accepting receive flow.
#[derive(Debug, Clone)]
pub enum ReceiveState {
    Connecting,
    ReceivedText(String),
    FileStart { name: String, size: u64 },
    FileProgress { received: u64, total: u64 },
    FileComplete { path: PathBuf, saved: CommitOutcome },
    Error(String),
    Cancelled,
}

impl ReceiveState {
    pub fn fraction(&self) -> Option<f32> {
        match self {
            ReceiveState::FileProgress { received, total } => {
                Some(progress_fraction(*received, *total))
            }
            ReceiveState::FileComplete { .. } => Some(1.0),
            _ => None,
        }
    }
}

impl SessionState for ReceiveState {
    fn cancelled() -> Self {
        ReceiveState::Cancelled
    }
    fn is_progress(&self) -> bool {
        matches!(self, ReceiveState::FileProgress { .. })
    }
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReceiveState::ReceivedText(_)
                | ReceiveState::FileComplete { .. }
                | ReceiveState::Error(_)
                | ReceiveState::Cancelled
        )
    }
}

/// Receive flow with an explicit accept/reject decision on file offers.
#[derive(Debug, Clone)]
pub enum ReceiveOfferState {
    Connecting,
    ReceivedText(String),
    FileOffer {
        name: String,
        size: u64,
        transfer: PendingTransfer,
    },
    /// Only after the offer was accepted.
    FileProgress { received: u64, total: u64 },
    FileComplete { path: PathBuf, saved: CommitOutcome },
    Error(String),
    Cancelled,
}

impl ReceiveOfferState {
    pub fn fraction(&self) -> Option<f32> {
        match self {
            ReceiveOfferState::FileProgress { received, total } => {
                Some(progress_fraction(*received, *total))
            }
            ReceiveOfferState::FileComplete { .. } => Some(1.0),
            _ => None,
        }
    }
}

impl SessionState for ReceiveOfferState {
    fn cancelled() -> Self {
        ReceiveOfferState::Cancelled
    }
    fn is_progress(&self) -> bool {
        matches!(self, ReceiveOfferState::FileProgress { .. })
    }
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReceiveOfferState::ReceivedText(_)
                | ReceiveOfferState::FileComplete { .. }
                | ReceiveOfferState::Error(_)
                | ReceiveOfferState::Cancelled
        )
    }
}

/// Type-erased view of a live session, used for last-writer-wins cancellation and by the gate.
pub(crate) trait ActiveSession: Send + Sync {
    fn id(&self) -> u64;
    fn cancel(&self);
    fn is_finished(&self) -> bool;
}

struct Emitter<S> {
    tx: Option<mpsc::Sender<S>>,
    terminal: Option<S>,
    finished: bool,
    cancelled: bool,
    /// A commit is producing the terminal state; cancel no longer replaces it.
    claimed: bool,
    /// `engine.cancel()` has been issued.
    released: bool,
}

pub(crate) struct SessionCore<S> {
    id: u64,
    kind: &'static str,
    engine: Weak<dyn TransferEngine>,
    emitter: Mutex<Emitter<S>>,
    gate: Mutex<Option<PendingTransfer>>,
}

enum GateInstall {
    Installed,
    Occupied,
    Finished,
}

impl<S: SessionState> SessionCore<S> {
    fn new(
        id: u64,
        kind: &'static str,
        engine: Weak<dyn TransferEngine>,
        tx: mpsc::Sender<S>,
    ) -> Self {
        Self {
            id,
            kind,
            engine,
            emitter: Mutex::new(Emitter {
                tx: Some(tx),
                terminal: None,
                finished: false,
                cancelled: false,
                claimed: false,
                released: false,
            }),
            gate: Mutex::new(None),
        }
    }

    /// Queue a non-terminal state. Never blocks; signals after the terminal state are discarded.
    fn emit(&self, state: S) {
        let e = lock(&self.emitter);
        if e.finished || e.claimed {
            debug!(session = self.id, ?state, "discarding signal after terminal state");
            return;
        }
        let Some(tx) = &e.tx else { return };
        match tx.try_send(state) {
            Ok(()) => {}
            Err(TrySendError::Full(state)) if state.is_progress() => {
                trace!(session = self.id, "state buffer full, dropping progress");
            }
            Err(TrySendError::Full(state)) => {
                warn!(session = self.id, ?state, "state buffer full, dropping state");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Record the terminal state. Returns false if the session already ended.
    fn finish(&self, state: S) -> bool {
        {
            let mut e = lock(&self.emitter);
            if e.finished {
                debug!(session = self.id, ?state, "discarding terminal signal, session already ended");
                return false;
            }
            debug!(session = self.id, ?state, "terminal state");
            e.finished = true;
            e.tx = None;
            e.terminal = Some(state);
        }
        // The offer may hold the callback that holds this core.
        let gate = lock(&self.gate).take();
        drop(gate);
        true
    }

    /// Reserve the terminal slot for a result still being produced. After this, `cancel()`
    /// only releases the engine and the caller must `finish`.
    fn claim(&self) -> bool {
        let mut e = lock(&self.emitter);
        if e.finished || e.claimed {
            return false;
        }
        e.claimed = true;
        true
    }

    fn take_terminal(&self) -> Option<S> {
        lock(&self.emitter).terminal.take()
    }

    fn is_cancelled(&self) -> bool {
        lock(&self.emitter).cancelled
    }

    fn install_gate(&self, gate: PendingTransfer) -> GateInstall {
        let e = lock(&self.emitter);
        if e.finished {
            return GateInstall::Finished;
        }
        let mut slot = lock(&self.gate);
        if slot.is_some() {
            return GateInstall::Occupied;
        }
        *slot = Some(gate);
        GateInstall::Installed
    }

    fn gate_accepted(&self) -> bool {
        lock(&self.gate)
            .as_ref()
            .map_or(false, PendingTransfer::is_accepted)
    }

    fn gate_info(&self) -> Option<(String, u64)> {
        lock(&self.gate)
            .as_ref()
            .map(|g| (g.name().to_string(), g.size()))
    }
}

impl<S: SessionState> ActiveSession for SessionCore<S> {
    fn id(&self) -> u64 {
        self.id
    }

    /// Idempotent: only the first call rejects the gate and releases the engine. While a commit
    /// holds the terminal slot the session still ends with the commit's result.
    fn cancel(&self) {
        let committing = {
            let mut e = lock(&self.emitter);
            if e.finished || e.released {
                return;
            }
            e.released = true;
            if !e.claimed {
                e.finished = true;
                e.cancelled = true;
                e.tx = None;
                e.terminal = Some(S::cancelled());
            }
            e.claimed
        };
        if committing {
            info!(session = self.id, kind = self.kind, "cancel during commit, keeping the received file");
        } else {
            info!(session = self.id, kind = self.kind, "session cancelled");
            let gate = lock(&self.gate).take();
            if let Some(gate) = gate {
                if gate.dismiss() {
                    debug!(session = self.id, "unresolved file offer rejected on cancel");
                }
            }
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.cancel();
        }
    }

    fn is_finished(&self) -> bool {
        lock(&self.emitter).finished
    }
}

/// Consumer end of one session.
pub struct Session<S: SessionState> {
    core: Arc<SessionCore<S>>,
    rx: mpsc::Receiver<S>,
}

impl<S: SessionState> Session<S> {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Next state, or `None` once the terminal state has been delivered.
    pub async fn next(&mut self) -> Option<S> {
        if self.core.is_cancelled() {
            self.rx.close();
            return self.core.take_terminal();
        }
        match self.rx.recv().await {
            Some(state) => Some(state),
            None => self.core.take_terminal(),
        }
    }

    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.core.is_finished()
    }

    /// Cloneable handle for cancelling from elsewhere (e.g. a UI button) while this is iterated.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            core: self.core.clone(),
        }
    }
}

impl<S: SessionState> Drop for Session<S> {
    fn drop(&mut self) {
        if !self.core.is_finished() {
            debug!(session = self.core.id, "session dropped before terminal state");
            self.core.cancel();
        }
    }
}

#[derive(Clone)]
pub struct SessionHandle {
    core: Arc<dyn ActiveSession>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.core.id()
    }

    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.core.is_finished()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Operation to start, for hosts that dispatch on a value instead of calling the typed methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    SendText { message: String },
    SendFile { path: PathBuf, name: String },
    Receive { code: TransferCode },
    ReceiveWithAccept { code: TransferCode },
}

pub enum Started {
    Send(Session<SendState>),
    Receive(Session<ReceiveState>),
    ReceiveWithAccept(Session<ReceiveOfferState>),
}

/// Owns one engine and runs at most one session on it at a time.
///
/// Starting a session while another is unresolved cancels the older one first.
pub struct SessionController {
    engine: Arc<dyn TransferEngine>,
    committer: Option<Arc<dyn Committer>>,
    active: Mutex<Option<Arc<dyn ActiveSession>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl SessionController {
    pub fn new(engine: Arc<dyn TransferEngine>) -> Self {
        Self {
            engine,
            committer: None,
            active: Mutex::new(None),
            next_id: AtomicU64::new(0),
            buffer: DEFAULT_STATE_BUFFER,
        }
    }

    /// Commit received files with `committer`; the outcome is reported in `FileComplete`.
    pub fn with_committer(mut self, committer: Arc<dyn Committer>) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn with_buffer(mut self, capacity: usize) -> Self {
        self.buffer = capacity.max(MIN_STATE_BUFFER);
        self
    }

    pub fn start(&self, operation: Operation, params: &SessionParams) -> Started {
        match operation {
            Operation::SendText { message } => Started::Send(self.send_text(&message, params)),
            Operation::SendFile { path, name } => {
                Started::Send(self.send_file(&path, &name, params))
            }
            Operation::Receive { code } => Started::Receive(self.receive(&code, params)),
            Operation::ReceiveWithAccept { code } => {
                Started::ReceiveWithAccept(self.receive_with_accept(&code, params))
            }
        }
    }

    pub fn send_text(&self, message: &str, params: &SessionParams) -> Session<SendState> {
        self.launch("send-text", params, SendState::Idle, |engine, core| {
            engine.send_text(message, Arc::new(SendRelay { core }));
        })
    }

    pub fn send_file(&self, path: &Path, name: &str, params: &SessionParams) -> Session<SendState> {
        self.launch("send-file", params, SendState::Idle, |engine, core| {
            engine.send_file(path, name, Arc::new(SendRelay { core }));
        })
    }

    pub fn receive(&self, code: &TransferCode, params: &SessionParams) -> Session<ReceiveState> {
        let committer = self.committer.clone();
        self.launch("receive", params, ReceiveState::Connecting, |engine, core| {
            let relay = ReceiveRelay {
                core,
                committer,
                file: Mutex::new(None),
            };
            engine.receive(code.as_str(), Arc::new(relay));
        })
    }

    pub fn receive_with_accept(
        &self,
        code: &TransferCode,
        params: &SessionParams,
    ) -> Session<ReceiveOfferState> {
        let committer = self.committer.clone();
        self.launch(
            "receive-with-accept",
            params,
            ReceiveOfferState::Connecting,
            |engine, core| {
                engine.receive_with_accept(code.as_str(), Arc::new(OfferRelay { core, committer }));
            },
        )
    }

    /// Cancel the current session, if any. No-op when it already ended.
    pub fn cancel(&self) {
        if let Some(active) = lock(&self.active).as_ref() {
            active.cancel();
        }
    }

    /// True while a session is running and has not reached a terminal state.
    pub fn is_busy(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .map_or(false, |s| !s.is_finished())
    }

    fn launch<S: SessionState>(
        &self,
        kind: &'static str,
        params: &SessionParams,
        initial: S,
        start: impl FnOnce(&dyn TransferEngine, Arc<SessionCore<S>>),
    ) -> Session<S> {
        let mut active = lock(&self.active);
        if let Some(prev) = active.take() {
            if !prev.is_finished() {
                info!(
                    session = prev.id(),
                    "cancelling unresolved session before starting a new one"
                );
                prev.cancel();
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.buffer);
        let core = Arc::new(SessionCore::new(id, kind, Arc::downgrade(&self.engine), tx));
        let erased: Arc<dyn ActiveSession> = core.clone();
        *active = Some(erased);
        core.emit(initial);

        info!(session = id, kind, "session started");
        self.engine.configure(params);
        start(self.engine.as_ref(), core.clone());
        Session { core, rx }
    }
}

fn commit_download(
    committer: Option<&dyn Committer>,
    session: u64,
    name: &str,
    path: &Path,
    size: u64,
) -> CommitOutcome {
    let Some(committer) = committer else {
        return CommitOutcome::NotRequested;
    };
    match committer.commit(name, path, mime_type_for(path), size) {
        Ok(saved) => CommitOutcome::Saved(saved),
        Err(e) => {
            warn!(session, error = %e, "file received but commit failed");
            CommitOutcome::Failed(Arc::new(e))
        }
    }
}

fn fallback_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

struct SendRelay {
    core: Arc<SessionCore<SendState>>,
}

impl SendCallback for SendRelay {
    fn on_code(&self, code: &str) {
        self.core.emit(SendState::WaitingForCode(code.to_string()));
    }

    fn on_progress(&self, sent: u64, total: u64) {
        self.core.emit(SendState::Progress { sent, total });
    }

    fn on_complete(&self) {
        self.core.finish(SendState::Complete);
    }

    fn on_error(&self, message: &str) {
        self.core.finish(SendState::Error(message.to_string()));
    }
}

struct ReceiveRelay {
    core: Arc<SessionCore<ReceiveState>>,
    committer: Option<Arc<dyn Committer>>,
    file: Mutex<Option<(String, u64)>>,
}

impl ReceiveCallback for ReceiveRelay {
    fn on_text(&self, text: &str) {
        self.core.finish(ReceiveState::ReceivedText(text.to_string()));
    }

    fn on_file_start(&self, name: &str, size: u64) {
        *lock(&self.file) = Some((name.to_string(), size));
        self.core.emit(ReceiveState::FileStart {
            name: name.to_string(),
            size,
        });
    }

    fn on_file_progress(&self, received: u64, total: u64) {
        self.core.emit(ReceiveState::FileProgress { received, total });
    }

    fn on_file_complete(&self, path: &Path) {
        if !self.core.claim() {
            debug!(session = self.core.id, "file completed after session ended, not committing");
            return;
        }
        let (name, size) = lock(&self.file)
            .take()
            .unwrap_or_else(|| (fallback_name(path), 0));
        let saved = commit_download(self.committer.as_deref(), self.core.id, &name, path, size);
        self.core.finish(ReceiveState::FileComplete {
            path: path.to_path_buf(),
            saved,
        });
    }

    fn on_error(&self, message: &str) {
        self.core.finish(ReceiveState::Error(message.to_string()));
    }
}

struct OfferRelay {
    core: Arc<SessionCore<ReceiveOfferState>>,
    committer: Option<Arc<dyn Committer>>,
}

impl OfferRelay {
    fn accepted(&self, signal: &str) -> bool {
        if self.core.gate_accepted() {
            return true;
        }
        if self.core.is_finished() {
            debug!(session = self.core.id, signal, "discarding signal after terminal state");
        } else {
            warn!(session = self.core.id, signal, "signal for an offer that was not accepted, discarding");
        }
        false
    }
}

impl ReceiveOfferCallback for OfferRelay {
    fn on_text(&self, text: &str) {
        self.core.finish(ReceiveOfferState::ReceivedText(text.to_string()));
    }

    fn on_file_offer(&self, offer: Box<dyn PendingOffer>) {
        let weak = Arc::downgrade(&self.core);
        let session: Weak<dyn ActiveSession> = weak;
        let transfer = PendingTransfer::new(offer, session);
        match self.core.install_gate(transfer.clone()) {
            GateInstall::Installed => {
                info!(
                    session = self.core.id,
                    name = transfer.name(),
                    size = transfer.size(),
                    "file offered"
                );
                self.core.emit(ReceiveOfferState::FileOffer {
                    name: transfer.name().to_string(),
                    size: transfer.size(),
                    transfer,
                });
            }
            GateInstall::Occupied => {
                warn!(session = self.core.id, "second file offer in one session, rejecting");
                transfer.dismiss();
            }
            GateInstall::Finished => {
                debug!(session = self.core.id, "file offer after session ended, rejecting");
                transfer.dismiss();
            }
        }
    }

    fn on_file_progress(&self, received: u64, total: u64) {
        if !self.accepted("progress") {
            return;
        }
        self.core
            .emit(ReceiveOfferState::FileProgress { received, total });
    }

    fn on_file_complete(&self, path: &Path) {
        if !self.accepted("completion") {
            return;
        }
        let (name, size) = self
            .core
            .gate_info()
            .unwrap_or_else(|| (fallback_name(path), 0));
        if !self.core.claim() {
            debug!(session = self.core.id, "file completed after session ended, not committing");
            return;
        }
        let saved = commit_download(self.committer.as_deref(), self.core.id, &name, path, size);
        self.core.finish(ReceiveOfferState::FileComplete {
            path: path.to_path_buf(),
            saved,
        });
    }

    fn on_error(&self, message: &str) {
        self.core.finish(ReceiveOfferState::Error(message.to_string()));
    }
}
