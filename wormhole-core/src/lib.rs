//! Wormhole transfer client core.
//! Engine-agnostic: the host supplies a [`TransferEngine`]; this crate resolves links, runs one
//! session at a time on that engine and commits received files into durable storage.

pub mod commit;
pub mod config;
pub mod engine;
pub mod ffi;
pub mod gate;
pub mod link;
pub mod progress;
pub mod session;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

pub use commit::{
    mime_type_for, CommitError, CommitNotifier, Committer, DownloadCommitter, DownloadRef,
    DownloadStore,
};
pub use config::{Config, ConfigError};
pub use engine::{
    PendingOffer, ReceiveCallback, ReceiveOfferCallback, SendCallback, SessionParams,
    TransferEngine,
};
pub use gate::{Decision, PendingTransfer};
pub use link::{parse_link, ParsedLink, TransferCode};
pub use progress::{format_bytes, format_progress, progress_fraction};
pub use session::{
    CommitOutcome, Operation, ReceiveOfferState, ReceiveState, SendState, Session,
    SessionController, SessionHandle, SessionState, Started,
};
pub use storage::DownloadsDir;
