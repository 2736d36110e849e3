//! # loop-core
//!
//! Filesystem rendezvous between a command-line agent that needs a human
//! decision and the review surfaces (editor windows, terminals) that ask for it.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Clients can wrap with async if needed.
//! - **Filesystem only**: The shared directory is the transport; create-exclusive
//!   file creation is the only cross-process synchronization primitive.
//! - **At most one dispatch**: A request reaches at most one handler across all
//!   listeners, and one listener owns a whole conversation.
//! - **Graceful degradation**: Malformed records and failed lock operations are
//!   logged and skipped, never fatal to a poll tick.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use loop_core::{LoopConfig, RequestPoller, ShutdownHandle, StorageConfig, StorageScope};
//!
//! let storage = StorageConfig::resolve(&StorageScope::Home)?;
//! let config = LoopConfig::load(&storage.config_file())?;
//! let mut poller = RequestPoller::new(storage, &config, my_handler);
//! poller.run(&ShutdownHandle::default());
//! ```

pub mod config;
pub mod correlator;
pub mod error;
pub mod lock;
pub mod poller;
pub mod producer;
pub mod requests;
pub mod response;
pub mod storage;
pub mod types;

pub use config::LoopConfig;
pub use correlator::DialogCorrelator;
pub use error::{LoopError, Result};
pub use lock::{ClaimKey, FileLockManager, Holder, Lock, LockRecord, SweepStats};
pub use poller::{
    HandlerError, HandlerOutcome, ProjectAffinity, RequestFilter, RequestHandler, RequestPoller,
    ShutdownHandle, TickReport,
};
pub use producer::Producer;
pub use requests::{delete_request_images, save_data_url_image, RequestStore};
pub use response::ResponseWriter;
pub use storage::{validate_request_id, StorageConfig, StorageScope};
pub use types::*;
