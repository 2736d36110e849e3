//! Request poller: discovers pending requests, claims them and hands each one
//! to a single handler.
//!
//! # Per-request flow
//!
//! ```text
//! pending file ──► processed? ──yes──► skip (deduped)
//!                     │no
//!                     ▼
//!               still pending? ──no──► skip (settled)
//!                     │yes
//!                     ▼
//!               filter accepts? ──no──► skip (left for other listeners)
//!                     │yes
//!                     ▼
//!               owner claim ──fail──► skip this tick
//!                     ▼
//!               request claim ──fail──► skip this tick
//!                     ▼
//!               mark processed ─► handler ──err──► unmark, release both claims
//!                                    │ok
//!                                    ▼
//!                          claims stay until the response is written
//! ```
//!
//! Dispatch within a tick is sequential: the handler returns before the next
//! request is looked at, so the processed-set needs no locking. Several
//! pollers (in one process or many) may share a directory; only the claims
//! coordinate them.

mod filter;
mod processed;

pub use filter::{normalize_path_for_matching, ProjectAffinity};
pub use processed::ProcessedSet;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::LoopConfig;
use crate::lock::{ClaimKey, FileLockManager, Lock, SweepStats};
use crate::requests::RequestStore;
use crate::response::ResponseWriter;
use crate::storage::StorageConfig;
use crate::types::{AskRequest, FeedbackResponse, Request};

/// Upper bound on one sleep slice, so shutdown is noticed promptly.
const SHUTDOWN_CHECK_SLICE: Duration = Duration::from_millis(100);

/// Error raised by a handler. Causes the claim to be rolled back.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
        }
    }
}

/// What a handler did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Shown to a human; the answer arrives later through the response writer.
    Presented,
    /// Answered synchronously; the poller writes the response itself.
    Answered(FeedbackResponse),
}

/// The presentation surface. The poller knows nothing else about it.
pub trait RequestHandler {
    fn handle(&mut self, request: &AskRequest) -> Result<HandlerOutcome, HandlerError>;
}

impl<F> RequestHandler for F
where
    F: FnMut(&AskRequest) -> Result<HandlerOutcome, HandlerError>,
{
    fn handle(&mut self, request: &AskRequest) -> Result<HandlerOutcome, HandlerError> {
        self(request)
    }
}

/// Decides whether this listener should consider a request at all.
pub type RequestFilter = Box<dyn Fn(&Request) -> bool + Send>;

/// Cloneable stop switch for [`RequestPoller::run`].
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Ids handed to the handler successfully, in dispatch order.
    pub dispatched: Vec<String>,
    /// Subset of `dispatched` answered synchronously.
    pub answered: usize,
    pub deduped: usize,
    /// Not pending anymore, or already has a completed record.
    pub settled: usize,
    pub filtered: usize,
    pub owner_busy: usize,
    pub request_busy: usize,
    pub failed: usize,
    pub sweep: Option<SweepStats>,
}

pub struct RequestPoller<H, L = FileLockManager> {
    store: RequestStore,
    writer: ResponseWriter,
    locks: L,
    handler: H,
    filter: Option<RequestFilter>,
    processed: ProcessedSet,
    interval: Duration,
    sweep_interval: Duration,
    last_sweep: Option<Instant>,
}

impl<H: RequestHandler> RequestPoller<H, FileLockManager> {
    /// A poller backed by file locks under `storage`.
    pub fn new(storage: StorageConfig, config: &LoopConfig, handler: H) -> Self {
        let locks = FileLockManager::new(storage.clone(), config.stale_lock_max_age());
        Self::with_locks(storage, config, locks, handler)
    }
}

impl<H: RequestHandler, L: Lock> RequestPoller<H, L> {
    pub fn with_locks(storage: StorageConfig, config: &LoopConfig, locks: L, handler: H) -> Self {
        RequestPoller {
            store: RequestStore::new(storage.clone()),
            writer: ResponseWriter::new(storage),
            locks,
            handler,
            filter: None,
            processed: ProcessedSet::new(config.processed_capacity),
            interval: config.poll_interval(),
            sweep_interval: config.sweep_interval(),
            last_sweep: None,
        }
    }

    pub fn with_filter(mut self, filter: RequestFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    pub fn locks(&self) -> &L {
        &self.locks
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Polls until `shutdown` fires, then forgets processed ids.
    /// In-flight handler calls are never interrupted.
    pub fn run(&mut self, shutdown: &ShutdownHandle) {
        info!(
            pending_dir = %self.store.storage().pending_dir().display(),
            interval_ms = self.interval.as_millis() as u64,
            "Listening for requests"
        );
        if let Err(err) = self.store.storage().ensure_dirs() {
            warn!(error = %err, "Failed to create request directories");
        }

        while !shutdown.is_triggered() {
            let report = self.tick();
            if !report.dispatched.is_empty() || report.failed > 0 {
                debug!(
                    dispatched = report.dispatched.len(),
                    failed = report.failed,
                    "Poll tick finished"
                );
            }
            self.sleep_until_next_tick(shutdown);
        }

        self.processed.clear();
        info!("Stopped listening");
    }

    /// One scan of the pending directory.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        if self.sweep_due() {
            report.sweep = Some(self.locks.sweep_stale());
            self.last_sweep = Some(Instant::now());
        }

        for request in self.store.list_pending() {
            self.process(request, &mut report);
        }
        report
    }

    fn sweep_due(&self) -> bool {
        self.last_sweep
            .map_or(true, |at| at.elapsed() >= self.sweep_interval)
    }

    fn process(&mut self, request: Request, report: &mut TickReport) {
        let request_id = request.id.clone();

        if self.processed.contains(&request_id) {
            report.deduped += 1;
            return;
        }

        if !request.is_pending() || self.store.completed_exists(&request_id) {
            report.settled += 1;
            return;
        }

        if let Some(filter) = &self.filter {
            if !filter(&request) {
                report.filtered += 1;
                return;
            }
        }

        let owner_key = request.owner_key().map(ClaimKey::Owner);
        if let Some(key) = &owner_key {
            if !self.locks.try_acquire(key) {
                debug!(request_id = %request_id, owner = ?key, "Conversation owned by another listener");
                report.owner_busy += 1;
                return;
            }
        }

        let request_key = ClaimKey::Request(request_id.clone());
        if !self.locks.try_acquire(&request_key) {
            debug!(request_id = %request_id, "Request claimed by another listener");
            report.request_busy += 1;
            return;
        }

        // Marked before the handler runs so a re-scan cannot dispatch it twice.
        for evicted in self.processed.insert(&request_id) {
            debug!(request_id = %evicted, "Evicted from processed set");
        }

        info!(request_id = %request_id, "Dispatching request");
        let ask = AskRequest::from(&request);
        let result = match self.handler.handle(&ask) {
            Ok(HandlerOutcome::Presented) => Ok(false),
            Ok(HandlerOutcome::Answered(response)) => self
                .writer
                .submit(
                    &request_id,
                    &response.content,
                    Some(response.images.as_slice()),
                    Some(&response.metadata),
                )
                .map(|_| true)
                .map_err(|err| HandlerError::new(err.to_string())),
            Err(err) => Err(err),
        };

        match result {
            Ok(answered) => {
                if answered {
                    self.locks.release(&request_key);
                    report.answered += 1;
                }
                report.dispatched.push(request_id);
            }
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "Handler failed; releasing claims");
                self.processed.remove(&request_id);
                self.locks.release(&request_key);
                if let Some(key) = &owner_key {
                    self.locks.release(key);
                }
                report.failed += 1;
            }
        }
    }

    fn sleep_until_next_tick(&self, shutdown: &ShutdownHandle) {
        let deadline = Instant::now() + self.interval;
        while !shutdown.is_triggered() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SHUTDOWN_CHECK_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestStatus;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct Recording {
        seen: Vec<AskRequest>,
        fail: HashSet<String>,
        answer: Option<String>,
    }

    impl RequestHandler for Recording {
        fn handle(&mut self, request: &AskRequest) -> Result<HandlerOutcome, HandlerError> {
            self.seen.push(request.clone());
            if self.fail.contains(&request.request_id) {
                return Err(HandlerError::new("panel could not be created"));
            }
            Ok(match &self.answer {
                Some(content) => HandlerOutcome::Answered(FeedbackResponse::text(content.clone())),
                None => HandlerOutcome::Presented,
            })
        }
    }

    fn setup() -> (TempDir, StorageConfig) {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        storage.ensure_dirs().unwrap();
        (temp, storage)
    }

    fn write_pending(storage: &StorageConfig, id: &str, json: &str) {
        std::fs::write(storage.pending_file(id), json).unwrap();
    }

    fn poller(storage: &StorageConfig, handler: Recording) -> RequestPoller<Recording> {
        RequestPoller::new(storage.clone(), &LoopConfig::default(), handler)
    }

    fn ids(handler: &Recording) -> Vec<&str> {
        handler.seen.iter().map(|r| r.request_id.as_str()).collect()
    }

    #[test]
    fn test_dispatches_once_per_process() {
        let (_temp, storage) = setup();
        write_pending(&storage, "r1", r#"{"id":"r1","summary":"hi"}"#);
        let mut poller = poller(&storage, Recording::default());

        assert_eq!(poller.tick().dispatched, vec!["r1".to_string()]);
        let second = poller.tick();
        assert!(second.dispatched.is_empty());
        assert_eq!(second.deduped, 1);
        assert_eq!(ids(poller.handler()), vec!["r1"]);
    }

    #[test]
    fn test_handler_failure_rolls_back() {
        let (_temp, storage) = setup();
        write_pending(&storage, "r1", r#"{"id":"r1","sessionId":"abc"}"#);
        let mut handler = Recording::default();
        handler.fail.insert("r1".to_string());
        let mut poller = poller(&storage, handler);

        let report = poller.tick();
        assert_eq!(report.failed, 1);
        assert!(!poller.processed().contains("r1"));
        assert!(!storage.request_lock_file("r1").exists());
        assert!(!storage.owner_lock_file("session:abc").exists());

        poller.handler_mut().fail.clear();
        assert_eq!(poller.tick().dispatched, vec!["r1".to_string()]);
        assert!(storage.request_lock_file("r1").exists());
        assert!(storage.owner_lock_file("session:abc").exists());
    }

    #[test]
    fn test_filter_rejection_does_not_mark_processed() {
        let (_temp, storage) = setup();
        write_pending(&storage, "r1", r#"{"id":"r1","project":"/elsewhere"}"#);
        let affinity = ProjectAffinity::new([Path::new("/work/app")]);
        let mut poller = poller(&storage, Recording::default())
            .with_filter(Box::new(move |request: &Request| affinity.accepts(request)));

        let report = poller.tick();
        assert_eq!(report.filtered, 1);
        assert!(!poller.processed().contains("r1"));
        assert!(!storage.request_lock_file("r1").exists());
    }

    #[test]
    fn test_settled_requests_are_skipped() {
        let (_temp, storage) = setup();
        write_pending(&storage, "done", r#"{"id":"done","status":"completed"}"#);
        write_pending(&storage, "answered", r#"{"id":"answered"}"#);
        std::fs::write(
            storage.completed_file("answered"),
            r#"{"id":"answered","status":"completed","content":"ok"}"#,
        )
        .unwrap();
        let mut poller = poller(&storage, Recording::default());

        let report = poller.tick();
        assert_eq!(report.settled, 2);
        assert!(report.dispatched.is_empty());
    }

    #[test]
    fn test_answered_outcome_writes_response_and_releases_request_claim() {
        let (_temp, storage) = setup();
        write_pending(&storage, "r1", r#"{"id":"r1","agentId":"a1"}"#);
        let handler = Recording {
            answer: Some("[end]".to_string()),
            ..Default::default()
        };
        let mut poller = poller(&storage, handler);

        let report = poller.tick();
        assert_eq!(report.answered, 1);
        let completed = RequestStore::new(storage.clone()).read_completed("r1").unwrap();
        assert_eq!(completed.status, RequestStatus::Ended);
        assert!(!storage.request_lock_file("r1").exists());
        assert!(storage.owner_lock_file("agent:a1").exists());
    }

    #[test]
    fn test_malformed_file_does_not_halt_batch() {
        let (_temp, storage) = setup();
        write_pending(&storage, "bad", "{{{{");
        write_pending(&storage, "r2", r#"{"id":"r2"}"#);
        let mut poller = poller(&storage, Recording::default());

        assert_eq!(poller.tick().dispatched, vec!["r2".to_string()]);
    }

    #[test]
    fn test_first_tick_sweeps_then_waits_for_interval() {
        let (_temp, storage) = setup();
        let mut poller = poller(&storage, Recording::default());

        assert!(poller.tick().sweep.is_some());
        assert!(poller.tick().sweep.is_none());
    }

    #[test]
    fn test_closure_handler() {
        let (_temp, storage) = setup();
        write_pending(&storage, "r1", r#"{"id":"r1"}"#);
        let seen = RefCell::new(Vec::new());
        let handler = |request: &AskRequest| -> Result<HandlerOutcome, HandlerError> {
            seen.borrow_mut().push(request.request_id.clone());
            Ok(HandlerOutcome::Presented)
        };
        let mut poller = RequestPoller::new(storage.clone(), &LoopConfig::default(), handler);

        poller.tick();
        drop(poller);
        assert_eq!(seen.into_inner(), vec!["r1".to_string()]);
    }

    #[test]
    fn test_run_stops_on_shutdown_and_clears_processed() {
        let (_temp, storage) = setup();
        write_pending(&storage, "r1", r#"{"id":"r1"}"#);
        let config = LoopConfig {
            poll_interval_ms: 10,
            ..LoopConfig::default()
        };
        let mut poller = RequestPoller::new(storage.clone(), &config, Recording::default());
        let shutdown = ShutdownHandle::default();

        let trigger = shutdown.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.trigger();
        });
        poller.run(&shutdown);
        stopper.join().unwrap();

        assert_eq!(ids(poller.handler()), vec!["r1"]);
        assert!(poller.processed().is_empty());
    }
}
