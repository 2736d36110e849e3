//! Producer side of the rendezvous: publish a request, wait for its answer.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use ulid::Ulid;

use crate::error::Result;
use crate::requests::RequestStore;
use crate::storage::StorageConfig;
use crate::types::{NewRequest, Request};

#[derive(Debug, Clone)]
pub struct Producer {
    store: RequestStore,
    poll_interval: Duration,
}

impl Producer {
    pub fn new(storage: StorageConfig, poll_interval: Duration) -> Self {
        Producer {
            store: RequestStore::new(storage),
            poll_interval,
        }
    }

    /// Writes a fresh pending record with a new ULID id.
    pub fn publish(&self, new: NewRequest) -> Result<Request> {
        let mut request = Request::stub(&Ulid::new().to_string().to_lowercase());
        request.project = non_blank(new.project);
        request.summary = non_blank(new.summary);
        request.session_id = non_blank(new.session_id);
        request.agent_id = non_blank(new.agent_id);
        request.model = non_blank(new.model);
        request.title = non_blank(new.title);
        request.options = new
            .options
            .into_iter()
            .map(|option| option.trim().to_string())
            .filter(|option| !option.is_empty())
            .collect();
        request.created_at = Some(Utc::now());

        self.store.write_pending(&request)?;
        info!(request_id = %request.id, "Published request");
        Ok(request)
    }

    /// Polls for the completed record. `Ok(None)` on timeout or when `cancel`
    /// is set; `timeout = None`, or one too large to represent, waits
    /// indefinitely.
    pub fn wait_for_response(
        &self,
        request_id: &str,
        timeout: Option<Duration>,
        cancel: &AtomicBool,
    ) -> Result<Option<Request>> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        loop {
            if let Some(completed) = self.store.read_completed(request_id) {
                return Ok(Some(completed));
            }
            if cancel.load(Ordering::SeqCst) {
                debug!(request_id, "Wait cancelled");
                return Ok(None);
            }

            let mut nap = self.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!(request_id, "Wait timed out");
                    return Ok(None);
                }
                nap = nap.min(deadline - now);
            }
            thread::sleep(nap);
        }
    }

    /// Deletes the pending and completed records. Images are kept.
    pub fn cleanup(&self, request_id: &str) -> Result<()> {
        self.store.remove(request_id)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseWriter;
    use crate::types::RequestStatus;
    use tempfile::tempdir;

    fn producer() -> (tempfile::TempDir, StorageConfig, Producer) {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let producer = Producer::new(storage.clone(), Duration::from_millis(10));
        (temp, storage, producer)
    }

    #[test]
    fn test_publish_writes_pending_record() {
        let (_temp, storage, producer) = producer();
        let request = producer
            .publish(NewRequest {
                project: Some("/proj".to_string()),
                summary: Some("pick one".to_string()),
                session_id: Some("  ".to_string()),
                options: vec!["a".to_string(), " ".to_string(), "b ".to_string()],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.session_id, None);
        assert_eq!(request.options, vec!["a", "b"]);
        assert!(request.created_at.is_some());

        let on_disk = RequestStore::new(storage).read_pending(&request.id).unwrap();
        assert_eq!(on_disk.summary.as_deref(), Some("pick one"));
        assert_eq!(on_disk.created_at, request.created_at);
    }

    #[test]
    fn test_publish_assigns_unique_ids() {
        let (_temp, _storage, producer) = producer();
        let a = producer.publish(NewRequest::default()).unwrap();
        let b = producer.publish(NewRequest::default()).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_wait_returns_completed_record() {
        let (_temp, storage, producer) = producer();
        let request = producer.publish(NewRequest::default()).unwrap();

        let id = request.id.clone();
        let responder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            ResponseWriter::new(storage).submit(&id, "done", None, None).unwrap();
        });

        let cancel = AtomicBool::new(false);
        let answer = producer
            .wait_for_response(&request.id, Some(Duration::from_secs(5)), &cancel)
            .unwrap()
            .unwrap();
        responder.join().unwrap();
        assert_eq!(answer.content.as_deref(), Some("done"));
    }

    #[test]
    fn test_wait_times_out_and_honours_cancel() {
        let (_temp, _storage, producer) = producer();
        let cancel = AtomicBool::new(false);
        assert!(producer
            .wait_for_response("nobody", Some(Duration::from_millis(30)), &cancel)
            .unwrap()
            .is_none());

        cancel.store(true, Ordering::SeqCst);
        assert!(producer
            .wait_for_response("nobody", None, &cancel)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unrepresentable_timeout_waits_for_answer() {
        let (_temp, storage, producer) = producer();
        let request = producer.publish(NewRequest::default()).unwrap();

        let id = request.id.clone();
        let responder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            ResponseWriter::new(storage).submit(&id, "late", None, None).unwrap();
        });

        let cancel = AtomicBool::new(false);
        let answer = producer
            .wait_for_response(&request.id, Some(Duration::from_secs(u64::MAX)), &cancel)
            .unwrap()
            .unwrap();
        responder.join().unwrap();
        assert_eq!(answer.content.as_deref(), Some("late"));

        cancel.store(true, Ordering::SeqCst);
        assert!(producer
            .wait_for_response("nobody", Some(Duration::MAX), &cancel)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_cleanup_removes_both_records() {
        let (_temp, storage, producer) = producer();
        let request = producer.publish(NewRequest::default()).unwrap();
        ResponseWriter::new(storage.clone())
            .submit(&request.id, "x", None, None)
            .unwrap();

        producer.cleanup(&request.id).unwrap();
        assert!(!storage.pending_file(&request.id).exists());
        assert!(!storage.completed_file(&request.id).exists());
    }
}
