//! Response writer: persists a human's answer as the completed record.

use chrono::Utc;
use tracing::info;

use crate::error::Result;
use crate::requests::RequestStore;
use crate::storage::{validate_request_id, StorageConfig};
use crate::types::{FeedbackMetadata, Request, RequestStatus};

#[derive(Debug, Clone)]
pub struct ResponseWriter {
    store: RequestStore,
}

impl ResponseWriter {
    pub fn new(storage: StorageConfig) -> Self {
        ResponseWriter {
            store: RequestStore::new(storage),
        }
    }

    /// Writes `completed/<id>.json` and returns the record as written.
    ///
    /// The base record is the pending one, else an earlier completed one, else
    /// a stub, so a producer that already deleted its pending file still gets
    /// its answer. `images` are stored paths; `None` stores none. Submitting
    /// the same answer twice yields the same record apart from `timestamp`.
    pub fn submit(
        &self,
        request_id: &str,
        content: &str,
        images: Option<&[String]>,
        metadata: Option<&FeedbackMetadata>,
    ) -> Result<Request> {
        validate_request_id(request_id)?;

        let mut record = self
            .store
            .read_pending(request_id)
            .or_else(|| self.store.read_completed(request_id))
            .unwrap_or_else(|| Request::stub(request_id));

        record.id = request_id.to_string();
        record.status = RequestStatus::from_content(content);
        record.content = Some(content.to_string());
        record.images = images.map(<[String]>::to_vec).unwrap_or_default();
        if let Some(metadata) = metadata {
            record.merge_metadata(metadata);
        }
        record.timestamp = Some(Utc::now());

        self.store.write_completed(&record)?;
        info!(
            request_id,
            status = %record.status,
            images = record.images.len(),
            "Response written"
        );
        Ok(record)
    }
}
