//! Request records on disk.
//!
//! - [`record`]: lenient wire format and normalization
//! - [`store`]: pending/completed record files
//! - [`images`]: image attachments referenced by responses

pub mod images;
pub mod record;
mod store;

pub use images::{delete_request_images, save_data_url_image};
pub use record::{parse_request, RecordError};
pub use store::RequestStore;
