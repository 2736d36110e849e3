//! Image attachments for responses.
//!
//! Review surfaces hand over pasted images as `data:image/<ext>;base64,...`
//! URLs. They are decoded into `<root>/requests/images/<id>/` and the
//! response carries the resulting file paths instead of the payload.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::Utc;
use fs_err as fs;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;

use crate::error::{LoopError, Result};
use crate::storage::{validate_request_id, StorageConfig};

static DATA_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:image/(\w+);base64,(.+)$").expect("valid data url regex"));

/// Decodes a data URL and stores it as `image_<millis>.<ext>`.
pub fn save_data_url_image(
    storage: &StorageConfig,
    request_id: &str,
    data_url: &str,
) -> Result<PathBuf> {
    validate_request_id(request_id)?;

    let captures = DATA_URL
        .captures(data_url.trim())
        .ok_or_else(|| LoopError::InvalidImageData("not a base64 image data URL".to_string()))?;
    let ext = match &captures[1] {
        "jpeg" => "jpg".to_string(),
        other => other.to_ascii_lowercase(),
    };
    let bytes = BASE64_STANDARD
        .decode(captures[2].as_bytes())
        .map_err(|e| LoopError::InvalidImageData(e.to_string()))?;

    let dir = storage.request_images_dir(request_id);
    storage.ensure(&dir)?;

    let mut millis = Utc::now().timestamp_millis();
    let mut path = dir.join(format!("image_{}.{}", millis, ext));
    // Two pastes within the same millisecond must not overwrite each other.
    while path.exists() {
        millis += 1;
        path = dir.join(format!("image_{}.{}", millis, ext));
    }

    fs::write(&path, bytes).map_err(|e| LoopError::io("Failed to write image", e))?;
    Ok(path)
}

/// Removes a request's image directory plus legacy `<id>*` files stored
/// directly under the images root.
pub fn delete_request_images(storage: &StorageConfig, request_id: &str) -> Result<()> {
    validate_request_id(request_id)?;

    let dir = storage.request_images_dir(request_id);
    match fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(LoopError::io("Failed to remove image directory", err)),
    }

    let entries = match fs::read_dir(storage.images_dir()) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(LoopError::io("Failed to list images", err)),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let legacy = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(request_id));
        if legacy && path.is_file() {
            if let Err(err) = fs::remove_file(&path) {
                warn!(error = %err, "Failed to remove legacy image");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PNG_URL: &str = "data:image/png;base64,iVBORw0KGgo=";

    #[test]
    fn test_save_data_url_image() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());

        let path = save_data_url_image(&storage, "r1", PNG_URL).unwrap();
        assert!(path.starts_with(storage.request_images_dir("r1")));
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(
            std::fs::read(&path).unwrap(),
            vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']
        );
    }

    #[test]
    fn test_jpeg_extension_is_shortened() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());

        let path = save_data_url_image(&storage, "r1", "data:image/jpeg;base64,/9j/").unwrap();
        assert_eq!(path.extension().unwrap(), "jpg");
    }

    #[test]
    fn test_same_millisecond_pastes_do_not_collide() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());

        let first = save_data_url_image(&storage, "r1", PNG_URL).unwrap();
        let second = save_data_url_image(&storage, "r1", PNG_URL).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_rejects_non_image_data() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());

        assert!(matches!(
            save_data_url_image(&storage, "r1", "data:text/plain;base64,aGk="),
            Err(LoopError::InvalidImageData(_))
        ));
        assert!(matches!(
            save_data_url_image(&storage, "r1", "data:image/png;base64,***"),
            Err(LoopError::InvalidImageData(_))
        ));
    }

    #[test]
    fn test_delete_request_images_includes_legacy_files() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        save_data_url_image(&storage, "r1", PNG_URL).unwrap();
        std::fs::write(storage.images_dir().join("r1_legacy.png"), b"x").unwrap();
        std::fs::write(storage.images_dir().join("r2_other.png"), b"x").unwrap();

        delete_request_images(&storage, "r1").unwrap();

        assert!(!storage.request_images_dir("r1").exists());
        assert!(!storage.images_dir().join("r1_legacy.png").exists());
        assert!(storage.images_dir().join("r2_other.png").exists());
    }

    #[test]
    fn test_delete_missing_images_is_ok() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        delete_request_images(&storage, "r1").unwrap();
    }
}
