//! Maintenance commands: `list`, `sweep`, `purge`.

use loop_core::{delete_request_images, FileLockManager, LoopConfig, RequestStore, StorageConfig};

pub fn list(storage: &StorageConfig) -> Result<(), String> {
    let store = RequestStore::new(storage.clone());
    let pending = store.list_pending();
    if pending.is_empty() {
        println!("No pending requests");
        return Ok(());
    }

    for request in pending {
        let answered = if store.completed_exists(&request.id) {
            " (answered)"
        } else {
            ""
        };
        let created = request
            .created_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}{}  {}  {}",
            request.id,
            request.status,
            answered,
            created,
            request.project.as_deref().unwrap_or("-")
        );
        if let Some(summary) = request.summary.as_deref().and_then(|s| s.lines().next()) {
            println!("    {}", summary);
        }
    }
    Ok(())
}

pub fn sweep(storage: &StorageConfig, config: &LoopConfig) -> Result<(), String> {
    let manager = FileLockManager::new(storage.clone(), config.stale_lock_max_age());
    let stats = manager.sweep_stale();
    println!(
        "Removed {} request, {} owner, {} legacy locks, {} reclaim guards and {} temp files",
        stats.request_locks_removed,
        stats.owner_locks_removed,
        stats.legacy_locks_removed,
        stats.reclaim_guards_removed,
        stats.temp_files_removed
    );
    for error in &stats.errors {
        tracing::warn!(error = %error, "Sweep error");
    }
    if stats.errors.is_empty() {
        Ok(())
    } else {
        Err(format!("{} files could not be removed", stats.errors.len()))
    }
}

pub fn purge(
    storage: &StorageConfig,
    config: &LoopConfig,
    request_id: &str,
) -> Result<(), String> {
    let store = RequestStore::new(storage.clone());
    store.remove(request_id)?;
    delete_request_images(storage, request_id)?;
    FileLockManager::new(storage.clone(), config.stale_lock_max_age()).release_claim(request_id);
    println!("Purged {}", request_id);
    Ok(())
}
