use crate::config::VaultSettings;
use crate::errors::VaultResult;
use crate::fsops::{is_item_dir, is_not_found, sorted_subdirs, strip_trash_token};
use crate::models::{TrashCleanup, TrashEntry};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::Path;

pub fn list_trash(settings: &VaultSettings) -> VaultResult<Vec<TrashEntry>> {
    let trash = settings.trash_path();
    let entries = match sorted_subdirs(&trash) {
        Ok(entries) => entries,
        Err(error) if is_not_found(&error) => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };
    Ok(entries
        .into_iter()
        .filter(|(name, _)| !name.starts_with('.'))
        .map(|(name, path)| {
            let (original_name, deleted_at) = strip_trash_token(&name);
            TrashEntry {
                is_item: is_item_dir(settings, &path),
                name,
                original_name,
                path,
                deleted_at,
            }
        })
        .collect())
}

fn deleted_at(entry: &TrashEntry) -> Option<DateTime<Utc>> {
    entry.deleted_at.or_else(|| modified_at(&entry.path))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

pub fn cleanup_trash(settings: &VaultSettings, now: DateTime<Utc>) -> VaultResult<TrashCleanup> {
    let cutoff = now - Duration::days(i64::from(settings.trash_retention_days));
    let mut cleanup = TrashCleanup::default();
    for entry in list_trash(settings)? {
        let Some(deleted_at) = deleted_at(&entry) else {
            continue;
        };
        if deleted_at >= cutoff {
            continue;
        }
        match fs::remove_dir_all(&entry.path) {
            Ok(()) => {
                cleanup.deleted_count += 1;
                cleanup.deleted.push(entry.name);
            }
            Err(error) if is_not_found(&error) => {}
            Err(error) => {
                tracing::warn!(path = %entry.path.to_string_lossy(), error = %error, "failed to purge trash entry");
            }
        }
    }
    if cleanup.deleted_count > 0 {
        tracing::info!(count = cleanup.deleted_count, "purged expired trash entries");
    }
    Ok(cleanup)
}
