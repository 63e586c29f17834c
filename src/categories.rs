use crate::config::VaultSettings;
use crate::errors::{VaultError, VaultResult};
use crate::fsops::{file_name_of, is_in_trash, is_item_dir, is_not_found, relocate_dir, sorted_subdirs, trash_target, unique_child_path_with};
use crate::items::{ensure_category_dir, read_meta, write_meta};
use crate::models::{CategoryMove, CategoryRef, DeleteMode, DeleteOutcome};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

pub fn validate_category_name(settings: &VaultSettings, parent: &Path, name: &str) -> VaultResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(VaultError::Validation("category name is required".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(VaultError::Validation(format!("invalid category name: {}", name)));
    }
    if name.starts_with('.') {
        return Err(VaultError::Validation(format!("category names cannot be hidden: {}", name)));
    }
    if parent == settings.root && name == settings.trash_dir {
        return Err(VaultError::Validation(format!("'{}' is reserved at the vault root", name)));
    }
    Ok(name.to_string())
}

fn ensure_not_root(settings: &VaultSettings, path: &Path, action: &str) -> VaultResult<()> {
    if path == settings.root {
        return Err(VaultError::Validation(format!("the vault root cannot be {}", action)));
    }
    Ok(())
}

fn category_ref(path: PathBuf) -> VaultResult<CategoryRef> {
    Ok(CategoryRef {
        name: file_name_of(&path)?,
        path,
    })
}

pub fn create_category(settings: &VaultSettings, parent: &Path, name: &str) -> VaultResult<CategoryRef> {
    let name = validate_category_name(settings, parent, name)?;
    ensure_category_dir(settings, parent)?;
    let path = parent.join(&name);
    if path.exists() {
        if path.is_dir() && !is_item_dir(settings, &path) {
            return category_ref(path);
        }
        return Err(VaultError::DuplicateName(format!(
            "an item or file already occupies {}",
            path.to_string_lossy()
        )));
    }
    match fs::create_dir(&path) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => {}
        Err(error) => return Err(error.into()),
    }
    tracing::debug!(path = %path.to_string_lossy(), "created category");
    category_ref(path)
}

pub fn rename_category(settings: &VaultSettings, path: &Path, new_name: &str) -> VaultResult<CategoryRef> {
    ensure_not_root(settings, path, "renamed")?;
    ensure_category_dir(settings, path)?;
    let parent = path
        .parent()
        .ok_or_else(|| VaultError::Validation(format!("category has no parent: {}", path.to_string_lossy())))?;
    let new_name = validate_category_name(settings, parent, new_name)?;
    if file_name_of(path)? == new_name {
        return category_ref(path.to_path_buf());
    }
    let target = parent.join(&new_name);
    if target.exists() {
        return Err(VaultError::DuplicateName(format!(
            "{} already exists",
            target.to_string_lossy()
        )));
    }
    relocate_dir(path, &target)?;
    tracing::info!(from = %path.to_string_lossy(), to = %target.to_string_lossy(), "renamed category");
    category_ref(target)
}

/// Re-parents a whole subtree. Collisions under the new parent get `_moved_N`.
pub fn move_category(settings: &VaultSettings, path: &Path, new_parent: &Path) -> VaultResult<CategoryMove> {
    ensure_not_root(settings, path, "moved")?;
    ensure_category_dir(settings, path)?;
    if new_parent.starts_with(path) {
        return Err(VaultError::MoveIntoDescendant(path.to_string_lossy().to_string()));
    }
    ensure_category_dir(settings, new_parent)?;

    let name = file_name_of(path)?;
    if path.parent() == Some(new_parent) {
        return Ok(CategoryMove {
            name,
            path: path.to_path_buf(),
            moved: false,
        });
    }

    let reserved = settings.trash_path();
    let target = unique_child_path_with(new_parent, &name, "_moved_", |candidate| {
        candidate.exists() || candidate == reserved
    })?;
    relocate_dir(path, &target)?;
    tracing::info!(from = %path.to_string_lossy(), to = %target.to_string_lossy(), "moved category");
    Ok(CategoryMove {
        name: file_name_of(&target)?,
        path: target,
        moved: true,
    })
}

fn item_dirs_under(settings: &VaultSettings, dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = match sorted_subdirs(&current) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(path = %current.to_string_lossy(), error = %error, "skipping unreadable category");
                continue;
            }
        };
        for (name, path) in entries {
            if name.starts_with('.') {
                continue;
            }
            if is_item_dir(settings, &path) {
                found.push(path);
            } else {
                pending.push(path);
            }
        }
    }
    found
}

fn stamp_original_locations(settings: &VaultSettings, original: &Path, trashed: &Path) {
    for item_dir in item_dirs_under(settings, trashed) {
        let Ok(relative) = item_dir.strip_prefix(trashed) else {
            continue;
        };
        let original_dir = original.join(relative);
        let stamped = read_meta(settings, &item_dir).and_then(|mut meta| {
            meta.original_path = Some(original_dir.to_string_lossy().to_string());
            meta.original_category_path = original_dir.parent().map(|parent| parent.to_string_lossy().to_string());
            write_meta(settings, &item_dir, &meta)
        });
        if let Err(error) = stamped {
            tracing::warn!(path = %item_dir.to_string_lossy(), error = %error, "failed to record original location");
        }
    }
}

pub fn delete_category(
    settings: &VaultSettings,
    path: &Path,
    mode: DeleteMode,
    now: DateTime<Utc>,
) -> VaultResult<DeleteOutcome> {
    ensure_not_root(settings, path, "deleted")?;
    if path == settings.trash_path() {
        return Err(VaultError::Validation("the trash itself cannot be deleted".to_string()));
    }
    if !path.exists() {
        tracing::debug!(path = %path.to_string_lossy(), "category delete target already gone");
        return Ok(DeleteOutcome::Missing);
    }
    if is_item_dir(settings, path) {
        return Err(VaultError::Validation(format!("not a category: {}", path.to_string_lossy())));
    }

    match mode {
        DeleteMode::Soft => {
            if is_in_trash(settings, path) {
                return Err(VaultError::Validation(format!(
                    "category is already in the trash: {}",
                    path.to_string_lossy()
                )));
            }
            let trash = settings.trash_path();
            fs::create_dir_all(&trash)?;
            let target = trash_target(&trash, &file_name_of(path)?, now);
            match relocate_dir(path, &target) {
                Ok(_) => {}
                Err(error) if is_not_found(&error) => return Ok(DeleteOutcome::Missing),
                Err(error) => return Err(error.into()),
            }
            stamp_original_locations(settings, path, &target);
            tracing::info!(from = %path.to_string_lossy(), to = %target.to_string_lossy(), "moved category to trash");
            Ok(DeleteOutcome::Trashed(target))
        }
        DeleteMode::Hard => match fs::remove_dir_all(path) {
            Ok(()) => {
                tracing::info!(path = %path.to_string_lossy(), "permanently deleted category");
                Ok(DeleteOutcome::Removed)
            }
            Err(error) if is_not_found(&error) => Ok(DeleteOutcome::Missing),
            Err(error) => Err(error.into()),
        },
    }
}
