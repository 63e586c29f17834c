use crate::config::{RestorePolicy, VaultSettings};
use crate::errors::{VaultError, VaultResult};
use crate::fsops::{
    atomic_write, file_name_of, is_in_trash, is_item_dir, is_not_found, read_json_file, relocate_dir,
    slugify, strip_trash_token, trash_target, unique_child_path, write_json_file,
};
use crate::models::{normalize_tags, CreateOptions, DeleteOutcome, Item, ItemMeta};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub fn category_pointer(settings: &VaultSettings, item_dir: &Path) -> (String, String) {
    let Some(parent) = item_dir.parent() else {
        return (String::new(), String::new());
    };
    let name = if parent == settings.root {
        String::new()
    } else {
        parent
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    (name, parent.to_string_lossy().to_string())
}

pub fn ensure_category_dir(settings: &VaultSettings, dir: &Path) -> VaultResult<()> {
    if !dir.is_dir() {
        return Err(VaultError::NotFound(format!("category {}", dir.to_string_lossy())));
    }
    if is_in_trash(settings, dir) {
        return Err(VaultError::Validation(format!(
            "category is in the trash: {}",
            dir.to_string_lossy()
        )));
    }
    if is_item_dir(settings, dir) {
        return Err(VaultError::Validation(format!(
            "not a category: {}",
            dir.to_string_lossy()
        )));
    }
    Ok(())
}

pub fn create_item(
    settings: &VaultSettings,
    category: &Path,
    title: &str,
    options: CreateOptions,
) -> VaultResult<Item> {
    let title = title.trim();
    if title.is_empty() {
        return Err(VaultError::Validation("title is required".to_string()));
    }
    ensure_category_dir(settings, category)?;

    let slug = slugify(title, settings.max_slug_len);
    let dir = unique_child_path(category, &slug, "_")?;
    fs::create_dir(&dir)?;

    let now = Utc::now();
    let (category_name, category_path) = category_pointer(settings, &dir);
    let meta = ItemMeta {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        slug: file_name_of(&dir)?,
        created_at: now,
        updated_at: now,
        tags: Vec::new(),
        version: settings.default_version.clone(),
        author: settings.default_author.clone(),
        model_config: settings.default_model_config.clone(),
        is_favorite: false,
        is_pinned: false,
        category: category_name,
        category_path,
        kind: options.kind,
        scheduled_time: options.scheduled_time,
        recurrence: options.recurrence,
        last_notified: None,
        original_path: None,
        original_category_path: None,
    };
    write_meta(settings, &dir, &meta)?;
    atomic_write(&settings.content_path(&dir), b"")?;
    tracing::debug!(id = %meta.id, path = %dir.to_string_lossy(), kind = meta.kind.as_str(), "created item");

    Ok(Item {
        meta,
        content: String::new(),
        path: dir,
    })
}

pub fn read_meta(settings: &VaultSettings, dir: &Path) -> VaultResult<ItemMeta> {
    read_json_file(&settings.meta_path(dir))
}

pub fn write_meta(settings: &VaultSettings, dir: &Path, meta: &ItemMeta) -> VaultResult<()> {
    write_json_file(&settings.meta_path(dir), meta)
}

fn read_content(settings: &VaultSettings, dir: &Path) -> VaultResult<String> {
    match fs::read_to_string(settings.content_path(dir)) {
        Ok(content) => Ok(content),
        Err(error) if is_not_found(&error) => Ok(String::new()),
        Err(error) => Err(error.into()),
    }
}

/// Loads an item. The returned `category`/`category_path` always reflect the
/// real location, even when the sidecar on disk is stale.
pub fn read_item(settings: &VaultSettings, dir: &Path) -> VaultResult<Item> {
    let mut meta = read_meta(settings, dir)?;
    let (category, category_path) = category_pointer(settings, dir);
    meta.category = category;
    meta.category_path = category_path;
    let content = read_content(settings, dir)?;
    Ok(Item {
        meta,
        content,
        path: dir.to_path_buf(),
    })
}

fn bumps_updated_at(current: &ItemMeta, next: &ItemMeta) -> bool {
    let mut left = current.clone();
    let mut right = next.clone();
    for meta in [&mut left, &mut right] {
        meta.is_favorite = false;
        meta.updated_at = current.updated_at;
        meta.category.clear();
        meta.category_path.clear();
    }
    left != right
}

pub fn update_item(settings: &VaultSettings, item: &Item) -> VaultResult<Item> {
    let dir = item.path.as_path();
    let current = read_meta(settings, dir)?;
    if item.meta.id != current.id {
        return Err(VaultError::Validation(format!(
            "item id is immutable: {} != {}",
            item.meta.id, current.id
        )));
    }
    if item.meta.title.trim().is_empty() {
        return Err(VaultError::Validation("title is required".to_string()));
    }

    let mut next = item.meta.clone();
    next.title = next.title.trim().to_string();
    next.slug = current.slug.clone();
    next.created_at = current.created_at;
    next.tags = normalize_tags(&next.tags);
    let (category, category_path) = category_pointer(settings, dir);
    next.category = category;
    next.category_path = category_path;

    let current_content = read_content(settings, dir)?;
    let content_changed = current_content != item.content;
    next.updated_at = if content_changed || bumps_updated_at(&current, &next) {
        Utc::now()
    } else {
        current.updated_at
    };

    write_meta(settings, dir, &next)?;
    if content_changed {
        atomic_write(&settings.content_path(dir), item.content.as_bytes())?;
    }
    tracing::debug!(id = %next.id, path = %dir.to_string_lossy(), "updated item");

    Ok(Item {
        meta: next,
        content: item.content.clone(),
        path: dir.to_path_buf(),
    })
}

pub fn soft_delete_item(settings: &VaultSettings, dir: &Path, now: DateTime<Utc>) -> VaultResult<DeleteOutcome> {
    if !dir.exists() {
        tracing::debug!(path = %dir.to_string_lossy(), "soft delete target already gone");
        return Ok(DeleteOutcome::Missing);
    }
    if is_in_trash(settings, dir) {
        return Err(VaultError::Validation(format!(
            "item is already in the trash: {}",
            dir.to_string_lossy()
        )));
    }
    let mut meta = match read_meta(settings, dir) {
        Ok(meta) => meta,
        Err(VaultError::NotFound(_)) if !dir.exists() => return Ok(DeleteOutcome::Missing),
        Err(error) => return Err(error),
    };

    let trash = settings.trash_path();
    fs::create_dir_all(&trash)?;
    let target = trash_target(&trash, &file_name_of(dir)?, now);
    match relocate_dir(dir, &target) {
        Ok(_) => {}
        Err(error) if is_not_found(&error) => return Ok(DeleteOutcome::Missing),
        Err(error) => return Err(error.into()),
    }

    // Stamped after the move; the live sidecar is never rewritten.
    meta.original_path = Some(dir.to_string_lossy().to_string());
    if let Err(error) = write_meta(settings, &target, &meta) {
        tracing::warn!(
            path = %target.to_string_lossy(),
            error = %error,
            "trashed item kept without its original location"
        );
    }
    tracing::info!(id = %meta.id, from = %dir.to_string_lossy(), to = %target.to_string_lossy(), "moved item to trash");
    Ok(DeleteOutcome::Trashed(target))
}

fn restore_destination(settings: &VaultSettings, meta: &ItemMeta) -> VaultResult<PathBuf> {
    if settings.restore_policy == RestorePolicy::OriginalThenFallback {
        let original_parent = meta
            .original_path
            .as_deref()
            .map(Path::new)
            .and_then(Path::parent)
            .filter(|parent| parent.starts_with(&settings.root))
            .filter(|parent| ensure_category_dir(settings, parent).is_ok());
        if let Some(parent) = original_parent {
            return Ok(parent.to_path_buf());
        }
    }
    let fallback = settings.root.join(&settings.fallback_category);
    fs::create_dir_all(&fallback)?;
    Ok(fallback)
}

pub fn restore_item(settings: &VaultSettings, trashed: &Path, now: DateTime<Utc>) -> VaultResult<Option<Item>> {
    if !trashed.exists() {
        tracing::debug!(path = %trashed.to_string_lossy(), "restore target already gone");
        return Ok(None);
    }
    if !is_in_trash(settings, trashed) || trashed == settings.trash_path() {
        return Err(VaultError::Validation(format!(
            "not a trashed entry: {}",
            trashed.to_string_lossy()
        )));
    }
    let mut meta = match read_meta(settings, trashed) {
        Ok(meta) => meta,
        Err(VaultError::NotFound(_)) if !trashed.exists() => return Ok(None),
        Err(VaultError::NotFound(_)) => {
            return Err(VaultError::Validation(format!(
                "only items can be restored: {}",
                trashed.to_string_lossy()
            )));
        }
        Err(error) => return Err(error),
    };

    let (original_name, _) = strip_trash_token(&file_name_of(trashed)?);
    let destination = restore_destination(settings, &meta)?;
    let target = unique_child_path(&destination, &original_name, "_restored_")?;
    match relocate_dir(trashed, &target) {
        Ok(_) => {}
        Err(error) if is_not_found(&error) => return Ok(None),
        Err(error) => return Err(error.into()),
    }

    let (category, category_path) = category_pointer(settings, &target);
    meta.category = category;
    meta.category_path = category_path;
    meta.original_path = None;
    meta.original_category_path = None;
    meta.updated_at = now;
    write_meta(settings, &target, &meta)?;
    tracing::info!(id = %meta.id, to = %target.to_string_lossy(), "restored item from trash");

    let content = read_content(settings, &target)?;
    Ok(Some(Item {
        meta,
        content,
        path: target,
    }))
}

pub fn permanent_delete_item(settings: &VaultSettings, dir: &Path) -> VaultResult<DeleteOutcome> {
    if !dir.exists() {
        return Ok(DeleteOutcome::Missing);
    }
    if !is_item_dir(settings, dir) {
        return Err(VaultError::Validation(format!(
            "not an item: {}",
            dir.to_string_lossy()
        )));
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            tracing::info!(path = %dir.to_string_lossy(), "permanently deleted item");
            Ok(DeleteOutcome::Removed)
        }
        Err(error) if is_not_found(&error) => Ok(DeleteOutcome::Missing),
        Err(error) => Err(error.into()),
    }
}

pub fn move_item(settings: &VaultSettings, dir: &Path, target_category: &Path) -> VaultResult<Item> {
    let meta = read_meta(settings, dir)?;
    ensure_category_dir(settings, target_category)?;
    if dir.parent() == Some(target_category) {
        return read_item(settings, dir);
    }
    let target = unique_child_path(target_category, &file_name_of(dir)?, "_moved_")?;
    relocate_dir(dir, &target)?;
    repair_category_pointer(settings, &target)?;
    tracing::info!(id = %meta.id, from = %dir.to_string_lossy(), to = %target.to_string_lossy(), "moved item");
    read_item(settings, &target)
}

pub fn repair_category_pointer(settings: &VaultSettings, dir: &Path) -> VaultResult<bool> {
    let mut meta = read_meta(settings, dir)?;
    let (category, category_path) = category_pointer(settings, dir);
    if meta.category == category && meta.category_path == category_path {
        return Ok(false);
    }
    meta.category = category;
    meta.category_path = category_path;
    write_meta(settings, dir, &meta)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemKind, Recurrence, RecurrenceKind};

    fn temp_vault() -> (tempfile::TempDir, VaultSettings) {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = VaultSettings::for_root(dir.path().join("vault"));
        fs::create_dir_all(settings.root.join("A")).expect("seed category");
        (dir, settings)
    }

    #[test]
    fn create_resolves_slug_collisions() {
        let (_guard, settings) = temp_vault();
        let category = settings.root.join("A");
        let first = create_item(&settings, &category, "Note", CreateOptions::note()).expect("first");
        let second = create_item(&settings, &category, "Note", CreateOptions::note()).expect("second");

        assert_eq!(first.dir_name(), "note");
        assert_eq!(second.dir_name(), "note_1");
        assert_eq!(second.meta.slug, "note_1");
        assert_ne!(first.meta.id, second.meta.id);
        assert_eq!(first.meta.category, "A");
        assert!(settings.meta_path(&first.path).is_file());
        assert_eq!(fs::read_to_string(settings.content_path(&first.path)).expect("content"), "");
    }

    #[test]
    fn create_requires_title_and_category() {
        let (_guard, settings) = temp_vault();
        let error = create_item(&settings, &settings.root.join("A"), "   ", CreateOptions::note())
            .expect_err("blank title");
        assert!(matches!(error, VaultError::Validation(_)));

        let error = create_item(&settings, &settings.root.join("Nope"), "Note", CreateOptions::note())
            .expect_err("missing category");
        assert!(matches!(error, VaultError::NotFound(_)));
    }

    #[test]
    fn create_task_keeps_schedule() {
        let (_guard, settings) = temp_vault();
        let recurrence = Recurrence {
            kind: RecurrenceKind::Daily,
            week_days: None,
            month_days: None,
            time: "08:30".to_string(),
            interval_minutes: None,
            enabled: true,
        };
        let item = create_item(
            &settings,
            &settings.root.join("A"),
            "Standup",
            CreateOptions::recurring_task(recurrence.clone()),
        )
        .expect("task");
        let stored = read_item(&settings, &item.path).expect("read");
        assert_eq!(stored.meta.kind, ItemKind::Task);
        assert_eq!(stored.meta.recurrence, Some(recurrence));
        assert!(stored.meta.scheduled_time.is_none());
    }

    #[test]
    fn read_missing_sidecar_is_not_found() {
        let (_guard, settings) = temp_vault();
        let error = read_item(&settings, &settings.root.join("A/ghost")).expect_err("missing");
        assert!(error.to_string().starts_with("NOT_FOUND"));
    }

    #[test]
    fn favorite_toggle_does_not_bump_updated_at() {
        let (_guard, settings) = temp_vault();
        let mut item = create_item(&settings, &settings.root.join("A"), "Fav", CreateOptions::note()).expect("create");
        let created_updated_at = item.meta.updated_at;

        item.meta.is_favorite = true;
        let toggled = update_item(&settings, &item).expect("toggle");
        assert!(toggled.meta.is_favorite);
        assert_eq!(toggled.meta.updated_at, created_updated_at);

        let mut edited = toggled.clone();
        edited.content = "body".to_string();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let edited = update_item(&settings, &edited).expect("edit");
        assert!(edited.meta.updated_at > created_updated_at);
        assert_eq!(edited.meta.created_at, item.meta.created_at);
    }

    #[test]
    fn update_rejects_changed_id() {
        let (_guard, settings) = temp_vault();
        let mut item = create_item(&settings, &settings.root.join("A"), "Fixed", CreateOptions::note()).expect("create");
        item.meta.id = "other".to_string();
        assert!(matches!(update_item(&settings, &item), Err(VaultError::Validation(_))));
    }

    #[test]
    fn soft_delete_and_restore_round_trip() {
        let (_guard, settings) = temp_vault();
        let mut item = create_item(&settings, &settings.root.join("A"), "Keep me", CreateOptions::note()).expect("create");
        item.content = "exact bytes\n\twith tabs".to_string();
        let item = update_item(&settings, &item).expect("content");

        let outcome = soft_delete_item(&settings, &item.path, Utc::now()).expect("soft delete");
        let DeleteOutcome::Trashed(trashed) = outcome else {
            panic!("expected trashed outcome");
        };
        assert!(!item.path.exists());
        let trashed_meta = read_meta(&settings, &trashed).expect("trashed meta");
        assert_eq!(trashed_meta.original_path, Some(item.path.to_string_lossy().to_string()));

        let restored = restore_item(&settings, &trashed, Utc::now())
            .expect("restore")
            .expect("restored item");
        assert_eq!(restored.path, settings.root.join("Restored").join("keep-me"));
        assert_eq!(restored.meta.id, item.meta.id);
        assert_eq!(restored.meta.title, "Keep me");
        assert_eq!(restored.content, item.content);
        assert!(restored.meta.original_path.is_none());
        assert_eq!(restored.meta.category, "Restored");
    }

    #[test]
    fn restore_prefers_original_parent_when_configured() {
        let (_guard, mut settings) = temp_vault();
        settings.restore_policy = RestorePolicy::OriginalThenFallback;
        let item = create_item(&settings, &settings.root.join("A"), "Back home", CreateOptions::note()).expect("create");
        let DeleteOutcome::Trashed(trashed) = soft_delete_item(&settings, &item.path, Utc::now()).expect("delete") else {
            panic!("expected trashed outcome");
        };
        create_item(&settings, &settings.root.join("A"), "Back home", CreateOptions::note()).expect("occupy name");

        let restored = restore_item(&settings, &trashed, Utc::now())
            .expect("restore")
            .expect("restored item");
        assert_eq!(restored.path, settings.root.join("A").join("back-home_restored_1"));
    }

    #[test]
    fn repeated_deletes_are_benign() {
        let (_guard, settings) = temp_vault();
        let item = create_item(&settings, &settings.root.join("A"), "Twice", CreateOptions::note()).expect("create");
        assert!(matches!(
            soft_delete_item(&settings, &item.path, Utc::now()).expect("first"),
            DeleteOutcome::Trashed(_)
        ));
        assert_eq!(
            soft_delete_item(&settings, &item.path, Utc::now()).expect("second"),
            DeleteOutcome::Missing
        );
        assert_eq!(
            permanent_delete_item(&settings, &item.path).expect("gone"),
            DeleteOutcome::Missing
        );
        assert!(restore_item(&settings, &settings.root.join("trash/none~1700000000000"), Utc::now())
            .expect("gone")
            .is_none());
    }

    #[test]
    fn failed_soft_delete_leaves_live_sidecar_unstamped() {
        let (_guard, settings) = temp_vault();
        let item = create_item(&settings, &settings.root.join("A"), "Stuck", CreateOptions::note()).expect("create");
        fs::write(settings.trash_path(), "not a directory").expect("block trash");

        assert!(soft_delete_item(&settings, &item.path, Utc::now()).is_err());
        assert!(item.path.is_dir());
        let live = read_meta(&settings, &item.path).expect("live meta");
        assert!(live.original_path.is_none());
    }

    #[test]
    fn permanent_delete_refuses_categories() {
        let (_guard, settings) = temp_vault();
        let error = permanent_delete_item(&settings, &settings.root.join("A")).expect_err("category");
        assert!(matches!(error, VaultError::Validation(_)));
    }

    #[test]
    fn move_item_rewrites_pointer_and_suffixes_collisions() {
        let (_guard, settings) = temp_vault();
        fs::create_dir_all(settings.root.join("B")).expect("seed");
        let moving = create_item(&settings, &settings.root.join("A"), "Clash", CreateOptions::note()).expect("a");
        create_item(&settings, &settings.root.join("B"), "Clash", CreateOptions::note()).expect("b");

        let moved = move_item(&settings, &moving.path, &settings.root.join("B")).expect("move");
        assert_eq!(moved.dir_name(), "clash_moved_1");
        assert_eq!(moved.meta.id, moving.meta.id);
        let on_disk = read_meta(&settings, &moved.path).expect("meta");
        assert_eq!(on_disk.category, "B");
    }

    #[test]
    fn repair_rewrites_stale_pointer_once() {
        let (_guard, settings) = temp_vault();
        let item = create_item(&settings, &settings.root.join("A"), "Stale", CreateOptions::note()).expect("create");
        let mut meta = read_meta(&settings, &item.path).expect("meta");
        meta.category = "Old".to_string();
        write_meta(&settings, &item.path, &meta).expect("stale");

        assert!(repair_category_pointer(&settings, &item.path).expect("repair"));
        assert!(!repair_category_pointer(&settings, &item.path).expect("already fine"));
    }
}
