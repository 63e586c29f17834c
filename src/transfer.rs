//! Batch export and import of items. Export reads every item fresh from disk;
//! import runs record by record on top of the vault's item and category
//! operations, so conflict checks see items created earlier in the batch.

use crate::errors::{VaultError, VaultResult};
use crate::fsops::relative_slash_path;
use crate::items::read_item;
use crate::models::{
    normalize_tags, ConflictStrategy, CreateOptions, ExportBundle, ExportMode, ImportDetail, ImportReport,
    ImportStatus, Item, TransferRecord,
};
use crate::vault::Vault;
use std::path::{Path, PathBuf};

fn to_record(vault: &Vault, item: Item, mode: ExportMode) -> TransferRecord {
    let category_path = match mode {
        ExportMode::Flat => None,
        ExportMode::PreserveStructure => Some(
            item.path
                .parent()
                .map(|parent| relative_slash_path(vault.root(), parent))
                .unwrap_or_default(),
        ),
    };
    TransferRecord {
        title: item.meta.title,
        tags: item.meta.tags,
        kind: item.meta.kind,
        content: item.content,
        scheduled_time: item.meta.scheduled_time,
        recurrence: item.meta.recurrence,
        is_favorite: Some(item.meta.is_favorite),
        author: Some(item.meta.author),
        version: Some(item.meta.version),
        model_config: Some(item.meta.model_config),
        category_path,
    }
}

fn export_paths(vault: &Vault, targets: Vec<(String, Option<PathBuf>)>, mode: ExportMode) -> VaultResult<ExportBundle> {
    let mut bundle = ExportBundle::default();
    for (id, path) in targets {
        let Some(path) = path else {
            bundle.not_found.push(id);
            continue;
        };
        match read_item(vault.settings(), &path) {
            Ok(item) => bundle.records.push(to_record(vault, item, mode)),
            Err(VaultError::NotFound(_)) => {
                tracing::warn!(id = %id, path = %path.to_string_lossy(), "indexed item missing on disk; not exported");
                bundle.not_found.push(id);
            }
            Err(error) => return Err(error),
        }
    }
    bundle.total = bundle.records.len();
    Ok(bundle)
}

pub fn export_items(vault: &Vault, ids: &[String], mode: ExportMode) -> VaultResult<ExportBundle> {
    let targets = ids
        .iter()
        .map(|id| (id.clone(), vault.find_item_path(id)))
        .collect();
    export_paths(vault, targets, mode)
}

pub fn export_category(vault: &Vault, category: &Path, mode: ExportMode) -> VaultResult<ExportBundle> {
    if category != vault.root() && vault.index().node(category).is_none() {
        return Err(VaultError::NotFound(format!("category {}", category.to_string_lossy())));
    }
    let targets = vault
        .index()
        .items_under(category)
        .into_iter()
        .map(|item| (item.meta.id.clone(), Some(item.path.clone())))
        .collect();
    export_paths(vault, targets, mode)
}

fn ensure_category_chain(vault: &mut Vault, relative: &str) -> VaultResult<PathBuf> {
    let mut current = vault.root().to_path_buf();
    for segment in relative.split('/').map(str::trim).filter(|segment| !segment.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(VaultError::Validation(format!(
                "category_path must not contain '{}': {}",
                segment, relative
            )));
        }
        current = vault.create_category(&current, segment)?.path;
    }
    Ok(current)
}

fn title_taken(vault: &Vault, category: &Path, title: &str) -> bool {
    vault
        .index()
        .items_in(category)
        .iter()
        .any(|item| item.meta.title.trim() == title)
}

fn find_by_title(vault: &Vault, category: &Path, title: &str) -> Option<Item> {
    vault
        .index()
        .items_in(category)
        .into_iter()
        .find(|item| item.meta.title.trim() == title)
        .cloned()
}

fn disambiguated_title(vault: &Vault, category: &Path, title: &str) -> String {
    let mut counter = 1usize;
    loop {
        let candidate = format!("{}_X{}", title, counter);
        if !title_taken(vault, category, &candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn apply_record(item: &mut Item, record: &TransferRecord, title: &str) {
    let meta = &mut item.meta;
    meta.title = title.to_string();
    meta.tags = normalize_tags(&record.tags);
    meta.kind = record.kind;
    meta.scheduled_time = record.scheduled_time;
    meta.recurrence = record.recurrence.clone();
    if let Some(is_favorite) = record.is_favorite {
        meta.is_favorite = is_favorite;
    }
    if let Some(author) = &record.author {
        meta.author = author.clone();
    }
    if let Some(version) = &record.version {
        meta.version = version.clone();
    }
    if let Some(model_config) = &record.model_config {
        meta.model_config = model_config.clone();
    }
    item.content = record.content.clone();
}

fn success(index: usize, item: &Item) -> ImportDetail {
    ImportDetail {
        index,
        title: item.meta.title.clone(),
        status: ImportStatus::Success,
        error: None,
        reason: None,
        id: Some(item.meta.id.clone()),
        path: Some(item.path.clone()),
    }
}

fn import_one(
    vault: &mut Vault,
    index: usize,
    raw: &serde_json::Value,
    default_category: Option<&Path>,
    strategy: ConflictStrategy,
) -> VaultResult<ImportDetail> {
    let record: TransferRecord = serde_json::from_value(raw.clone())
        .map_err(|error| VaultError::Validation(format!("malformed record: {}", error)))?;
    let title = record.title.trim();
    if title.is_empty() {
        return Err(VaultError::Validation("title is required".to_string()));
    }
    let destination = match record.category_path.as_deref() {
        Some(relative) => ensure_category_chain(vault, relative)?,
        None => match default_category {
            Some(category) => category.to_path_buf(),
            None => {
                let import_category = vault.settings().import_category.clone();
                ensure_category_chain(vault, &import_category)?
            }
        },
    };
    if record.scheduled_time.is_some() && record.recurrence.is_some() {
        tracing::warn!(index, title = %title, "record sets both scheduled_time and recurrence; importing as given");
    }

    let existing = find_by_title(vault, &destination, title);
    let final_title = match (existing, strategy) {
        (Some(existing), ConflictStrategy::Skip) => {
            return Ok(ImportDetail {
                index,
                title: title.to_string(),
                status: ImportStatus::Skipped,
                error: None,
                reason: Some(format!("an item titled '{}' already exists", title)),
                id: Some(existing.meta.id),
                path: Some(existing.path),
            });
        }
        (Some(mut existing), ConflictStrategy::Overwrite) => {
            apply_record(&mut existing, &record, title);
            let updated = vault.update_item(&existing)?;
            return Ok(success(index, &updated));
        }
        (Some(_), ConflictStrategy::Rename) => disambiguated_title(vault, &destination, title),
        (None, _) => title.to_string(),
    };

    let options = CreateOptions {
        kind: record.kind,
        scheduled_time: record.scheduled_time,
        recurrence: record.recurrence.clone(),
    };
    let mut created = vault.create_item(&destination, &final_title, options)?;
    apply_record(&mut created, &record, &final_title);
    let stored = vault.update_item(&created)?;
    Ok(success(index, &stored))
}

pub fn import_records(
    vault: &mut Vault,
    records: &[serde_json::Value],
    default_category: Option<&Path>,
    strategy: ConflictStrategy,
) -> ImportReport {
    let mut report = ImportReport {
        total: records.len(),
        ..ImportReport::default()
    };
    for (index, raw) in records.iter().enumerate() {
        match import_one(vault, index, raw, default_category, strategy) {
            Ok(detail) => report.record(detail),
            Err(error) => {
                let title = raw
                    .get("title")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                tracing::warn!(index, title = %title, error = %error, "import record failed");
                report.record(ImportDetail {
                    index,
                    title,
                    status: ImportStatus::Failed,
                    error: Some(error.to_string()),
                    reason: None,
                    id: None,
                    path: None,
                });
            }
        }
    }
    tracing::info!(
        total = report.total,
        success = report.success,
        failed = report.failed,
        skipped = report.skipped,
        "import finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultSettings;
    use crate::models::ItemKind;
    use serde_json::json;

    fn temp_vault() -> (tempfile::TempDir, Vault) {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = Vault::open(VaultSettings::for_root(dir.path().join("vault"))).expect("open vault");
        (dir, vault)
    }

    #[test]
    fn malformed_records_do_not_abort_the_batch() {
        let (_guard, mut vault) = temp_vault();
        let records = vec![
            json!({"title": "Good", "content": "ok"}),
            json!({"title": "   "}),
            json!({"title": "Bad kind", "kind": "PAGE"}),
            json!("not an object"),
            json!({"title": "Also good", "type": "TASK", "scheduled_time": "2026-05-01T09:00:00Z"}),
        ];
        let report = vault.import(&records, None, ConflictStrategy::Rename).expect("import");

        assert_eq!(report.total, 5);
        assert_eq!(report.success, 2);
        assert_eq!(report.failed, 3);
        assert_eq!(report.details[2].status, ImportStatus::Failed);
        assert!(report.details[2].error.as_deref().unwrap_or_default().starts_with("VALIDATION"));
        assert_eq!(report.details[3].title, "");

        let task_path = report.details[4].path.clone().expect("path");
        let task = vault.read_item(&task_path).expect("task");
        assert_eq!(task.meta.kind, ItemKind::Task);
        assert!(task.meta.scheduled_time.is_some());
        assert_eq!(task.meta.category, "Imported");
    }

    #[test]
    fn overwrite_replaces_in_place() {
        let (_guard, mut vault) = temp_vault();
        let first = vault
            .import(&[json!({"title": "Doc", "content": "v1"})], None, ConflictStrategy::Rename)
            .expect("first");
        let second = vault
            .import(
                &[json!({"title": "Doc", "content": "v2", "tags": ["x"]})],
                None,
                ConflictStrategy::Overwrite,
            )
            .expect("second");

        assert_eq!(second.success, 1);
        assert_eq!(first.details[0].id, second.details[0].id);
        let stored = vault
            .read_item(second.details[0].path.as_deref().expect("path"))
            .expect("read");
        assert_eq!(stored.content, "v2");
        assert_eq!(stored.meta.tags, vec!["x"]);
        assert_eq!(vault.index().items().len(), 1);
    }

    #[test]
    fn conflicts_see_items_from_the_same_batch() {
        let (_guard, mut vault) = temp_vault();
        let records = vec![json!({"title": "Same"}), json!({"title": "Same"})];
        let report = vault.import(&records, None, ConflictStrategy::Skip).expect("import");
        assert_eq!(report.success, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.details[1].reason.is_some());
    }

    #[test]
    fn conflict_matching_is_case_sensitive() {
        let (_guard, mut vault) = temp_vault();
        let records = vec![json!({"title": "Case"}), json!({"title": "case"})];
        let report = vault.import(&records, None, ConflictStrategy::Skip).expect("import");
        assert_eq!(report.success, 2);
    }

    #[test]
    fn empty_category_path_targets_the_root() {
        let (_guard, mut vault) = temp_vault();
        let report = vault
            .import(&[json!({"title": "Top", "category_path": ""})], None, ConflictStrategy::Rename)
            .expect("import");
        let path = report.details[0].path.clone().expect("path");
        assert_eq!(path.parent(), Some(vault.root()));
    }

    #[test]
    fn dot_segments_in_category_path_fail_the_record() {
        let (_guard, mut vault) = temp_vault();
        let report = vault
            .import(&[json!({"title": "Sneaky", "category_path": "A/../../out"})], None, ConflictStrategy::Rename)
            .expect("import");
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn export_reports_unknown_ids() {
        let (_guard, mut vault) = temp_vault();
        let report = vault
            .import(&[json!({"title": "Known", "author": "Ada", "is_favorite": true})], None, ConflictStrategy::Rename)
            .expect("import");
        let id = report.details[0].id.clone().expect("id");

        let bundle = vault
            .export(&[id, "missing".to_string()], ExportMode::Flat)
            .expect("export");
        assert_eq!(bundle.total, 1);
        assert_eq!(bundle.not_found, vec!["missing"]);
        assert_eq!(bundle.records[0].author.as_deref(), Some("Ada"));
        assert_eq!(bundle.records[0].is_favorite, Some(true));
    }
}
