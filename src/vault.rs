use crate::categories;
use crate::config::VaultSettings;
use crate::errors::{VaultError, VaultResult};
use crate::fsops::{normalize_root, resolve_in_root};
use crate::index::{IndexMutation, IndexOutcome, VaultIndex};
use crate::items;
use crate::models::{
    CategoryMove, CategoryNode, CategoryRef, ConflictStrategy, CreateOptions, DeleteMode, DeleteOutcome,
    ExportBundle, ExportMode, ImportReport, Item, ReconcileReport, TrashCleanup, TrashEntry,
};
use crate::reconcile::scan_in_background;
use crate::scanner::scan;
use crate::transfer;
use crate::trash;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Vault {
    settings: VaultSettings,
    index: VaultIndex,
}

impl Vault {
    pub fn open(mut settings: VaultSettings) -> VaultResult<Self> {
        settings.validate()?;
        settings.root = normalize_root(&settings.root)?;
        let index = scan(&settings)?;
        tracing::info!(
            root = %settings.root.to_string_lossy(),
            items = index.items().len(),
            "opened vault"
        );
        Ok(Self { settings, index })
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    pub fn index(&self) -> &VaultIndex {
        &self.index
    }

    pub fn categories(&self) -> &[CategoryNode] {
        self.index.categories()
    }

    /// Full rescan. Pending journal entries are replayed on top of the
    /// fresh tree instead of being dropped.
    pub fn rescan(&mut self) -> VaultResult<()> {
        let scanned = scan(&self.settings)?;
        let report = self.index.reconcile(scanned);
        tracing::debug!(still_pending = report.still_pending, "rescanned vault");
        Ok(())
    }

    pub(crate) fn resolve(&self, raw: &Path) -> VaultResult<PathBuf> {
        resolve_in_root(&self.settings.root, raw)
    }

    fn patch(&mut self, mutation: IndexMutation) -> VaultResult<()> {
        if self.index.apply(mutation) == IndexOutcome::RescanRequired {
            tracing::warn!(root = %self.settings.root.to_string_lossy(), "index patch failed; rescanning vault");
            self.rescan()?;
        }
        Ok(())
    }

    fn track_category(&mut self, path: &Path) -> VaultResult<()> {
        if path == self.settings.root || self.index.node(path).is_some() {
            return Ok(());
        }
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => self.patch(IndexMutation::CategoryCreated {
                parent: parent.to_path_buf(),
                name: name.to_string_lossy().to_string(),
            }),
            _ => self.rescan(),
        }
    }

    pub fn create_item(&mut self, category: &Path, title: &str, options: CreateOptions) -> VaultResult<Item> {
        let category = self.resolve(category)?;
        let item = items::create_item(&self.settings, &category, title, options)?;
        self.patch(IndexMutation::ItemStored(Box::new(item.clone())))?;
        Ok(item)
    }

    pub fn read_item(&self, path: &Path) -> VaultResult<Item> {
        let path = self.resolve(path)?;
        items::read_item(&self.settings, &path)
    }

    pub fn update_item(&mut self, item: &Item) -> VaultResult<Item> {
        let mut target = item.clone();
        target.path = self.resolve(&item.path)?;
        let updated = items::update_item(&self.settings, &target)?;
        self.patch(IndexMutation::ItemStored(Box::new(updated.clone())))?;
        Ok(updated)
    }

    pub fn soft_delete_item(&mut self, path: &Path) -> VaultResult<DeleteOutcome> {
        let path = self.resolve(path)?;
        let id = self.index.item_at(&path).map(|item| item.meta.id.clone());
        let outcome = items::soft_delete_item(&self.settings, &path, Utc::now())?;
        if let Some(id) = id {
            self.patch(IndexMutation::ItemRemoved { id })?;
        }
        Ok(outcome)
    }

    pub fn restore_item(&mut self, path: &Path) -> VaultResult<Option<Item>> {
        let path = self.resolve(path)?;
        let Some(item) = items::restore_item(&self.settings, &path, Utc::now())? else {
            return Ok(None);
        };
        if let Some(category) = item.path.parent() {
            self.track_category(category)?;
        }
        self.patch(IndexMutation::ItemStored(Box::new(item.clone())))?;
        Ok(Some(item))
    }

    pub fn permanent_delete_item(&mut self, path: &Path) -> VaultResult<DeleteOutcome> {
        let path = self.resolve(path)?;
        let id = self.index.item_at(&path).map(|item| item.meta.id.clone());
        let outcome = items::permanent_delete_item(&self.settings, &path)?;
        if let Some(id) = id {
            self.patch(IndexMutation::ItemRemoved { id })?;
        }
        Ok(outcome)
    }

    pub fn move_item(&mut self, path: &Path, target_category: &Path) -> VaultResult<Item> {
        let path = self.resolve(path)?;
        let target_category = self.resolve(target_category)?;
        let moved = items::move_item(&self.settings, &path, &target_category)?;
        self.patch(IndexMutation::ItemStored(Box::new(moved.clone())))?;
        Ok(moved)
    }

    /// Two-phase create: the node is inserted into the index before the disk
    /// write and journaled as pending, then confirmed or rolled back. When the
    /// parent is not in the tree the optimistic step is skipped.
    pub fn create_category(&mut self, parent: &Path, name: &str) -> VaultResult<CategoryRef> {
        let parent = self.resolve(parent)?;
        let name = categories::validate_category_name(&self.settings, &parent, name)?;
        let already_indexed = self.index.node(&parent.join(&name)).is_some();
        let ticket = if already_indexed {
            None
        } else {
            self.index.apply_optimistic(IndexMutation::CategoryCreated {
                parent: parent.clone(),
                name: name.clone(),
            })
        };
        if ticket.is_none() && !already_indexed {
            tracing::debug!(parent = %parent.to_string_lossy(), "optimistic insert skipped; parent not in index");
        }

        match categories::create_category(&self.settings, &parent, &name) {
            Ok(created) => {
                match ticket {
                    Some(ticket) => {
                        self.index.confirm(ticket);
                    }
                    None if !already_indexed => self.track_category(&created.path)?,
                    None => {}
                }
                Ok(created)
            }
            Err(error) => {
                if let Some(ticket) = ticket {
                    if self.index.rollback(ticket) == IndexOutcome::RescanRequired {
                        self.rescan()?;
                    }
                }
                Err(error)
            }
        }
    }

    pub fn rename_category(&mut self, path: &Path, new_name: &str) -> VaultResult<CategoryRef> {
        let path = self.resolve(path)?;
        let renamed = categories::rename_category(&self.settings, &path, new_name)?;
        if renamed.path != path {
            self.patch(IndexMutation::CategoryRenamed {
                path,
                new_name: renamed.name.clone(),
            })?;
        }
        Ok(renamed)
    }

    pub fn move_category(&mut self, path: &Path, new_parent: &Path) -> VaultResult<CategoryMove> {
        let path = self.resolve(path)?;
        let new_parent = self.resolve(new_parent)?;
        let result = categories::move_category(&self.settings, &path, &new_parent)?;
        if result.moved {
            self.patch(IndexMutation::CategoryMoved {
                path,
                new_parent,
                new_name: result.name.clone(),
            })?;
        }
        Ok(result)
    }

    pub fn delete_category(&mut self, path: &Path, mode: DeleteMode) -> VaultResult<DeleteOutcome> {
        let path = self.resolve(path)?;
        let outcome = categories::delete_category(&self.settings, &path, mode, Utc::now())?;
        if self.index.node(&path).is_some() {
            self.patch(IndexMutation::CategoryRemoved { path })?;
        }
        Ok(outcome)
    }

    pub fn export(&self, ids: &[String], mode: ExportMode) -> VaultResult<ExportBundle> {
        transfer::export_items(self, ids, mode)
    }

    pub fn export_category(&self, category: &Path, mode: ExportMode) -> VaultResult<ExportBundle> {
        let category = self.resolve(category)?;
        transfer::export_category(self, &category, mode)
    }

    pub fn import(
        &mut self,
        records: &[serde_json::Value],
        default_category: Option<&Path>,
        strategy: ConflictStrategy,
    ) -> VaultResult<ImportReport> {
        let default_category = match default_category {
            Some(path) => Some(self.resolve(path)?),
            None => None,
        };
        Ok(transfer::import_records(self, records, default_category.as_deref(), strategy))
    }

    pub fn list_trash(&self) -> VaultResult<Vec<TrashEntry>> {
        trash::list_trash(&self.settings)
    }

    pub fn cleanup_trash(&self, now: DateTime<Utc>) -> VaultResult<TrashCleanup> {
        trash::cleanup_trash(&self.settings, now)
    }

    pub fn normalize_category_paths(&mut self) -> VaultResult<Vec<String>> {
        let mut targets: Vec<(String, PathBuf)> = self
            .index
            .items()
            .values()
            .map(|item| (item.meta.id.clone(), item.path.clone()))
            .collect();
        targets.sort();
        let mut repaired = Vec::new();
        for (id, path) in targets {
            match items::repair_category_pointer(&self.settings, &path) {
                Ok(true) => repaired.push(id),
                Ok(false) => {}
                Err(VaultError::NotFound(_)) => {
                    tracing::warn!(path = %path.to_string_lossy(), "indexed item vanished; skipping pointer repair");
                }
                Err(error) => return Err(error),
            }
        }
        if !repaired.is_empty() {
            tracing::info!(count = repaired.len(), "repaired stale category pointers");
        }
        Ok(repaired)
    }

    pub fn find_item_path(&self, id: &str) -> Option<PathBuf> {
        self.index.item(id).map(|item| item.path.clone())
    }

    pub fn items_in_category(&self, category: &Path) -> VaultResult<Vec<Item>> {
        let category = self.resolve(category)?;
        Ok(self.index.items_in(&category).into_iter().cloned().collect())
    }

    pub fn all_tags(&self) -> Vec<String> {
        self.index
            .items()
            .values()
            .flat_map(|item| item.meta.tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn reconcile(&mut self, scanned: VaultIndex) -> ReconcileReport {
        self.index.reconcile(scanned)
    }

    pub async fn reconcile_in_background(&mut self) -> VaultResult<ReconcileReport> {
        let scanned = scan_in_background(self.settings.clone()).await?;
        Ok(self.index.reconcile(scanned))
    }
}
