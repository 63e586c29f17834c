use crate::config::VaultSettings;
use crate::errors::VaultResult;
use crate::fsops::{is_item_dir, sorted_subdirs};
use crate::index::VaultIndex;
use crate::items::read_item;
use crate::models::CategoryNode;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Walks the vault once and builds the category tree plus the flat item
/// index. Unreadable subtrees and malformed sidecars are logged and skipped;
/// only a failure to read the root itself is an error.
pub fn scan(settings: &VaultSettings) -> VaultResult<VaultIndex> {
    scan_with(settings, sorted_subdirs)
}

pub(crate) fn scan_with<F>(settings: &VaultSettings, list_dirs: F) -> VaultResult<VaultIndex>
where
    F: Fn(&Path) -> io::Result<Vec<(String, PathBuf)>>,
{
    let root = settings.root.clone();
    fs::create_dir_all(&root)?;
    let mut index = VaultIndex::new(root.clone());

    let mut pending: Vec<(PathBuf, Vec<usize>)> = vec![(root.clone(), Vec::new())];
    while let Some((dir, trail)) = pending.pop() {
        let entries = match list_dirs(&dir) {
            Ok(entries) => entries,
            Err(error) if dir == root => return Err(error.into()),
            Err(error) => {
                tracing::warn!(path = %dir.to_string_lossy(), error = %error, "skipping unreadable category");
                continue;
            }
        };

        for (name, path) in entries {
            if name.starts_with('.') || (dir == root && name == settings.trash_dir) {
                continue;
            }
            if is_item_dir(settings, &path) {
                match read_item(settings, &path) {
                    Ok(item) => {
                        let id = item.meta.id.clone();
                        if !index.register_item(&trail, item) {
                            tracing::warn!(path = %path.to_string_lossy(), id = %id, "skipping item with duplicate id");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(path = %path.to_string_lossy(), error = %error, "skipping malformed item");
                    }
                }
                continue;
            }
            match index.push_category(&trail, CategoryNode::new(name, path.clone())) {
                Some(position) => {
                    let mut child_trail = trail.clone();
                    child_trail.push(position);
                    pending.push((path, child_trail));
                }
                None => {
                    tracing::warn!(path = %path.to_string_lossy(), "parent category vanished during scan");
                }
            }
        }
    }

    tracing::debug!(
        root = %root.to_string_lossy(),
        categories = index.category_paths().len(),
        items = index.items().len(),
        "scanned vault"
    );
    Ok(index)
}
