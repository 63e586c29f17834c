//! In-memory mirror of the vault: the category tree plus a flat id -> item
//! index. Mutations are applied surgically through `detach`, `relabel` and
//! `attach`; when a patch cannot be applied safely the caller gets
//! `IndexOutcome::RescanRequired` and must fall back to a full scan.

use crate::models::{CategoryNode, Item, ReconcileReport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum IndexMutation {
    CategoryCreated { parent: PathBuf, name: String },
    CategoryRenamed { path: PathBuf, new_name: String },
    CategoryMoved { path: PathBuf, new_parent: PathBuf, new_name: String },
    CategoryRemoved { path: PathBuf },
    ItemStored(Box<Item>),
    ItemRemoved { id: String },
}

/// Confirmed entries kept for the next reconciliation; older ones are
/// dropped first.
pub const CONFIRMED_JOURNAL_LIMIT: usize = 64;

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Patched,
    RescanRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub ticket: u64,
    pub mutation: IndexMutation,
    pub state: MutationState,
}

#[derive(Debug, Clone, Default)]
pub struct VaultIndex {
    root: PathBuf,
    categories: Vec<CategoryNode>,
    root_items: Vec<String>,
    items: HashMap<String, Item>,
    journal: Vec<JournalEntry>,
    next_ticket: u64,
}

impl VaultIndex {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn categories(&self) -> &[CategoryNode] {
        &self.categories
    }

    pub fn root_items(&self) -> &[String] {
        &self.root_items
    }

    pub fn items(&self) -> &HashMap<String, Item> {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn item_at(&self, path: &Path) -> Option<&Item> {
        self.items.values().find(|item| item.path == path)
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn node(&self, path: &Path) -> Option<&CategoryNode> {
        let trail = self.locate(path)?;
        node_at(&self.categories, &trail)
    }

    pub fn items_in(&self, category: &Path) -> Vec<&Item> {
        let ids: &[String] = if category == self.root {
            &self.root_items
        } else {
            match self.node(category) {
                Some(node) => &node.items,
                None => return Vec::new(),
            }
        };
        ids.iter().filter_map(|id| self.items.get(id)).collect()
    }

    pub fn items_under(&self, category: &Path) -> Vec<&Item> {
        if category == self.root {
            let mut out = self.items_in(category);
            for node in &self.categories {
                out.extend(self.items_under(&node.path));
            }
            return out;
        }
        let Some(node) = self.node(category) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            out.extend(current.items.iter().filter_map(|id| self.items.get(id)));
            pending.extend(current.children.iter().rev());
        }
        out
    }

    pub fn category_paths(&self) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();
        let mut pending: Vec<&CategoryNode> = self.categories.iter().collect();
        while let Some(node) = pending.pop() {
            paths.insert(node.path.clone());
            pending.extend(node.children.iter());
        }
        paths
    }

    pub fn locate(&self, path: &Path) -> Option<Vec<usize>> {
        let mut pending: Vec<(Vec<usize>, &CategoryNode)> = self
            .categories
            .iter()
            .enumerate()
            .map(|(position, node)| (vec![position], node))
            .collect();
        while let Some((trail, node)) = pending.pop() {
            if node.path == path {
                return Some(trail);
            }
            for (position, child) in node.children.iter().enumerate() {
                let mut child_trail = trail.clone();
                child_trail.push(position);
                pending.push((child_trail, child));
            }
        }
        None
    }

    fn parent_exists(&self, parent: &Path) -> bool {
        parent == self.root || self.locate(parent).is_some()
    }

    pub fn detach(&mut self, path: &Path) -> Option<CategoryNode> {
        let trail = self.locate(path)?;
        let (last, parent_trail) = trail.split_last()?;
        let siblings = children_at_mut(&mut self.categories, parent_trail)?;
        Some(siblings.remove(*last))
    }

    pub fn relabel(&mut self, node: &mut CategoryNode, parent: &Path, name: &str) {
        relabel_subtree(node, parent, name, &mut self.items);
    }

    pub fn attach(&mut self, node: CategoryNode, parent: &Path) -> Result<(), CategoryNode> {
        if parent == self.root {
            self.categories.push(node);
            return Ok(());
        }
        let Some(trail) = self.locate(parent) else {
            return Err(node);
        };
        match children_at_mut(&mut self.categories, &trail) {
            Some(children) => {
                children.push(node);
                Ok(())
            }
            None => Err(node),
        }
    }

    pub fn apply(&mut self, mutation: IndexMutation) -> IndexOutcome {
        match mutation {
            IndexMutation::CategoryCreated { parent, name } => self.apply_created(&parent, &name),
            IndexMutation::CategoryRenamed { path, new_name } => self.apply_renamed(&path, &new_name),
            IndexMutation::CategoryMoved {
                path,
                new_parent,
                new_name,
            } => self.apply_moved(&path, &new_parent, &new_name),
            IndexMutation::CategoryRemoved { path } => self.apply_removed(&path),
            IndexMutation::ItemStored(item) => self.apply_item_stored(*item),
            IndexMutation::ItemRemoved { id } => {
                self.remove_item(&id);
                IndexOutcome::Patched
            }
        }
    }

    fn apply_created(&mut self, parent: &Path, name: &str) -> IndexOutcome {
        let path = parent.join(name);
        if self.locate(&path).is_some() {
            return IndexOutcome::Patched;
        }
        match self.attach(CategoryNode::new(name, path), parent) {
            Ok(()) => IndexOutcome::Patched,
            Err(_) => IndexOutcome::RescanRequired,
        }
    }

    fn apply_renamed(&mut self, path: &Path, new_name: &str) -> IndexOutcome {
        let Some(parent) = path.parent().map(Path::to_path_buf) else {
            return IndexOutcome::RescanRequired;
        };
        if self.locate(&parent.join(new_name)).is_some() {
            return IndexOutcome::RescanRequired;
        }
        let Some(trail) = self.locate(path) else {
            return IndexOutcome::RescanRequired;
        };
        let Some(node) = node_at_mut(&mut self.categories, &trail) else {
            return IndexOutcome::RescanRequired;
        };
        relabel_subtree(node, &parent, new_name, &mut self.items);
        IndexOutcome::Patched
    }

    fn apply_moved(&mut self, path: &Path, new_parent: &Path, new_name: &str) -> IndexOutcome {
        if new_parent.starts_with(path) || !self.parent_exists(new_parent) || self.locate(path).is_none() {
            return IndexOutcome::RescanRequired;
        }
        if self.locate(&new_parent.join(new_name)).is_some() {
            return IndexOutcome::RescanRequired;
        }
        let Some(mut node) = self.detach(path) else {
            return IndexOutcome::RescanRequired;
        };
        self.relabel(&mut node, new_parent, new_name);
        match self.attach(node, new_parent) {
            Ok(()) => IndexOutcome::Patched,
            Err(_) => IndexOutcome::RescanRequired,
        }
    }

    fn apply_removed(&mut self, path: &Path) -> IndexOutcome {
        let Some(node) = self.detach(path) else {
            return IndexOutcome::RescanRequired;
        };
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            for id in &current.items {
                self.items.remove(id);
            }
            pending.extend(current.children);
        }
        IndexOutcome::Patched
    }

    fn apply_item_stored(&mut self, item: Item) -> IndexOutcome {
        let Some(container) = item.path.parent().map(Path::to_path_buf) else {
            return IndexOutcome::RescanRequired;
        };
        if !self.parent_exists(&container) {
            return IndexOutcome::RescanRequired;
        }
        let id = item.meta.id.clone();
        let relocated = self
            .items
            .get(&id)
            .is_some_and(|previous| previous.path != item.path);
        if relocated {
            self.remove_item(&id);
        }
        match self.container_items_mut(&container) {
            Some(ids) => {
                if !ids.iter().any(|existing| existing == &id) {
                    ids.push(id.clone());
                }
            }
            None => return IndexOutcome::RescanRequired,
        }
        self.items.insert(id, item);
        IndexOutcome::Patched
    }

    pub fn remove_item(&mut self, id: &str) -> Option<Item> {
        let item = self.items.remove(id)?;
        if let Some(container) = item.path.parent() {
            if let Some(ids) = self.container_items_mut(container) {
                ids.retain(|existing| existing != id);
            }
        }
        Some(item)
    }

    fn container_items_mut(&mut self, container: &Path) -> Option<&mut Vec<String>> {
        if container == self.root {
            return Some(&mut self.root_items);
        }
        let trail = self.locate(container)?;
        node_at_mut(&mut self.categories, &trail).map(|node| &mut node.items)
    }

    pub(crate) fn push_category(&mut self, trail: &[usize], node: CategoryNode) -> Option<usize> {
        let children = children_at_mut(&mut self.categories, trail)?;
        children.push(node);
        Some(children.len() - 1)
    }

    pub(crate) fn register_item(&mut self, trail: &[usize], item: Item) -> bool {
        if self.items.contains_key(&item.meta.id) {
            return false;
        }
        let ids = if trail.is_empty() {
            &mut self.root_items
        } else {
            match node_at_mut(&mut self.categories, trail) {
                Some(node) => &mut node.items,
                None => return false,
            }
        };
        ids.push(item.meta.id.clone());
        self.items.insert(item.meta.id.clone(), item);
        true
    }

    /// Optimistic phase: applies `mutation` ahead of the disk write and
    /// journals it as pending. Returns `None` (and changes nothing) when the
    /// mutation cannot be placed, leaving reconciliation to pick it up.
    pub fn apply_optimistic(&mut self, mutation: IndexMutation) -> Option<u64> {
        if self.apply(mutation.clone()) == IndexOutcome::RescanRequired {
            return None;
        }
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.journal.push(JournalEntry {
            ticket,
            mutation,
            state: MutationState::Pending,
        });
        Some(ticket)
    }

    pub fn confirm(&mut self, ticket: u64) -> bool {
        match self.journal.iter_mut().find(|entry| entry.ticket == ticket) {
            Some(entry) => entry.state = MutationState::Confirmed,
            None => return false,
        }
        let confirmed = self
            .journal
            .iter()
            .filter(|entry| entry.state == MutationState::Confirmed)
            .count();
        let mut excess = confirmed.saturating_sub(CONFIRMED_JOURNAL_LIMIT);
        if excess > 0 {
            self.journal.retain(|entry| {
                if excess > 0 && entry.state == MutationState::Confirmed {
                    excess -= 1;
                    return false;
                }
                true
            });
        }
        true
    }

    /// Undoes a pending mutation whose disk write failed. Only creations can
    /// be inverted locally; anything else needs a rescan.
    pub fn rollback(&mut self, ticket: u64) -> IndexOutcome {
        let Some(position) = self.journal.iter().position(|entry| entry.ticket == ticket) else {
            return IndexOutcome::Patched;
        };
        let entry = self.journal.remove(position);
        match entry.mutation {
            IndexMutation::CategoryCreated { parent, name } => match self.detach(&parent.join(name)) {
                Some(_) => IndexOutcome::Patched,
                None => IndexOutcome::RescanRequired,
            },
            _ => IndexOutcome::RescanRequired,
        }
    }

    /// Replaces the local view with a freshly scanned one. Confirmed entries
    /// are retired; pending ones are replayed on top of the scan.
    pub fn reconcile(&mut self, scanned: VaultIndex) -> ReconcileReport {
        let journal = std::mem::take(&mut self.journal);
        let confirmed = journal
            .iter()
            .filter(|entry| entry.state == MutationState::Confirmed)
            .count();
        let before_paths = self.category_paths();
        let before_items: BTreeSet<String> = self.items.keys().cloned().collect();

        self.root = scanned.root;
        self.categories = scanned.categories;
        self.root_items = scanned.root_items;
        self.items = scanned.items;

        for entry in journal.into_iter().filter(|entry| entry.state == MutationState::Pending) {
            if self.apply(entry.mutation.clone()) == IndexOutcome::Patched {
                self.journal.push(entry);
            }
        }

        let after_items: BTreeSet<String> = self.items.keys().cloned().collect();
        let mismatched = before_paths != self.category_paths() || before_items != after_items;
        if mismatched {
            tracing::warn!(root = %self.root.to_string_lossy(), "reconciliation found the local view out of date");
        }
        ReconcileReport {
            confirmed,
            still_pending: self.journal.len(),
            mismatched,
        }
    }
}

fn node_at<'a>(categories: &'a [CategoryNode], trail: &[usize]) -> Option<&'a CategoryNode> {
    let (first, rest) = trail.split_first()?;
    let mut node = categories.get(*first)?;
    for position in rest {
        node = node.children.get(*position)?;
    }
    Some(node)
}

fn node_at_mut<'a>(categories: &'a mut [CategoryNode], trail: &[usize]) -> Option<&'a mut CategoryNode> {
    let (first, rest) = trail.split_first()?;
    let mut node = categories.get_mut(*first)?;
    for position in rest {
        node = node.children.get_mut(*position)?;
    }
    Some(node)
}

fn children_at_mut<'a>(categories: &'a mut Vec<CategoryNode>, trail: &[usize]) -> Option<&'a mut Vec<CategoryNode>> {
    if trail.is_empty() {
        return Some(categories);
    }
    node_at_mut(categories, trail).map(|node| &mut node.children)
}

fn relabel_subtree(node: &mut CategoryNode, parent: &Path, name: &str, items: &mut HashMap<String, Item>) {
    node.name = name.to_string();
    let mut pending: Vec<(&mut CategoryNode, PathBuf)> = vec![(node, parent.to_path_buf())];
    while let Some((current, parent_path)) = pending.pop() {
        current.path = parent_path.join(&current.name);
        let category_path = current.path.to_string_lossy().to_string();
        for id in &current.items {
            if let Some(item) = items.get_mut(id) {
                let dir_name = item.dir_name();
                item.path = current.path.join(dir_name);
                item.meta.category = current.name.clone();
                item.meta.category_path = category_path.clone();
            }
        }
        let path = current.path.clone();
        for child in current.children.iter_mut() {
            pending.push((child, path.clone()));
        }
    }
}
