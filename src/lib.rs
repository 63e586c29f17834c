pub mod categories;
pub mod config;
pub mod errors;
pub mod fsops;
pub mod index;
pub mod items;
pub mod models;
pub mod reconcile;
pub mod scanner;
pub mod transfer;
pub mod trash;
pub mod vault;

pub use crate::config::{RestorePolicy, VaultSettings};
pub use crate::errors::{VaultError, VaultResult};
pub use crate::index::{
    IndexMutation, IndexOutcome, JournalEntry, MutationState, VaultIndex, CONFIRMED_JOURNAL_LIMIT,
};
pub use crate::models::{
    CategoryMove, CategoryNode, CategoryRef, ConflictStrategy, CreateOptions, DeleteMode, DeleteOutcome,
    ExportBundle, ExportMode, ImportDetail, ImportReport, ImportStatus, Item, ItemKind, ItemMeta, ModelConfig,
    ReconcileReport, Recurrence, RecurrenceKind, TransferRecord, TrashCleanup, TrashEntry,
};
pub use crate::vault::Vault;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub fn init_tracing(log_dir: &Path) -> VaultResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "vault.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| VaultError::Internal(error.to_string()))
}
