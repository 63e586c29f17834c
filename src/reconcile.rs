use crate::config::VaultSettings;
use crate::errors::VaultResult;
use crate::index::VaultIndex;
use crate::scanner::scan;
use tokio::task::JoinHandle;

pub fn spawn_scan(settings: VaultSettings) -> JoinHandle<VaultResult<VaultIndex>> {
    tokio::task::spawn_blocking(move || scan(&settings))
}

pub async fn scan_in_background(settings: VaultSettings) -> VaultResult<VaultIndex> {
    spawn_scan(settings).await?
}
