//! Prune command implementation

use anyhow::Result;

use crate::config::RetentionConfig;
use crate::store::SyncStore;

pub fn run(store: &SyncStore, retention: &RetentionConfig, through: Option<u64>) -> Result<()> {
    let current = store.current_version()?;
    let through = match through.or_else(|| retention.prune_point(current)) {
        Some(v) => v,
        None => {
            println!("No --through given and retention.keep_versions is unset; nothing to prune.");
            return Ok(());
        }
    };

    let report = store.prune_logs(through)?;
    println!(
        "Pruned through version {}: {} updates, {} deletes removed",
        report.through, report.updates_removed, report.deletes_removed
    );
    Ok(())
}
