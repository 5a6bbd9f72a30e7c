//! Version command implementation

use anyhow::Result;

use crate::store::SyncStore;

pub fn run(store: &SyncStore) -> Result<()> {
    let current = store.current_version()?;
    let floor = store.retention_floor()?;

    println!("Current version: {}", current);
    if floor > 0 {
        println!("History pruned through: {}", floor);
    }
    Ok(())
}
