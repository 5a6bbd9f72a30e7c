//! Changes command implementation

use anyhow::Result;

use crate::store::SyncStore;

pub fn run(store: &SyncStore, scope: &str, since: u64) -> Result<()> {
    let result = match store.changes_since(scope, since) {
        Ok(r) => r,
        Err(e) if e.requires_resync() => {
            println!("{}", e);
            println!("Cursor unusable; sync again with --since 0.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
