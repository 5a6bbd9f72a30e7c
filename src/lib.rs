pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{Result, SyncError};
pub use store::SyncStore;
pub use sync::{SyncEngine, SyncResult};
