//! Command implementations for the chatsync binary

pub mod changes;
pub mod conversation;
pub mod prune;
pub mod serve;
pub mod version;
