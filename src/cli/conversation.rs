use anyhow::Result;

use crate::model::{ConversationPatch, Direction, MessageStatus, NewConversation};
use crate::store::SyncStore;

pub fn create(
    store: &SyncStore,
    scope: String,
    content: String,
    message_type: String,
    direction: String,
) -> Result<()> {
    let direction: Direction = direction.parse().map_err(anyhow::Error::msg)?;
    let input = NewConversation {
        message_type,
        direction,
        ..NewConversation::text(scope, content)
    };

    let record = store.create_conversation(input)?;
    println!(
        "Created conversation {} in '{}' at version {}",
        record.id, record.line_user_id, record.version
    );
    Ok(())
}

pub fn update(
    store: &SyncStore,
    id: i64,
    content: Option<String>,
    status: Option<String>,
    direction: Option<String>,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<MessageStatus>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let direction = direction
        .map(|d| d.parse::<Direction>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let patch = ConversationPatch {
        content,
        direction,
        status,
        ..Default::default()
    };

    let before = store
        .get_conversation(id)?
        .ok_or_else(|| anyhow::anyhow!("Conversation not found: {}", id))?;
    let record = store.update_conversation(id, &patch)?;

    if record.version == before.version {
        println!("Nothing changed; conversation {} stays at version {}", id, record.version);
    } else {
        println!("Updated conversation {} to version {}", id, record.version);
    }
    Ok(())
}

pub fn delete(store: &SyncStore, id: i64) -> Result<()> {
    let tombstone = store.delete_conversation(id)?;
    println!(
        "Deleted conversation {} from '{}' at version {}",
        id, tombstone.scope_key, tombstone.delete_version
    );
    Ok(())
}

pub fn list(store: &SyncStore, scope: &str) -> Result<()> {
    let records = store.list_conversations(scope)?;
    if records.is_empty() {
        println!("No conversations found for '{}'.", scope);
        return Ok(());
    }

    println!(
        "{:<8} {:<8} {:<10} {:<10} {:<10} {}",
        "ID", "Version", "Direction", "Status", "Type", "Content"
    );
    println!("{}", "-".repeat(80));
    for r in records {
        let content = r.content.lines().next().unwrap_or("");
        let content = if content.chars().count() > 35 {
            format!("{}...", content.chars().take(32).collect::<String>())
        } else {
            content.to_string()
        };
        println!(
            "{:<8} {:<8} {:<10} {:<10} {:<10} {}",
            r.id,
            r.version,
            r.direction.as_str(),
            r.status,
            r.message_type,
            content
        );
    }
    Ok(())
}
