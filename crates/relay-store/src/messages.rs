use chrono::{DateTime, Utc};

use relay_core::{ChatMessage, MessageId};

use crate::database::Database;
use crate::error::StoreError;

/// Persistence port for chat messages.
///
/// The hub appends through this on every accepted message and the REST
/// frontend lists through it; ordering between `append` calls is the
/// caller's call order.
pub trait MessageStore: Send + Sync {
    /// Durably record one message.
    fn append(&self, msg: &ChatMessage) -> Result<(), StoreError>;

    /// The most recent messages, oldest first (newest last).
    fn list_recent(&self, limit: u32) -> Result<Vec<ChatMessage>, StoreError>;
}

/// SQLite-backed message store.
pub struct SqliteMessageStore {
    db: Database,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl MessageStore for SqliteMessageStore {
    fn append(&self, msg: &ChatMessage) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let id = MessageId::new();
            conn.execute(
                "INSERT INTO messages (id, sender, recipient, payload, datetime)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.as_str(),
                    msg.sender,
                    msg.recipient,
                    msg.payload,
                    msg.datetime.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn list_recent(&self, limit: u32) -> Result<Vec<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            // rowid order is insertion order, which is the hub's append order.
            let mut stmt = conn.prepare(
                "SELECT sender, recipient, payload, datetime FROM
                   (SELECT rowid AS rid, sender, recipient, payload, datetime
                      FROM messages ORDER BY rid DESC LIMIT ?1)
                 ORDER BY rid ASC",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(sender, recipient, payload, datetime)| {
                    let datetime = parse_datetime(&datetime)?;
                    Ok(ChatMessage {
                        sender,
                        payload,
                        datetime,
                        recipient,
                    })
                })
                .collect()
        })
    }
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("bad datetime {raw:?}: {e}")))
}
