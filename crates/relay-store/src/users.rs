use chrono::Utc;

use relay_core::UserId;

use crate::database::Database;
use crate::error::StoreError;

#[derive(Clone, Debug)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub created_at: String,
}

/// Account storage. Passwords arrive here already hashed.
#[derive(Clone)]
pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. A duplicate username is a `Conflict`.
    pub fn create(&self, username: &str, password_hash: &str) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let id = UserId::new();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (id, username, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), username, password_hash, now],
            )
            .map_err(|e| match &e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!("username {username:?} is taken"))
                }
                _ => StoreError::Database(e.to_string()),
            })?;

            Ok(UserRow {
                id,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                created_at: now,
            })
        })
    }

    pub fn get_by_username(&self, username: &str) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
                [username],
                |row| {
                    Ok(UserRow {
                        id: UserId::from_raw(row.get::<_, String>(0)?),
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .map_err(|_| StoreError::NotFound(format!("user {username:?}")))
        })
    }
}
