pub mod database;
pub mod error;
pub mod memory;
pub mod messages;
pub mod schema;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use memory::{FailingMessageStore, MemoryMessageStore};
pub use messages::{MessageStore, SqliteMessageStore};
pub use users::{UserRepo, UserRow};
