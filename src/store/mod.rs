//! Session store implementations

mod cleanup;
mod memory;
mod traits;

pub use cleanup::{spawn_cleanup_task, CleanupTask};
pub use memory::MemoryStore;
pub use traits::{SessionRecord, SessionStore};

#[cfg(feature = "sqlite-store")]
mod sqlite_store;

#[cfg(feature = "sqlite-store")]
pub use sqlite_store::SqliteStore;

#[cfg(feature = "redis-store")]
mod redis_store;

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;
