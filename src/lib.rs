//! # salvo-db-session
//!
//! Database-backed session middleware for the Salvo web framework.
//!
//! The session cookie carries only an opaque random key. Session data lives in
//! a store (SQLite, Redis or memory) as a signed payload, is loaded lazily on
//! first access, and is written back only when the request changed it.
//!
//! ## Features
//!
//! - **Signed payloads**: HMAC-SHA256 over the serialized data, with secret
//!   rotation; tampered data reads as an empty session
//! - **Dirty tracking**: accessed/modified/deleted flags decide what happens
//!   to the cookie and the stored row
//! - **Per-session expiry**: relative, absolute or at browser close
//! - **Pluggable storage backends**: SQLite, Redis, Memory, or custom stores
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use salvo::prelude::*;
//! use salvo_db_session::{SessionConfig, SessionDepotExt, SessionHandler, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = SqliteStore::connect("sqlite://sessions.db").await.unwrap();
//!     store.migrate().await.unwrap();
//!
//!     let config = SessionConfig::new("your-secret-key").with_cookie_age(86400);
//!     let session_handler = SessionHandler::new(store, config).unwrap();
//!
//!     let router = Router::new().hoop(session_handler).get(index);
//!     let acceptor = TcpListener::new("127.0.0.1:5800").bind().await;
//!     Server::new(acceptor).serve(router).await;
//! }
//!
//! #[handler]
//! async fn index(depot: &mut Depot) -> String {
//!     let session = depot.session_mut().unwrap();
//!     let views: i64 = session.get("views").await.unwrap().unwrap_or(0);
//!     session.set("views", views + 1).await.unwrap();
//!     format!("views: {}", views + 1)
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod session;
pub mod signing;
pub mod store;

pub use config::{SameSite, SessionConfig};
pub use error::SessionError;
pub use handler::SessionHandler;
pub use session::{Expiry, Session, SessionData};
pub use signing::SessionEncoder;
pub use store::{spawn_cleanup_task, CleanupTask, MemoryStore, SessionRecord, SessionStore};

#[cfg(feature = "sqlite-store")]
pub use store::SqliteStore;

#[cfg(feature = "redis-store")]
pub use store::RedisStore;

/// Extension trait for Depot to easily access session
pub mod depot_ext;
pub use depot_ext::SessionDepotExt;
