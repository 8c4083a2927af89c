//! Database access
//!
//! - [`pool`]: SQLite pool creation
//! - [`schema_sync`]: table creation and column drift sync
//! - [`gateway`]: entity persistence (sessions, repositories)

pub mod gateway;
pub mod pool;
pub mod schema_sync;

pub use gateway::{PersistenceGateway, Repository, Session};
pub use pool::init_database;
