//! # sh-db
//!
//! PostgreSQL storage for StatusHub RS.
//!
//! - Connection pool management and embedded migrations
//! - Notification queue with `SKIP LOCKED` claiming, claim leases and recipient snapshots
//! - Channels, subscriptions and verification codes
//! - Service catalog lookups
//!
//! ## Example
//!
//! ```ignore
//! use sh_db::{Database, PgQueueStore};
//!
//! let db = Database::connect(&config.database).await?;
//! db.migrate().await?;
//!
//! let queue = PgQueueStore::new(db.pool().clone(), clock);
//! let claimed = queue.fetch_pending(10).await?;
//! ```

pub mod channels;
pub mod pool;
pub mod queue;
pub mod repository;
pub mod services;

// Re-exports
pub use channels::PgChannelStore;
pub use pool::{Database, PoolSettings, PoolStats};
pub use queue::PgQueueStore;
pub use repository::{RepositoryError, RepositoryResult};
pub use services::PgServiceCatalog;
