//! Persistence layer for the support bot.
//!
//! The [`Persistence`] trait is the only way the rest of the system touches
//! stored users, knowledge entries and interaction logs. Two backends are
//! provided:
//!
//! - [`FileStore`]: crash-safe JSON files (write to temp file, then rename)
//! - [`MemoryStore`]: in-process maps, for tests and throwaway runs
//!
//! # Example
//!
//! ```no_run
//! use support_persistence::{FileStore, Persistence};
//! use support_models::{UserHandle, UserRecord};
//!
//! # async fn run() -> support_persistence::Result<()> {
//! let store = FileStore::new("/var/lib/support-bot");
//! store.put_user(&UserRecord::new(UserHandle(42), chrono::Utc::now())).await?;
//! let loaded = store.get_user(UserHandle(42)).await?;
//! assert!(loaded.is_some());
//! # Ok(())
//! # }
//! ```

pub mod atomic;
pub mod error;
pub mod file_store;
pub mod memory_store;
pub mod store;

pub use error::{PersistenceError, Result};
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use store::Persistence;
