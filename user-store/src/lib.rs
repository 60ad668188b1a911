//! user-store: per-user account store with quota-enforced usage accounting
//!
//! Tracks identity, credentials, role, storage quota, used space and
//! preferences for each user in a SQLite table.
//!
//! # Guarantees
//!
//! - Used space never goes below zero and is never pushed past the user's
//!   space limit by an increase
//! - Rejected adjustments leave the stored row untouched
//! - Writes are serialized against all other reads and writes of the store;
//!   reads run concurrently with each other
//! - Every operation honours an [`OpContext`] cancellation token and deadline
//!
//! # Example
//!
//! ```no_run
//! use user_store::{OpContext, UsageDirection, User, UserStore, USER_ROLE};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = UserStore::in_memory().await?;
//!     let ctx = OpContext::background();
//!
//!     store.add_user(&ctx, &User::new(2, "alice", "hash", USER_ROLE)).await?;
//!     let used = store.adjust_used(&ctx, 2, UsageDirection::Increase, 4096).await?;
//!     println!("alice uses {} bytes", used);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`context`]: Cancellation and deadlines
//! - [`error`]: Error types and handling
//! - [`users`]: User records, encoding, accounting and the store

pub mod config;
pub mod context;
pub mod error;
pub mod users;

// Re-export commonly used types
pub use config::Config;
pub use context::OpContext;
pub use error::{Result, StoreError};
pub use users::{
    BgConfig, Preferences, Quota, UsageDirection, User, UserStore, ADMIN_ROLE, USER_ROLE,
    VISITOR_ROLE,
};
