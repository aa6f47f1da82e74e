//! askgate storage crate - file-backed conversation history, provider audit
//! logs, and the read-only account directory.
//!
//! Records live as JSON documents under the data directory. Read-modify-write
//! on a single record is linearized through [`KeyedLocks`], and every write
//! goes through a temp file plus rename.

pub mod accounts;
pub mod audit;
pub mod conversation;
pub mod fs;
pub mod locks;

pub use accounts::{AccountDirectory, AccountLookup};
pub use audit::AuditLogSink;
pub use conversation::ConversationStore;
pub use locks::KeyedLocks;
