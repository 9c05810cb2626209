//! Domain layer shared across the application service and storage.
//!
//! `types` holds the entities and the application status machine;
//! `dispatch` renders notification drafts for lifecycle events. Nothing
//! in this crate touches a database or a clock.

pub mod dispatch;
pub mod types;
