//! The users table of the relational store: identity, credentials,
//! presence columns. Soft-delete does not apply here; the core never
//! hard-deletes a user.

pub mod db;
mod error;
mod store;
mod types;

pub use error::{Result, UserError};
pub use store::UserStore;
pub use types::User;
