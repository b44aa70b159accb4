pub mod auth;
pub mod conversations;
pub mod error;
pub mod health;
pub mod users;
