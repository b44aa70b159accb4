//! Authentication: registration, login/logout, password change, and the
//! two-stage password-reset flow with rate limiting. Orchestrates the user
//! store, the token service, the ephemeral store, and the email gateway.

mod email;
mod error;
mod password;
mod service;

pub use email::{EmailGateway, HttpEmailGateway, NoopEmailGateway};
pub use error::{AuthError, Result};
pub use password::{hash_password, verify_password};
pub use service::{AuthService, AuthSession, RegisterRequest};
