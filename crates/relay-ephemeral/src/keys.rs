//! Key namespace shared by every subsystem that touches the ephemeral
//! store. Kept in one place so the layout in §storage stays greppable.

/// `user:server:<uid>` → instance id holding the user's connection.
pub fn user_server(user_id: &str) -> String {
    format!("user:server:{}", user_id)
}

/// `server:sessions:<iid>` → set of live connection ids on an instance.
pub fn server_sessions(instance_id: &str) -> String {
    format!("server:sessions:{}", instance_id)
}

/// `user:presence:<uid>` → "online" / "offline".
pub fn user_presence(user_id: &str) -> String {
    format!("user:presence:{}", user_id)
}

/// `jwt:blacklist:<jti>` → present iff the token is revoked.
pub fn token_blocklist(jti: &str) -> String {
    format!("jwt:blacklist:{}", jti)
}

/// `password-reset:<token>` → user id, single-use.
pub fn password_reset(token: &str) -> String {
    format!("password-reset:{}", token)
}

/// `password-reset-rate:<email>` → sliding-window counter.
pub fn password_reset_rate(email: &str) -> String {
    format!("password-reset-rate:{}", email)
}
