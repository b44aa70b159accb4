// Auth lifecycle: register/login/logout, password change, and the
// two-stage reset flow with rate limiting and single-use tokens.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_auth::{AuthError, AuthService, EmailGateway, RegisterRequest};
use relay_core::config::{ResetConfig, TokenConfig};
use relay_ephemeral::MemoryEphemeral;
use relay_tokens::TokenService;
use relay_users::UserStore;
use rusqlite::Connection;

/// Captures outbound mail so tests can assert on (non-)delivery.
#[derive(Default)]
struct RecordingGateway {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl EmailGateway for RecordingGateway {
    async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

struct Fixture {
    auth: AuthService,
    mail: Arc<RecordingGateway>,
}

fn fixture() -> Fixture {
    let conn = Connection::open_in_memory().unwrap();
    relay_users::db::init_db(&conn).unwrap();
    let users = Arc::new(UserStore::new(conn));

    let ephemeral = Arc::new(MemoryEphemeral::new());
    let token_cfg = TokenConfig {
        secret: "test-secret".into(),
        ttl_secs: 3600,
        issuer: "relay".into(),
        audience: "relay-clients".into(),
        allow_legacy: false,
    };
    let tokens = Arc::new(TokenService::new(&token_cfg, ephemeral.clone()));
    let mail = Arc::new(RecordingGateway::default());

    let auth = AuthService::new(
        users,
        tokens,
        ephemeral,
        mail.clone(),
        &ResetConfig::default(),
        Duration::from_secs(1),
    );
    Fixture { auth, mail }
}

fn register(f: &Fixture, username: &str, email: &str, password: &str) -> relay_auth::AuthSession {
    f.auth
        .register(&RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            display_name: None,
        })
        .unwrap()
}

/// Pull the reset token out of the captured email body.
fn token_from_mail(body: &str) -> String {
    body.lines()
        .find_map(|l| l.strip_prefix("Reset token: "))
        .expect("mail body carries the token")
        .to_string()
}

#[test]
fn register_login_logout_round_trip() {
    let f = fixture();
    let session = register(&f, "alice", "a@x.example", "s3cret-pass");
    assert!(session.user.online);

    let back = f.auth.user_from_token(&session.token).unwrap();
    assert_eq!(back.username, "alice");

    f.auth.logout(&session.token);
    assert!(matches!(
        f.auth.user_from_token(&session.token),
        Err(AuthError::TokenRevoked)
    ));

    let relogin = f.auth.login("a@x.example", "s3cret-pass").unwrap();
    assert!(f.auth.user_from_token(&relogin.token).is_ok());
}

#[test]
fn duplicate_registration_reports_which_field() {
    let f = fixture();
    register(&f, "alice", "a@x.example", "s3cret-pass");

    let err = f
        .auth
        .register(&RegisterRequest {
            username: "alice".into(),
            email: "other@x.example".into(),
            password: "s3cret-pass".into(),
            display_name: None,
        })
        .unwrap_err();
    assert!(matches!(err, AuthError::UsernameTaken));

    let err = f
        .auth
        .register(&RegisterRequest {
            username: "alice2".into(),
            email: "A@X.example".into(),
            password: "s3cret-pass".into(),
            display_name: None,
        })
        .unwrap_err();
    assert!(matches!(err, AuthError::EmailTaken));
}

#[test]
fn wrong_password_and_unknown_email_are_indistinguishable() {
    let f = fixture();
    register(&f, "alice", "a@x.example", "s3cret-pass");

    let a = f.auth.login("a@x.example", "wrong-pass!").unwrap_err();
    let b = f.auth.login("ghost@x.example", "whatever1").unwrap_err();
    assert_eq!(a.to_string(), b.to_string());
}

#[test]
fn weak_password_is_rejected_on_register() {
    let f = fixture();
    let err = f
        .auth
        .register(&RegisterRequest {
            username: "bob".into(),
            email: "b@x.example".into(),
            password: "short".into(),
            display_name: None,
        })
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
}

#[test]
fn logout_with_garbage_token_is_silent() {
    let f = fixture();
    f.auth.logout("not-a-token");
}

#[test]
fn change_password_requires_current_and_difference() {
    let f = fixture();
    let session = register(&f, "alice", "a@x.example", "s3cret-pass");
    let uid = &session.user.id;

    assert!(matches!(
        f.auth.change_password(uid, "wrong-pass!", "brand-new-pass"),
        Err(AuthError::InvalidCredentials)
    ));
    assert!(matches!(
        f.auth.change_password(uid, "s3cret-pass", "s3cret-pass"),
        Err(AuthError::Validation(_))
    ));

    f.auth
        .change_password(uid, "s3cret-pass", "brand-new-pass")
        .unwrap();
    assert!(f.auth.login("a@x.example", "brand-new-pass").is_ok());
    assert!(f.auth.login("a@x.example", "s3cret-pass").is_err());
}

#[tokio::test]
async fn reset_happy_path_and_single_use() {
    let f = fixture();
    register(&f, "alice", "a@x.example", "s3cret-pass");

    f.auth.request_password_reset("a@x.example").await;
    let mail = f.mail.sent.lock().unwrap().clone();
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].0, "a@x.example");
    let token = token_from_mail(&mail[0].1);

    f.auth.reset_password(&token, "Newpass12").unwrap();
    assert!(f.auth.login("a@x.example", "Newpass12").is_ok());

    // the token was consumed on first redemption
    assert!(matches!(
        f.auth.reset_password(&token, "Otherpass12"),
        Err(AuthError::InvalidResetToken)
    ));
}

#[tokio::test]
async fn reset_for_unknown_email_sends_nothing() {
    let f = fixture();
    f.auth.request_password_reset("ghost@x.example").await;
    assert!(f.mail.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sixth_reset_request_in_window_sends_no_email() {
    let f = fixture();
    register(&f, "alice", "a@x.example", "s3cret-pass");

    for _ in 0..6 {
        f.auth.request_password_reset("a@x.example").await;
    }
    // the 6th call looked identical to the caller but sent nothing
    assert_eq!(f.mail.sent.lock().unwrap().len(), 5);
}

#[test]
fn reset_with_unknown_token_fails() {
    let f = fixture();
    assert!(matches!(
        f.auth.reset_password("never-issued", "Newpass12"),
        Err(AuthError::InvalidResetToken)
    ));
}
