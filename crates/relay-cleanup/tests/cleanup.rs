// Reconciler correctness: the S5-style seed of orphans, fresh and
// expired tombstones, and an untouched live conversation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relay_cleanup::CleanupEngine;
use relay_conversations::{ConversationManager, GroupSpec};
use relay_messages::{MessageDraft, MessageStore};
use relay_users::UserStore;
use rusqlite::Connection;

struct Fixture {
    users: Arc<UserStore>,
    conversations: Arc<ConversationManager>,
    messages: Arc<MessageStore>,
    engine: CleanupEngine,
}

fn fixture() -> Fixture {
    let user_conn = Connection::open_in_memory().unwrap();
    relay_users::db::init_db(&user_conn).unwrap();
    let users = Arc::new(UserStore::new(user_conn));

    let conv_conn = Connection::open_in_memory().unwrap();
    relay_conversations::db::init_db(&conv_conn).unwrap();
    let conversations = Arc::new(ConversationManager::new(conv_conn, users.clone()));

    let msg_conn = Connection::open_in_memory().unwrap();
    relay_messages::db::init_db(&msg_conn).unwrap();
    let messages = Arc::new(MessageStore::new(msg_conn));

    let engine = CleanupEngine::new(
        conversations.clone(),
        messages.clone(),
        30,
        Duration::from_secs(3600),
    );
    Fixture {
        users,
        conversations,
        messages,
        engine,
    }
}

fn seed_user(f: &Fixture, name: &str) -> String {
    f.users
        .create(name, &format!("{name}@x.example"), "hash", name)
        .unwrap()
        .id
}

fn seed_group(f: &Fixture, owner: &str) -> String {
    let spec: GroupSpec = serde_json::from_value(serde_json::json!({
        "name": "room",
        "participantIds": [],
    }))
    .unwrap();
    f.conversations.create_group(owner, &spec).unwrap().id
}

fn say_n(f: &Fixture, conversation: &str, sender: &str, n: usize) {
    for i in 0..n {
        f.messages
            .insert(&MessageDraft::text(conversation, sender, sender, &format!("m{i}")))
            .unwrap();
    }
}

fn days_ago(days: i64) -> String {
    (Utc::now() - chrono::Duration::days(days)).to_rfc3339()
}

/// Seed the S5 scenario: C tombstoned 31 days ago with 3 messages, D
/// tombstoned 1 day ago with 2, E live with 5, plus 2 orphans.
fn seed_s5(f: &Fixture) -> (String, String, String) {
    let alice = seed_user(f, "alice");

    let c = seed_group(f, &alice);
    say_n(f, &c, &alice, 3);
    f.conversations.soft_delete_at(&c, &days_ago(31)).unwrap();

    let d = seed_group(f, &alice);
    say_n(f, &d, &alice, 2);
    f.conversations.soft_delete_at(&d, &days_ago(1)).unwrap();

    let e = seed_group(f, &alice);
    say_n(f, &e, &alice, 5);

    say_n(f, "grp_vanished", &alice, 2);

    (c, d, e)
}

#[test]
fn full_pass_matches_the_seeded_scenario() {
    let f = fixture();
    let (c, d, e) = seed_s5(&f);

    let report = f.engine.run_once();
    assert!(!report.dry_run);
    assert_eq!(report.orphaned_messages, 2);
    assert_eq!(report.tombstone_messages, 2 + 3); // D's two plus C's three
    assert_eq!(report.expired_conversations, 1);
    assert_eq!(report.sample_expired_conversations, vec![c.clone()]);

    // C is gone entirely
    assert!(f.conversations.get(&c).unwrap().is_none());
    assert_eq!(f.messages.count_for_conversation(&c).unwrap(), 0);
    // D keeps its tombstone but lost its messages
    assert!(f.conversations.get(&d).unwrap().unwrap().is_deleted());
    assert_eq!(f.messages.count_for_conversation(&d).unwrap(), 0);
    // E untouched
    assert!(f.conversations.get(&e).unwrap().is_some());
    assert_eq!(f.messages.count_for_conversation(&e).unwrap(), 5);
    // no orphans remain
    assert_eq!(f.messages.count_for_conversation("grp_vanished").unwrap(), 0);
}

#[test]
fn dry_run_reports_without_mutating() {
    let f = fixture();
    let (c, d, e) = seed_s5(&f);

    let report = f.engine.analyze();
    assert!(report.dry_run);
    assert_eq!(report.orphaned_messages, 2);
    assert_eq!(report.tombstone_messages, 5);
    assert_eq!(report.expired_conversations, 1);
    assert!(report
        .sample_orphan_conversations
        .contains(&"grp_vanished".to_string()));

    // nothing moved
    assert!(f.conversations.get(&c).unwrap().is_some());
    assert_eq!(f.messages.count_for_conversation(&c).unwrap(), 3);
    assert_eq!(f.messages.count_for_conversation(&d).unwrap(), 2);
    assert_eq!(f.messages.count_for_conversation(&e).unwrap(), 5);
    assert_eq!(f.messages.count_for_conversation("grp_vanished").unwrap(), 2);
}

#[test]
fn pass_is_idempotent() {
    let f = fixture();
    seed_s5(&f);

    f.engine.run_once();
    let second = f.engine.run_once();
    assert_eq!(second.orphaned_messages, 0);
    assert_eq!(second.tombstone_messages, 0);
    assert_eq!(second.expired_conversations, 0);
}

#[test]
fn clean_store_yields_empty_report() {
    let f = fixture();
    let alice = seed_user(&f, "alice");
    let live = seed_group(&f, &alice);
    say_n(&f, &live, &alice, 3);

    let report = f.engine.run_once();
    assert_eq!(report.orphaned_messages, 0);
    assert_eq!(report.tombstone_messages, 0);
    assert_eq!(report.expired_conversations, 0);
    assert_eq!(f.messages.count_for_conversation(&live).unwrap(), 3);
}
