// Full delete cascade against a real message store: messages first, then
// participant rows, then the conversation row.

use std::sync::Arc;

use relay_conversations::{ConversationError, ConversationManager, GroupSpec};
use relay_messages::{MessageDraft, MessageStore};
use relay_users::UserStore;
use rusqlite::Connection;

fn stores() -> (Arc<UserStore>, ConversationManager, Arc<MessageStore>) {
    let user_conn = Connection::open_in_memory().unwrap();
    relay_users::db::init_db(&user_conn).unwrap();
    let users = Arc::new(UserStore::new(user_conn));

    let conv_conn = Connection::open_in_memory().unwrap();
    relay_conversations::db::init_db(&conv_conn).unwrap();
    let manager = ConversationManager::new(conv_conn, users.clone());

    let msg_conn = Connection::open_in_memory().unwrap();
    relay_messages::db::init_db(&msg_conn).unwrap();
    let messages = Arc::new(MessageStore::new(msg_conn));

    (users, manager, messages)
}

#[test]
fn owner_cascade_clears_messages_participants_and_row() {
    let (users, manager, messages) = stores();
    let owner = users.create("owner", "o@x.example", "h", "O").unwrap().id;
    let mut member_ids = vec![];
    for i in 0..4 {
        member_ids.push(
            users
                .create(&format!("m{i}"), &format!("m{i}@x.example"), "h", "M")
                .unwrap()
                .id,
        );
    }

    let spec: GroupSpec = serde_json::from_value(serde_json::json!({
        "name": "busy room",
        "participantIds": member_ids,
    }))
    .unwrap();
    let group = manager.create_group(&owner, &spec).unwrap();

    for i in 0..40 {
        messages
            .insert(&MessageDraft::text(&group.id, &owner, "O", &format!("msg {i}")))
            .unwrap();
    }
    assert_eq!(messages.count_for_conversation(&group.id).unwrap(), 40);
    assert_eq!(manager.active_participants(&group.id).unwrap().len(), 5);

    let store = messages.clone();
    manager
        .delete_cascade(&group.id, &owner, |cid| {
            store.delete_conversation_messages(cid).map_err(|e| e.to_string())
        })
        .unwrap();

    assert_eq!(messages.count_for_conversation(&group.id).unwrap(), 0);
    assert_eq!(manager.active_participants(&group.id).unwrap().len(), 0);
    assert!(manager.get(&group.id).unwrap().is_none());
}

#[test]
fn non_owner_cascade_is_denied_and_touches_nothing() {
    let (users, manager, messages) = stores();
    let owner = users.create("owner", "o@x.example", "h", "O").unwrap().id;
    let member = users.create("member", "m@x.example", "h", "M").unwrap().id;

    let spec: GroupSpec = serde_json::from_value(serde_json::json!({
        "name": "room",
        "participantIds": [member],
    }))
    .unwrap();
    let group = manager.create_group(&owner, &spec).unwrap();
    messages
        .insert(&MessageDraft::text(&group.id, &owner, "O", "hello"))
        .unwrap();

    let member_id = manager
        .active_participants(&group.id)
        .unwrap()
        .into_iter()
        .find(|p| p.user_id != owner)
        .unwrap()
        .user_id;

    let store = messages.clone();
    let err = manager
        .delete_cascade(&group.id, &member_id, |cid| {
            store.delete_conversation_messages(cid).map_err(|e| e.to_string())
        })
        .unwrap_err();
    assert!(matches!(err, ConversationError::NotAuthorized(_)));

    assert_eq!(messages.count_for_conversation(&group.id).unwrap(), 1);
    assert!(manager.get(&group.id).unwrap().is_some());
}
