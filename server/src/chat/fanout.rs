//! Fan-out dispatcher: push one event to the live sessions of every
//! resolved recipient.
//!
//! Fire-and-forget by design. The message is already committed to the
//! store before fan-out is attempted, so a member with zero live
//! sessions simply catches up on their next fetch — there is no queue
//! and no retry here. Delivery is at most once per live connection per
//! call.

use std::collections::HashSet;

use axum::extract::ws::Message;

use crate::ws::protocol::{MessageEnvelope, ServerEvent};
use crate::ws::sessions::SessionRegistry;

/// Deliver a new message to every member's live sessions except the
/// sender's. The envelope's member list was resolved at creation time;
/// a missing list means the event is malformed and is skipped.
pub fn deliver(sessions: &SessionRegistry, envelope: MessageEnvelope, sender_id: &str) {
    if envelope.chat.members.is_empty() {
        tracing::warn!(
            chat_id = %envelope.chat.id,
            "message envelope has no member list, skipping fan-out"
        );
        return;
    }

    let members = envelope.chat.members.clone();
    let event = ServerEvent::MessageReceived { message: envelope };
    let Some(msg) = event.to_message() else { return };

    send_to_members(sessions, &members, &msg, Some(sender_id));
}

/// Deliver a reaction change to every member, including the actor —
/// their other sessions must see the update too.
pub fn deliver_reaction(sessions: &SessionRegistry, envelope: MessageEnvelope) {
    if envelope.chat.members.is_empty() {
        tracing::warn!(
            chat_id = %envelope.chat.id,
            "reaction envelope has no member list, skipping fan-out"
        );
        return;
    }

    let members = envelope.chat.members.clone();
    let event = ServerEvent::ReactionUpdated { message: envelope };
    let Some(msg) = event.to_message() else { return };

    send_to_members(sessions, &members, &msg, None);
}

/// Deliver a read receipt to every member, including the reader.
pub fn deliver_read(
    sessions: &SessionRegistry,
    chat_id: &str,
    reader_id: &str,
    members: &[String],
) {
    if members.is_empty() {
        tracing::warn!(
            chat_id = %chat_id,
            "read event has no member list, skipping fan-out"
        );
        return;
    }

    let event = ServerEvent::MessagesRead {
        chat_id: chat_id.to_string(),
        reader_id: reader_id.to_string(),
    };
    let Some(msg) = event.to_message() else { return };

    send_to_members(sessions, members, &msg, None);
}

/// Emit to every listed member's live sessions, at most once per
/// member even if the list repeats one, skipping the excluded identity.
fn send_to_members(
    sessions: &SessionRegistry,
    members: &[String],
    msg: &Message,
    exclude: Option<&str>,
) {
    let mut seen: HashSet<&str> = HashSet::new();
    for member in members {
        if Some(member.as_str()) == exclude || !seen.insert(member.as_str()) {
            continue;
        }
        sessions.send_to_user(member, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{ChatSummary, UserSummary};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn envelope(sender: &str, members: &[&str]) -> MessageEnvelope {
        MessageEnvelope {
            id: "m1".to_string(),
            sender: UserSummary {
                id: sender.to_string(),
                name: sender.to_string(),
                avatar_url: String::new(),
            },
            chat: ChatSummary {
                id: "c1".to_string(),
                name: "chat".to_string(),
                is_group: false,
                members: members.iter().map(|m| m.to_string()).collect(),
            },
            content: "hello".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            reactions: vec![],
            read_by: vec![],
        }
    }

    #[test]
    fn delivers_to_every_recipient_connection_except_sender() {
        let sessions = SessionRegistry::new();
        let (a1_tx, mut a1) = mpsc::unbounded_channel();
        let (b1_tx, mut b1) = mpsc::unbounded_channel();
        let (b2_tx, mut b2) = mpsc::unbounded_channel();
        sessions.register("alice", Uuid::new_v4(), a1_tx);
        sessions.register("bob", Uuid::new_v4(), b1_tx);
        sessions.register("bob", Uuid::new_v4(), b2_tx);

        deliver(&sessions, envelope("alice", &["alice", "bob"]), "alice");

        // Both of bob's connections get exactly one event; alice gets none
        assert!(b1.try_recv().is_ok());
        assert!(b1.try_recv().is_err());
        assert!(b2.try_recv().is_ok());
        assert!(b2.try_recv().is_err());
        assert!(a1.try_recv().is_err());
    }

    #[test]
    fn member_with_no_sessions_is_skipped_without_error() {
        let sessions = SessionRegistry::new();
        let (a1_tx, mut a1) = mpsc::unbounded_channel();
        sessions.register("alice", Uuid::new_v4(), a1_tx);

        deliver(&sessions, envelope("alice", &["alice", "ghost"]), "alice");
        assert!(a1.try_recv().is_err());
    }

    #[test]
    fn duplicate_member_entries_deliver_once() {
        let sessions = SessionRegistry::new();
        let (b1_tx, mut b1) = mpsc::unbounded_channel();
        sessions.register("bob", Uuid::new_v4(), b1_tx);

        deliver(&sessions, envelope("alice", &["bob", "bob"]), "alice");
        assert!(b1.try_recv().is_ok());
        assert!(b1.try_recv().is_err());
    }

    #[test]
    fn empty_member_list_skips_fanout() {
        let sessions = SessionRegistry::new();
        let (b1_tx, mut b1) = mpsc::unbounded_channel();
        sessions.register("bob", Uuid::new_v4(), b1_tx);

        deliver(&sessions, envelope("alice", &[]), "alice");
        assert!(b1.try_recv().is_err());
    }

    #[test]
    fn reaction_and_read_events_reach_the_actor_too() {
        let sessions = SessionRegistry::new();
        let (a1_tx, mut a1) = mpsc::unbounded_channel();
        let (a2_tx, mut a2) = mpsc::unbounded_channel();
        let (b1_tx, mut b1) = mpsc::unbounded_channel();
        sessions.register("alice", Uuid::new_v4(), a1_tx);
        sessions.register("alice", Uuid::new_v4(), a2_tx);
        sessions.register("bob", Uuid::new_v4(), b1_tx);

        deliver_reaction(&sessions, envelope("alice", &["alice", "bob"]));
        assert!(a1.try_recv().is_ok());
        assert!(a2.try_recv().is_ok());
        assert!(b1.try_recv().is_ok());

        deliver_read(
            &sessions,
            "c1",
            "alice",
            &["alice".to_string(), "bob".to_string()],
        );
        assert!(a1.try_recv().is_ok());
        assert!(a2.try_recv().is_ok());
        assert!(b1.try_recv().is_ok());
    }
}
