use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{
    MessageKind, MessageRow, NotificationKind, NotificationRow, UserBrief,
};
use crate::store::{NewMessage, Store, StoreError};

use super::delivery::Delivery;
use super::events::{ClientEvent, ServerEvent};
use super::notifier::Notifier;
use super::presence::PresenceRegistry;
use super::reminder::ReminderSweep;
use super::socket::{handle_event, ConnState};

/* ============================================================
   In-memory store
   ============================================================ */

#[derive(Default)]
struct MemInner {
    notifications: Vec<NotificationRow>,
    messages: Vec<MessageRow>,
    conversations: HashMap<Uuid, ConvRec>,
    pending_forms: i64,
    doctors: Vec<Uuid>,
    users: HashMap<Uuid, UserBrief>,
}

struct ConvRec {
    participants: Vec<Uuid>,
    last_message: Option<String>,
}

#[derive(Default)]
struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    fn add_conversation(&self, conversation_id: Uuid, participants: Vec<Uuid>) {
        self.inner.lock().unwrap().conversations.insert(
            conversation_id,
            ConvRec {
                participants,
                last_message: None,
            },
        );
    }

    fn set_pending_forms(&self, n: i64) {
        self.inner.lock().unwrap().pending_forms = n;
    }

    fn set_doctors(&self, ids: Vec<Uuid>) {
        self.inner.lock().unwrap().doctors = ids;
    }

    fn add_user(&self, user_id: Uuid, display_name: &str, role: &str) {
        self.inner.lock().unwrap().users.insert(
            user_id,
            UserBrief {
                user_id,
                display_name: display_name.to_string(),
                role: role.to_string(),
            },
        );
    }

    fn last_message(&self, conversation_id: Uuid) -> Option<String> {
        self.inner.lock().unwrap().conversations[&conversation_id]
            .last_message
            .clone()
    }

    fn messages_in(&self, conversation_id: Uuid) -> Vec<MessageRow> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    fn notifications_for(&self, user_id: Uuid) -> Vec<NotificationRow> {
        self.inner
            .lock()
            .unwrap()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_notification(
        &self,
        recipient_id: Uuid,
        kind: NotificationKind,
        message: &str,
        link: &str,
        recurring: bool,
    ) -> Result<NotificationRow, StoreError> {
        let row = NotificationRow {
            notification_id: Uuid::new_v4(),
            user_id: recipient_id,
            kind,
            message: message.to_string(),
            link: link.to_string(),
            read: false,
            recurring,
            created_at: Utc::now(),
        };
        self.inner.lock().unwrap().notifications.push(row.clone());
        Ok(row)
    }

    async fn has_unread_reminder(&self, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().notifications.iter().any(|n| {
            n.user_id == user_id && n.kind == NotificationKind::Reminder && !n.read
        }))
    }

    async fn create_message(&self, new: NewMessage) -> Result<MessageRow, StoreError> {
        let row = MessageRow {
            message_id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            text: new.text,
            attachment_url: new.attachment_url,
            kind: new.kind,
            read_by: vec![new.sender_id],
            created_at: Utc::now(),
        };
        self.inner.lock().unwrap().messages.push(row.clone());
        Ok(row)
    }

    async fn append_read_by(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut changed = 0;
        for m in inner
            .messages
            .iter_mut()
            .filter(|m| m.conversation_id == conversation_id)
        {
            if !m.read_by.contains(&reader_id) {
                m.read_by.push(reader_id);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn touch_conversation(
        &self,
        conversation_id: Uuid,
        summary: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let conv = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(StoreError::NotFound("conversation"))?;
        conv.last_message = Some(summary.to_string());
        Ok(())
    }

    async fn conversation_participants(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .conversations
            .get(&conversation_id)
            .map(|c| c.participants.clone())
            .ok_or(StoreError::NotFound("conversation"))
    }

    async fn pending_form_count(&self) -> Result<i64, StoreError> {
        Ok(self.inner.lock().unwrap().pending_forms)
    }

    async fn doctor_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.inner.lock().unwrap().doctors.clone())
    }

    async fn user_brief(&self, user_id: Uuid) -> Result<Option<UserBrief>, StoreError> {
        Ok(self.inner.lock().unwrap().users.get(&user_id).cloned())
    }
}

/* ============================================================
   Helpers
   ============================================================ */

fn setup() -> (Arc<MemStore>, Arc<dyn Store>, Arc<PresenceRegistry>) {
    let mem = Arc::new(MemStore::default());
    let store: Arc<dyn Store> = mem.clone();
    (mem, store, Arc::new(PresenceRegistry::new()))
}

/// Join a user through the relay dispatch, returning the connection state
/// and the receiving end of its event channel.
async fn join(
    store: &Arc<dyn Store>,
    registry: &Arc<PresenceRegistry>,
    user_id: Uuid,
) -> (ConnState, mpsc::UnboundedReceiver<ServerEvent>) {
    let mut conn = ConnState::new();
    let (tx, rx) = mpsc::unbounded_channel();
    handle_event(store, registry, &mut conn, &tx, ClientEvent::Join { user_id }).await;
    (conn, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

/* ============================================================
   Presence registry
   ============================================================ */

#[tokio::test]
async fn at_most_one_presence_entry_per_user() {
    let (_, store, registry) = setup();
    let u1 = Uuid::new_v4();

    let (c1, _rx1) = join(&store, &registry, u1).await;
    let (c2, _rx2) = join(&store, &registry, u1).await;

    assert_eq!(registry.entry_count(), 1);
    assert_eq!(registry.get_session(u1), Some(c2.session_id));
    assert_ne!(c1.session_id, c2.session_id);
}

#[tokio::test]
async fn stale_disconnect_does_not_evict_newer_session() {
    let (_, store, registry) = setup();
    let u1 = Uuid::new_v4();

    let (c1, _rx1) = join(&store, &registry, u1).await;
    let (c2, _rx2) = join(&store, &registry, u1).await;

    // The slow disconnect for the superseded session arrives after the new join.
    assert!(registry.remove_by_session(c1.session_id).is_empty());
    assert_eq!(registry.get_session(u1), Some(c2.session_id));

    assert_eq!(registry.remove_by_session(c2.session_id), vec![u1]);
    assert_eq!(registry.get_session(u1), None);
}

#[tokio::test]
async fn rejoin_as_other_user_releases_previous_identity() {
    let (_, store, registry) = setup();
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();

    // One connection identifying twice must not leave the first user behind.
    let mut conn = ConnState::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    handle_event(&store, &registry, &mut conn, &tx, ClientEvent::Join { user_id: u1 }).await;
    handle_event(&store, &registry, &mut conn, &tx, ClientEvent::Join { user_id: u2 }).await;

    assert_eq!(registry.entry_count(), 1);
    assert_eq!(registry.get_session(u1), None);
    assert_eq!(registry.get_session(u2), Some(conn.session_id));

    // Disconnect cleanup leaves nothing behind either way.
    registry.remove_by_session(conn.session_id);
    assert_eq!(registry.entry_count(), 0);
    assert_eq!(registry.get_session(u2), None);
}

#[tokio::test]
async fn reconnect_preserves_registered_peer_id() {
    let (_, store, registry) = setup();
    let u1 = Uuid::new_v4();

    registry.set_peer_id(u1, "peer-abc".into());
    let (_c, _rx) = join(&store, &registry, u1).await;

    assert_eq!(registry.get_peer_id(u1), Some("peer-abc".into()));
}

#[tokio::test]
async fn join_broadcasts_online_to_other_sessions() {
    let (_, store, registry) = setup();
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();

    let (_c1, mut rx1) = join(&store, &registry, u1).await;
    let (_c2, _rx2) = join(&store, &registry, u2).await;

    let events = drain(&mut rx1);
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::UserOnline { user_id } if *user_id == u2)));
}

#[tokio::test]
async fn online_matching_filters_by_predicate() {
    let (_, store, registry) = setup();
    let doctor = Uuid::new_v4();
    let marketer = Uuid::new_v4();

    let (_c1, _rx1) = join(&store, &registry, doctor).await;
    let (_c2, _rx2) = join(&store, &registry, marketer).await;

    let online = registry.online_matching(|uid, _| *uid == doctor);
    assert_eq!(online, vec![doctor]);
}

/* ============================================================
   Notification pusher
   ============================================================ */

#[tokio::test]
async fn push_persists_even_when_recipient_offline() {
    let (mem, store, registry) = setup();
    let notifier = Notifier::new(store, Delivery::new(registry));
    let u1 = Uuid::new_v4();

    let row = notifier
        .push(u1, NotificationKind::Reminder, "msg", "/link", false)
        .await
        .unwrap();

    assert!(!row.read);
    assert_eq!(row.user_id, u1);
    assert_eq!(mem.notifications_for(u1).len(), 1);
}

#[tokio::test]
async fn push_delivers_live_when_recipient_online() {
    let (_, store, registry) = setup();
    let notifier = Notifier::new(store.clone(), Delivery::new(registry.clone()));
    let u1 = Uuid::new_v4();

    let (_c, mut rx) = join(&store, &registry, u1).await;

    let row = notifier
        .push(u1, NotificationKind::Form, "new form", "/forms/1", false)
        .await
        .unwrap();

    let events = drain(&mut rx);
    let delivered = events.iter().find_map(|e| match e {
        ServerEvent::NotificationNew(n) => Some(n),
        _ => None,
    });
    assert_eq!(
        delivered.map(|n| n.notification_id),
        Some(row.notification_id)
    );
}

/* ============================================================
   Message relay
   ============================================================ */

#[tokio::test]
async fn send_fans_out_to_present_participants() {
    let (mem, store, registry) = setup();
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();
    let c1 = Uuid::new_v4();
    mem.add_conversation(c1, vec![u1, u2]);
    mem.add_user(u1, "Marla Marketer", "marketer");

    let (mut conn1, mut rx1) = join(&store, &registry, u1).await;
    let (_conn2, mut rx2) = join(&store, &registry, u2).await;
    drain(&mut rx1);
    drain(&mut rx2);

    let (tx1, _) = mpsc::unbounded_channel();
    handle_event(
        &store,
        &registry,
        &mut conn1,
        &tx1,
        ClientEvent::MessageSend {
            conversation_id: c1,
            sender_id: u1,
            text: Some("hi".into()),
            attachment_url: None,
            kind: None,
        },
    )
    .await;

    // Both participants receive the sender-enriched record.
    for rx in [&mut rx1, &mut rx2] {
        let events = drain(rx);
        let payload = events
            .iter()
            .find_map(|e| match e {
                ServerEvent::MessageNew(p) => Some(p),
                _ => None,
            })
            .expect("message:new not delivered");
        assert_eq!(payload.message.text.as_deref(), Some("hi"));
        assert_eq!(payload.message.read_by, vec![u1]);
        assert_eq!(
            payload.sender.as_ref().map(|s| s.display_name.as_str()),
            Some("Marla Marketer")
        );
    }
    assert_eq!(mem.last_message(c1).as_deref(), Some("hi"));
}

#[tokio::test]
async fn attachment_only_send_uses_kind_label_summary() {
    let (mem, store, registry) = setup();
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();
    let c1 = Uuid::new_v4();
    mem.add_conversation(c1, vec![u1, u2]);

    let (mut conn1, _rx1) = join(&store, &registry, u1).await;
    let (tx1, _) = mpsc::unbounded_channel();
    handle_event(
        &store,
        &registry,
        &mut conn1,
        &tx1,
        ClientEvent::MessageSend {
            conversation_id: c1,
            sender_id: u1,
            text: None,
            attachment_url: Some("https://cdn/voice.ogg".into()),
            kind: Some(MessageKind::Voice),
        },
    )
    .await;

    assert_eq!(mem.last_message(c1).as_deref(), Some("Voice message"));
}

#[tokio::test]
async fn send_before_join_is_dropped() {
    let (mem, store, registry) = setup();
    let c1 = Uuid::new_v4();
    mem.add_conversation(c1, vec![Uuid::new_v4()]);

    let mut conn = ConnState::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    handle_event(
        &store,
        &registry,
        &mut conn,
        &tx,
        ClientEvent::MessageSend {
            conversation_id: c1,
            sender_id: Uuid::new_v4(),
            text: Some("hi".into()),
            attachment_url: None,
            kind: None,
        },
    )
    .await;

    assert!(mem.messages_in(c1).is_empty());
}

#[tokio::test]
async fn mark_read_is_idempotent() {
    let (mem, store, registry) = setup();
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();
    let c1 = Uuid::new_v4();
    mem.add_conversation(c1, vec![u1, u2]);

    store
        .create_message(NewMessage {
            conversation_id: c1,
            sender_id: u1,
            text: Some("hello".into()),
            attachment_url: None,
            kind: MessageKind::Text,
        })
        .await
        .unwrap();

    let (mut conn2, _rx2) = join(&store, &registry, u2).await;
    let (tx2, _) = mpsc::unbounded_channel();
    let read = ClientEvent::MessageRead {
        conversation_id: c1,
        user_id: u2,
    };
    handle_event(&store, &registry, &mut conn2, &tx2, read.clone()).await;
    let after_once: Vec<Vec<Uuid>> =
        mem.messages_in(c1).into_iter().map(|m| m.read_by).collect();

    handle_event(&store, &registry, &mut conn2, &tx2, read).await;
    let after_twice: Vec<Vec<Uuid>> =
        mem.messages_in(c1).into_iter().map(|m| m.read_by).collect();

    assert_eq!(after_once, vec![vec![u1, u2]]);
    assert_eq!(after_once, after_twice);
}

#[tokio::test]
async fn mark_read_notifies_present_participants() {
    let (mem, store, registry) = setup();
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();
    let c1 = Uuid::new_v4();
    mem.add_conversation(c1, vec![u1, u2]);

    let (_conn1, mut rx1) = join(&store, &registry, u1).await;
    let (mut conn2, _rx2) = join(&store, &registry, u2).await;
    drain(&mut rx1);

    let (tx2, _) = mpsc::unbounded_channel();
    handle_event(
        &store,
        &registry,
        &mut conn2,
        &tx2,
        ClientEvent::MessageRead {
            conversation_id: c1,
            user_id: u2,
        },
    )
    .await;

    let events = drain(&mut rx1);
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::MessageReadUpdate { conversation_id, user_id }
            if *conversation_id == c1 && *user_id == u2
    )));
}

/* ============================================================
   Call signaling
   ============================================================ */

#[tokio::test]
async fn call_offer_broadcasts_to_other_sessions_only() {
    let (_, store, registry) = setup();
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();

    let (mut conn1, mut rx1) = join(&store, &registry, u1).await;
    let (_conn2, mut rx2) = join(&store, &registry, u2).await;
    drain(&mut rx1);
    drain(&mut rx2);

    let payload = serde_json::json!({ "sdp": "v=0", "to": u2 });
    let (tx1, _) = mpsc::unbounded_channel();
    handle_event(
        &store,
        &registry,
        &mut conn1,
        &tx1,
        ClientEvent::CallOffer(payload.clone()),
    )
    .await;

    let got = drain(&mut rx2);
    assert!(got
        .iter()
        .any(|e| matches!(e, ServerEvent::CallOffer(p) if *p == payload)));
    // The caller's own session is excluded from the broadcast.
    assert!(drain(&mut rx1).is_empty());
}

/* ============================================================
   Reminder sweep
   ============================================================ */

#[tokio::test]
async fn sweep_deduplicates_unread_reminders() {
    let (mem, store, registry) = setup();
    let doctor = Uuid::new_v4();
    mem.set_pending_forms(2);
    mem.set_doctors(vec![doctor]);

    let delivery = Delivery::new(registry.clone());
    let notifier = Arc::new(Notifier::new(store.clone(), delivery.clone()));
    let sweep = ReminderSweep::new(store.clone(), notifier, delivery);

    sweep.sweep_once().await.unwrap();
    sweep.sweep_once().await.unwrap();

    let reminders: Vec<_> = mem
        .notifications_for(doctor)
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Reminder && !n.read)
        .collect();
    assert_eq!(reminders.len(), 1);
    assert!(reminders[0].recurring);
}

#[tokio::test]
async fn sweep_pings_online_doctors_every_tick() {
    let (mem, store, registry) = setup();
    let doctor = Uuid::new_v4();
    mem.set_pending_forms(3);
    mem.set_doctors(vec![doctor]);

    let (_conn, mut rx) = join(&store, &registry, doctor).await;

    let delivery = Delivery::new(registry.clone());
    let notifier = Arc::new(Notifier::new(store.clone(), delivery.clone()));
    let sweep = ReminderSweep::new(store.clone(), notifier, delivery);

    sweep.sweep_once().await.unwrap();
    sweep.sweep_once().await.unwrap();

    // The persisted reminder dedups; the live ping does not.
    let pings = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::ReminderPing { pending: 3 }))
        .count();
    assert_eq!(pings, 2);
}

#[tokio::test]
async fn sweep_with_empty_backlog_is_silent() {
    let (mem, store, registry) = setup();
    let doctor = Uuid::new_v4();
    mem.set_pending_forms(0);
    mem.set_doctors(vec![doctor]);

    let delivery = Delivery::new(registry.clone());
    let notifier = Arc::new(Notifier::new(store.clone(), delivery.clone()));
    let sweep = ReminderSweep::new(store.clone(), notifier, delivery);

    sweep.sweep_once().await.unwrap();
    assert!(mem.notifications_for(doctor).is_empty());
}

/* ============================================================
   End-to-end scenarios
   ============================================================ */

#[tokio::test]
async fn offline_user_still_gets_persisted_notification() {
    let (mem, store, registry) = setup();
    let u1 = Uuid::new_v4();
    let bystander = Uuid::new_v4();

    let (conn, mut rx1) = join(&store, &registry, u1).await;
    let (_c2, mut rx2) = join(&store, &registry, bystander).await;
    registry.remove_by_session(conn.session_id);
    assert_eq!(registry.get_session(u1), None);

    let notifier = Notifier::new(store, Delivery::new(registry));
    let row = notifier
        .push(u1, NotificationKind::Reminder, "msg", "/link", false)
        .await
        .unwrap();

    assert!(!row.read);
    assert_eq!(mem.notifications_for(u1).len(), 1);

    // Persisted only: no live emit reaches the closed channel or anyone else.
    assert!(!drain(&mut rx1)
        .iter()
        .any(|e| matches!(e, ServerEvent::NotificationNew(_))));
    assert!(!drain(&mut rx2)
        .iter()
        .any(|e| matches!(e, ServerEvent::NotificationNew(_))));
}
