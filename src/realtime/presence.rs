//! In-memory presence registry: user id -> live connection metadata.
//!
//! One process-wide instance, constructor-injected into everything that
//! needs to reach a user (socket relay, notification pusher, reminder
//! sweep, stats). Presence is process-local; horizontal scaling would
//! require an external store behind the same interface.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Per-user connection metadata. At most one entry per user id; a new
/// connection for the same user overwrites the previous one
/// (last-connect-wins, no multi-device fan-out).
pub struct PresenceEntry {
    pub session_id: Uuid,
    pub peer_id: Option<String>,
    /// None for entries created by peer-id registration before any live
    /// socket exists for the user.
    sender: Option<EventSender>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    // The lock is only ever held for synchronous map operations, never
    // across an await.
    inner: Mutex<HashMap<Uuid, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the user's live connection, preserving any registered peer id.
    /// Broadcasts `user:online` to all other connected sessions.
    pub fn set_presence(&self, user_id: Uuid, session_id: Uuid, sender: EventSender) {
        let mut map = self.inner.lock().unwrap();
        let peer_id = map.remove(&user_id).and_then(|e| e.peer_id);
        map.insert(
            user_id,
            PresenceEntry {
                session_id,
                peer_id,
                sender: Some(sender),
            },
        );
        Self::broadcast_locked(&map, Some(session_id), &ServerEvent::UserOnline { user_id });
        tracing::info!(%user_id, %session_id, "user connected");
    }

    /// Upsert the peer (call-signaling) id, creating a detached entry if the
    /// user has no live connection yet. Broadcasts `peer:available`.
    pub fn set_peer_id(&self, user_id: Uuid, peer_id: String) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(user_id).or_insert_with(|| PresenceEntry {
            session_id: Uuid::new_v4(),
            peer_id: None,
            sender: None,
        });
        entry.peer_id = Some(peer_id.clone());
        let session_id = entry.session_id;
        Self::broadcast_locked(
            &map,
            Some(session_id),
            &ServerEvent::PeerAvailable { user_id, peer_id },
        );
    }

    pub fn get_session(&self, user_id: Uuid) -> Option<Uuid> {
        self.inner
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|e| e.session_id)
    }

    pub fn get_peer_id(&self, user_id: Uuid) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .get(&user_id)
            .and_then(|e| e.peer_id.clone())
    }

    pub(super) fn sender_for(&self, user_id: Uuid) -> Option<EventSender> {
        self.inner
            .lock()
            .unwrap()
            .get(&user_id)
            .and_then(|e| e.sender.clone())
    }

    /// Remove every entry bound to the session and broadcast `user:offline`
    /// for each removed user. Disconnect events only carry the session
    /// handle, hence the O(n) scan; stale disconnects for a session already
    /// superseded by a newer join are silently ignored.
    pub fn remove_by_session(&self, session_id: Uuid) -> Vec<Uuid> {
        let mut map = self.inner.lock().unwrap();
        let user_ids: Vec<Uuid> = map
            .iter()
            .filter(|(_, e)| e.session_id == session_id)
            .map(|(uid, _)| *uid)
            .collect();
        for user_id in &user_ids {
            map.remove(user_id);
            Self::broadcast_locked(&map, None, &ServerEvent::UserOffline { user_id: *user_id });
            tracing::info!(%user_id, %session_id, "user disconnected");
        }
        user_ids
    }

    /// Release the user's entry only if it still belongs to `session_id`;
    /// a newer connection for the same user is left untouched. Broadcasts
    /// `user:offline` when an entry is removed.
    pub fn release_identity(&self, user_id: Uuid, session_id: Uuid) {
        let mut map = self.inner.lock().unwrap();
        if !matches!(map.get(&user_id), Some(e) if e.session_id == session_id) {
            return;
        }
        map.remove(&user_id);
        Self::broadcast_locked(&map, None, &ServerEvent::UserOffline { user_id });
        tracing::info!(%user_id, %session_id, "user identity released");
    }

    /// User ids whose entry satisfies the predicate (e.g. intersect with the
    /// doctor id set for online-doctor stats).
    pub fn online_matching<F>(&self, mut predicate: F) -> Vec<Uuid>
    where
        F: FnMut(&Uuid, &PresenceEntry) -> bool,
    {
        let map = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for (uid, entry) in map.iter() {
            if entry.sender.is_some() && predicate(uid, entry) {
                out.push(*uid);
            }
        }
        out
    }

    /// Best-effort targeted send. Returns false when the user is offline or
    /// the connection is already gone.
    pub fn send_to(&self, user_id: Uuid, event: ServerEvent) -> bool {
        match self.sender_for(user_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Broadcast to every connected session except `except_session`.
    pub fn broadcast_except(&self, except_session: Option<Uuid>, event: &ServerEvent) {
        let map = self.inner.lock().unwrap();
        Self::broadcast_locked(&map, except_session, event);
    }

    fn broadcast_locked(
        map: &HashMap<Uuid, PresenceEntry>,
        except_session: Option<Uuid>,
        event: &ServerEvent,
    ) {
        for entry in map.values() {
            if Some(entry.session_id) == except_session {
                continue;
            }
            if let Some(tx) = &entry.sender {
                // Send errors just mean the reader task is gone; the entry
                // will be removed when its disconnect lands.
                let _ = tx.send(event.clone());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
