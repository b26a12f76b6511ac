//! Typing indicators.
//!
//! Server side, [`TypingCoordinator`] keeps at most one indicator per
//! `(conversation, user)` and relays start/stop signals to the conversation
//! room. Receivers never rely on a matching stop: [`TypingView`] clears a
//! typer on its own once the expiry window passes.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::db::{self, conversations, users, StoreResult};
use crate::state::AppState;
use crate::ws::protocol::{ServerEvent, TypingSignal};
use crate::ws::{router, ConnectionId, Room};

/// Default lifetime of an indicator after the last start signal.
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(3);

type IndicatorKey = (String, String);

/// Ephemeral typing indicators keyed by (conversation id, user id).
#[derive(Debug)]
pub struct TypingCoordinator {
    indicators: DashMap<IndicatorKey, Instant>,
    ttl: Duration,
}

impl Default for TypingCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TTL)
    }
}

impl TypingCoordinator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            indicators: DashMap::new(),
            ttl,
        }
    }

    /// Upsert the indicator and push its expiry out.
    /// Returns true only if no live indicator existed.
    pub fn start(&self, conversation_id: &str, user_id: &str) -> bool {
        self.start_at(conversation_id, user_id, Instant::now())
    }

    fn start_at(&self, conversation_id: &str, user_id: &str, now: Instant) -> bool {
        let key = (conversation_id.to_string(), user_id.to_string());
        let expires_at = now + self.ttl;
        match self.indicators.entry(key) {
            Entry::Occupied(mut entry) => {
                let was_live = *entry.get() > now;
                entry.insert(expires_at);
                !was_live
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        }
    }

    /// Remove the indicator. Returns true if a live one was removed.
    pub fn stop(&self, conversation_id: &str, user_id: &str) -> bool {
        let key = (conversation_id.to_string(), user_id.to_string());
        self.indicators
            .remove(&key)
            .is_some_and(|(_, expires_at)| expires_at > Instant::now())
    }

    /// Users currently typing in a conversation, sorted.
    pub fn active(&self, conversation_id: &str) -> Vec<String> {
        self.active_at(conversation_id, Instant::now())
    }

    fn active_at(&self, conversation_id: &str, now: Instant) -> Vec<String> {
        let mut users: Vec<String> = self
            .indicators
            .iter()
            .filter(|e| e.key().0 == conversation_id && *e.value() > now)
            .map(|e| e.key().1.clone())
            .collect();
        users.sort();
        users
    }

    /// Drop every indicator a user holds.
    /// Returns the conversations where that user was still live.
    pub fn clear_user(&self, user_id: &str) -> Vec<String> {
        let now = Instant::now();
        let keys: Vec<IndicatorKey> = self
            .indicators
            .iter()
            .filter(|e| e.key().1 == user_id)
            .map(|e| e.key().clone())
            .collect();

        let mut cleared = Vec::new();
        for key in keys {
            if let Some(((conversation_id, _), expires_at)) = self.indicators.remove(&key) {
                if expires_at > now {
                    cleared.push(conversation_id);
                }
            }
        }
        cleared.sort();
        cleared
    }

    /// Forget expired indicators. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let before = self.indicators.len();
        self.indicators.retain(|_, expires_at| *expires_at > now);
        before - self.indicators.len()
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}

/// Relay a typing signal from an authenticated connection.
///
/// Goes to the conversation room, plus the recipient's personal room when
/// one is named, never back to the origin.
pub async fn relay_typing(
    state: &AppState,
    conn_id: ConnectionId,
    user_id: &str,
    signal: TypingSignal,
) {
    let uid = user_id.to_string();
    match db::with_db(&state.db, move |conn| users::privacy_of(conn, &uid)).await {
        Ok(privacy) if !privacy.typing => {
            tracing::debug!(user_id = %user_id, "Typing relay disabled by privacy");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Typing privacy lookup failed");
            return;
        }
    }

    if signal.is_typing {
        state.typing.start(&signal.conversation_id, user_id);
    } else {
        state.typing.stop(&signal.conversation_id, user_id);
    }

    let mut rooms = vec![Room::conversation(&signal.conversation_id)];
    if let Some(recipient) = signal.recipient_id.as_deref() {
        if let Some(recipient_id) = crate::ws::protocol::resolve(state, recipient).await {
            rooms.push(Room::user(recipient_id));
        }
    }

    let event = ServerEvent::Typing {
        conversation_id: signal.conversation_id,
        user_id: user_id.to_string(),
        is_typing: signal.is_typing,
    };
    router::broadcast_to_rooms(&state.connections, &rooms, &event, Some(conn_id));
}

/// Clear a departed user's indicators and tell the affected rooms.
///
/// The stop goes to each conversation room and to the other participants'
/// personal rooms, the same places a start signal can reach.
pub async fn clear_for_user(state: &AppState, user_id: &str) {
    let cleared = state.typing.clear_user(user_id);
    if cleared.is_empty() {
        return;
    }

    let ids = cleared.clone();
    let uid = user_id.to_string();
    let peers = db::with_db(&state.db, move |conn| {
        ids.iter()
            .map(|id| -> StoreResult<Vec<String>> {
                let members = conversations::participants(conn, id)?;
                Ok(members.into_iter().filter(|m| m != &uid).collect())
            })
            .collect::<StoreResult<Vec<_>>>()
    })
    .await
    .unwrap_or_else(|e| {
        tracing::warn!(user_id = %user_id, error = %e, "Typing peer lookup failed");
        vec![Vec::new(); cleared.len()]
    });

    for (conversation_id, others) in cleared.into_iter().zip(peers) {
        let mut rooms = vec![Room::conversation(&conversation_id)];
        rooms.extend(others.into_iter().map(Room::user));
        let event = ServerEvent::Typing {
            conversation_id,
            user_id: user_id.to_string(),
            is_typing: false,
        };
        router::broadcast_to_rooms(&state.connections, &rooms, &event, None);
    }
}

/// Who is shown as typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingSummary {
    None,
    One(String),
    Many(usize),
}

/// Receiver-side typing state for one conversation view.
///
/// Each typer carries a local expiry, so an indicator disappears even when
/// the matching `typing=false` is never delivered.
#[derive(Debug, Clone)]
pub struct TypingView {
    typers: HashMap<String, Instant>,
    ttl: Duration,
}

impl Default for TypingView {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TTL)
    }
}

impl TypingView {
    pub fn new(ttl: Duration) -> Self {
        Self {
            typers: HashMap::new(),
            ttl,
        }
    }

    /// Apply an incoming typing event.
    pub fn observe(&mut self, user_id: &str, is_typing: bool) {
        self.observe_at(user_id, is_typing, Instant::now());
    }

    pub fn observe_at(&mut self, user_id: &str, is_typing: bool, now: Instant) {
        if is_typing {
            self.typers.insert(user_id.to_string(), now + self.ttl);
        } else {
            self.typers.remove(user_id);
        }
    }

    pub fn active(&self) -> Vec<String> {
        self.active_at(Instant::now())
    }

    pub fn active_at(&self, now: Instant) -> Vec<String> {
        let mut typers: Vec<String> = self
            .typers
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(user, _)| user.clone())
            .collect();
        typers.sort();
        typers
    }

    pub fn summary(&self) -> TypingSummary {
        self.summary_at(Instant::now())
    }

    pub fn summary_at(&self, now: Instant) -> TypingSummary {
        let mut active = self.active_at(now);
        match active.len() {
            0 => TypingSummary::None,
            1 => TypingSummary::One(active.remove(0)),
            n => TypingSummary::Many(n),
        }
    }
}
