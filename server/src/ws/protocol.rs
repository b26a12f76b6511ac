//! JSON wire protocol for the real-time socket.
//!
//! Every frame is `{"event": "<name>", "data": <payload>}`. Client frames are
//! decoded into the closed [`ClientEvent`] union at the transport boundary and
//! dispatched exhaustively; anything that does not decode is dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::jwt;
use crate::chat::{fanout, lifecycle, presence, typing};
use crate::db::{self, users};
use crate::state::AppState;
use crate::ws::{router, ConnectionId, Room};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthenticatePayload {
    /// User id or email.
    #[serde(alias = "userId", alias = "email")]
    pub identity: String,
    /// Access token for `identity`. May be omitted when the socket was
    /// opened with `?token=` for the same user.
    #[serde(default, alias = "accessToken")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub conversation_id: String,
    pub is_typing: bool,
    #[serde(default)]
    pub recipient_id: Option<String>,
}

/// A message the client has already persisted over REST, pushed for fanout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OutgoingMessage {
    /// The snapshot to relay, `recipientId` included as sent. Ids are never
    /// minted here.
    pub fn snapshot(&self) -> Result<MessageSnapshot, ProtocolError> {
        let id = non_empty(self.id.as_deref()).ok_or(ProtocolError::MissingField("id"))?;
        let conversation_id = non_empty(self.conversation_id.as_deref())
            .ok_or(ProtocolError::MissingField("conversationId"))?;
        let mut fields = self.fields.clone();
        if let Some(recipient) = &self.recipient_id {
            fields.insert("recipientId".to_string(), Value::String(recipient.clone()));
        }
        Ok(MessageSnapshot {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            fields,
        })
    }
}

/// Persisted message as relayed to peers: canonical id, conversation, and
/// whatever else the stored record carried (sender, content, timestamps).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    pub id: String,
    pub conversation_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionNotice {
    pub conversation_id: String,
    #[serde(default, alias = "participants")]
    pub participant_emails: Vec<String>,
    pub deleted_by: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    #[serde(default = "default_true")]
    pub is_online: bool,
}

fn default_true() -> bool {
    true
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "authenticate")]
    Authenticate(AuthenticatePayload),
    #[serde(rename = "joinConversation")]
    JoinConversation(ConversationRef),
    #[serde(rename = "leaveConversation")]
    LeaveConversation(ConversationRef),
    #[serde(rename = "typing")]
    Typing(TypingSignal),
    #[serde(rename = "sendMessage", alias = "send_message")]
    SendMessage(OutgoingMessage),
    #[serde(rename = "conversation_deleted")]
    ConversationDeleted(DeletionNotice),
    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate(_) => "authenticate",
            Self::JoinConversation(_) => "joinConversation",
            Self::LeaveConversation(_) => "leaveConversation",
            Self::Typing(_) => "typing",
            Self::SendMessage(_) => "sendMessage",
            Self::ConversationDeleted(_) => "conversation_deleted",
            Self::Heartbeat(_) => "heartbeat",
        }
    }

    /// Reject payloads that decoded but cannot be acted on.
    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::Authenticate(p) => require(&p.identity, "identity"),
            Self::JoinConversation(p) | Self::LeaveConversation(p) => {
                require(&p.conversation_id, "conversationId")
            }
            Self::Typing(p) => require(&p.conversation_id, "conversationId"),
            Self::SendMessage(p) => p.snapshot().map(|_| ()),
            Self::ConversationDeleted(p) => {
                require(&p.conversation_id, "conversationId")?;
                require(&p.deleted_by, "deletedBy")
            }
            Self::Heartbeat(_) => Ok(()),
        }
    }
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "authenticated", rename_all = "camelCase")]
    Authenticated { user_id: String, is_online: bool },
    #[serde(rename = "receive_message")]
    ReceiveMessage(MessageSnapshot),
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
    #[serde(rename = "userOnline", rename_all = "camelCase")]
    UserOnline { user_id: String },
    #[serde(rename = "userOffline", rename_all = "camelCase")]
    UserOffline { user_id: String },
    #[serde(rename = "conversation_deleted", rename_all = "camelCase")]
    ConversationDeleted {
        conversation_id: String,
        deleted_by: String,
    },
    /// Only sent when both sides allow read receipts.
    #[serde(rename = "messagesRead", rename_all = "camelCase")]
    MessagesRead {
        conversation_id: String,
        read_by: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::ReceiveMessage(_) => "receive_message",
            Self::Typing { .. } => "typing",
            Self::UserOnline { .. } => "userOnline",
            Self::UserOffline { .. } => "userOffline",
            Self::ConversationDeleted { .. } => "conversation_deleted",
            Self::MessagesRead { .. } => "messagesRead",
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn require(value: &str, field: &'static str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        Err(ProtocolError::MissingField(field))
    } else {
        Ok(())
    }
}

/// Decode and validate one text frame.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, ProtocolError> {
    let event: ClientEvent = serde_json::from_str(text)?;
    event.validate()?;
    Ok(event)
}

/// Handle an incoming text frame: decode, then dispatch.
/// Malformed frames are logged and dropped; nothing is sent back.
/// `verified_user` is the user whose token opened the socket, if any.
pub async fn handle_text_message(
    text: &str,
    state: &AppState,
    conn_id: ConnectionId,
    verified_user: Option<&str>,
) {
    match decode_client_event(text) {
        Ok(event) => dispatch(state, conn_id, verified_user, event).await,
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "Dropping malformed client event");
        }
    }
}

/// Translate a client-supplied identity (id or email) to a user id.
pub async fn resolve(state: &AppState, identity: &str) -> Option<String> {
    let identity = identity.to_string();
    match db::with_db(&state.db, move |conn| users::resolve_identity(conn, &identity)).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(error = %e, "Identity lookup failed");
            None
        }
    }
}

/// Dispatch a decoded event to the component that owns it.
pub async fn dispatch(
    state: &AppState,
    conn_id: ConnectionId,
    verified_user: Option<&str>,
    event: ClientEvent,
) {
    let name = event.name();
    match event {
        ClientEvent::Authenticate(payload) => {
            handle_authenticate(state, conn_id, verified_user, payload).await;
        }
        ClientEvent::JoinConversation(payload) => {
            let room = Room::conversation(payload.conversation_id);
            state.connections.join(conn_id, &room);
            tracing::debug!(conn_id, room = %room, "Joined room");
        }
        ClientEvent::LeaveConversation(payload) => {
            let room = Room::conversation(payload.conversation_id);
            state.connections.leave(conn_id, &room);
            tracing::debug!(conn_id, room = %room, "Left room");
        }
        ClientEvent::Typing(signal) => {
            let Some(user_id) = state.connections.identity_of(conn_id) else {
                tracing::debug!(conn_id, event = name, "Ignoring event from unauthenticated connection");
                return;
            };
            typing::relay_typing(state, conn_id, &user_id, signal).await;
        }
        ClientEvent::SendMessage(message) => {
            let snapshot = match message.snapshot() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(conn_id, error = %e, "Dropping message without snapshot");
                    return;
                }
            };
            let recipient = match message.recipient_id.as_deref() {
                Some(identity) => resolve(state, identity).await,
                None => None,
            };
            fanout::publish(&state.connections, &snapshot, recipient.as_deref(), Some(conn_id));
        }
        ClientEvent::ConversationDeleted(notice) => {
            let mut participants = Vec::with_capacity(notice.participant_emails.len());
            for identity in &notice.participant_emails {
                match resolve(state, identity).await {
                    Some(user_id) => participants.push(user_id),
                    None => tracing::debug!(conn_id, "Skipping unknown participant"),
                }
            }
            let deleted_by = resolve(state, &notice.deleted_by)
                .await
                .unwrap_or(notice.deleted_by);
            lifecycle::notify_deleted(
                &state.connections,
                &notice.conversation_id,
                &participants,
                &deleted_by,
            );
        }
        ClientEvent::Heartbeat(payload) => {
            let Some(user_id) = state.connections.identity_of(conn_id) else {
                tracing::debug!(conn_id, event = name, "Ignoring event from unauthenticated connection");
                return;
            };
            // Failure is already logged by the presence layer
            let _ = presence::heartbeat(state, &user_id, payload.is_online).await;
        }
    }
}

/// The user a connection may bind: the subject of the token sent with
/// `authenticate`, else the user whose token opened the socket.
fn token_subject(
    state: &AppState,
    conn_id: ConnectionId,
    token: Option<&str>,
    verified_user: Option<&str>,
) -> Option<String> {
    match token {
        Some(token) => match jwt::validate_access_token(&state.jwt_secret, token) {
            Ok(claims) => Some(claims.sub),
            Err(e) => {
                tracing::warn!(conn_id, error = %e, "Authenticate with invalid token");
                None
            }
        },
        None => verified_user.map(str::to_string),
    }
}

async fn handle_authenticate(
    state: &AppState,
    conn_id: ConnectionId,
    verified_user: Option<&str>,
    payload: AuthenticatePayload,
) {
    let Some(subject) = token_subject(state, conn_id, payload.token.as_deref(), verified_user)
    else {
        tracing::warn!(conn_id, "Authenticate without a valid token");
        return;
    };
    let Some(user_id) = resolve(state, &payload.identity).await else {
        tracing::warn!(conn_id, "Authenticate for unknown identity");
        return;
    };
    if user_id != subject {
        tracing::warn!(conn_id, "Authenticate identity does not match token");
        return;
    }

    let previous = state.connections.bind_identity(conn_id, &user_id);
    if let Some(old) = previous.filter(|old| old != &user_id) {
        state.connections.leave(conn_id, &Room::user(&old));
        presence::release_identity(state, &old).await;
    }
    state.connections.join(conn_id, &Room::user(&user_id));

    tracing::info!(conn_id, user_id = %user_id, "Connection authenticated");

    let is_online = presence::on_authenticated(state, conn_id, &user_id).await;
    router::send_to_connection(
        &state.connections,
        conn_id,
        &ServerEvent::Authenticated { user_id, is_online },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_every_client_event() {
        let frames = [
            json!({"event": "authenticate", "data": {"identity": "a@example.com"}}),
            json!({"event": "joinConversation", "data": {"conversationId": "42"}}),
            json!({"event": "leaveConversation", "data": {"conversationId": "42"}}),
            json!({"event": "typing", "data": {"conversationId": "42", "isTyping": true}}),
            json!({"event": "sendMessage", "data": {"_id": "m1", "conversationId": "42"}}),
            json!({"event": "conversation_deleted", "data": {
                "conversationId": "42", "participantEmails": ["a@x"], "deletedBy": "a@x"
            }}),
            json!({"event": "heartbeat", "data": {"isOnline": false}}),
        ];
        let names: Vec<&str> = frames
            .iter()
            .map(|f| decode_client_event(&f.to_string()).unwrap().name())
            .collect();
        assert_eq!(
            names,
            [
                "authenticate",
                "joinConversation",
                "leaveConversation",
                "typing",
                "sendMessage",
                "conversation_deleted",
                "heartbeat"
            ]
        );
    }

    #[test]
    fn snake_case_send_message_is_accepted() {
        let frame = json!({"event": "send_message", "data": {
            "id": "m1", "conversationId": "42", "recipientId": "b@example.com", "content": "hi"
        }});
        let ClientEvent::SendMessage(message) = decode_client_event(&frame.to_string()).unwrap()
        else {
            panic!("expected sendMessage");
        };
        assert_eq!(message.recipient_id.as_deref(), Some("b@example.com"));

        let snapshot = message.snapshot().unwrap();
        assert_eq!(snapshot.id, "m1");
        assert_eq!(snapshot.fields["content"], "hi");
        // Relayed as sent, for clients that route on it
        assert_eq!(snapshot.fields["recipientId"], "b@example.com");
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let cases = [
            "not json".to_string(),
            json!({"event": "shout", "data": {}}).to_string(),
            json!({"event": "typing", "data": {"isTyping": true}}).to_string(),
            json!({"event": "typing", "data": {"conversationId": " ", "isTyping": true}}).to_string(),
            json!({"event": "sendMessage", "data": {"conversationId": "42", "content": "no id"}})
                .to_string(),
            json!({"event": "authenticate", "data": {"identity": ""}}).to_string(),
        ];
        for case in &cases {
            assert!(decode_client_event(case).is_err(), "accepted {case}");
        }
    }

    #[test]
    fn server_events_use_camel_case_payloads() {
        let event = ServerEvent::Typing {
            conversation_id: "42".into(),
            user_id: "u1".into(),
            is_typing: true,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "typing", "data": {"conversationId": "42", "userId": "u1", "isTyping": true}})
        );

        let event = ServerEvent::ConversationDeleted {
            conversation_id: "42".into(),
            deleted_by: "u1".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "conversation_deleted", "data": {"conversationId": "42", "deletedBy": "u1"}})
        );
    }

    mod authenticate {
        use super::*;
        use crate::chat::presence::PresenceSettings;
        use crate::db::{init_memory_db, lock};
        use axum::extract::ws::Message;
        use tokio::sync::mpsc;

        struct Fixture {
            state: AppState,
            user_id: String,
            token: String,
        }

        fn fixture() -> Fixture {
            let state =
                AppState::new(init_memory_db().unwrap(), vec![7; 32], PresenceSettings::default());
            let user = {
                let conn = lock(&state.db).unwrap();
                users::insert_user(&conn, "bob@example.com", "Bob", None).unwrap()
            };
            let token = jwt::issue_access_token(&state.jwt_secret, &user.id, &user.email).unwrap();
            Fixture {
                state,
                user_id: user.id,
                token,
            }
        }

        fn authenticate(identity: &str, token: Option<&str>) -> ClientEvent {
            ClientEvent::Authenticate(AuthenticatePayload {
                identity: identity.to_string(),
                token: token.map(str::to_string),
            })
        }

        fn acknowledged(rx: &mut mpsc::UnboundedReceiver<Message>) -> bool {
            matches!(rx.try_recv(), Ok(Message::Text(text)) if text.as_str().contains("authenticated"))
        }

        #[tokio::test]
        async fn claim_without_token_is_not_bound() {
            let f = fixture();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let conn_id = f.state.connections.connect(tx);

            dispatch(&f.state, conn_id, None, authenticate("bob@example.com", None)).await;

            assert!(!acknowledged(&mut rx));
            assert_eq!(f.state.connections.identity_of(conn_id), None);
            let conn = lock(&f.state.db).unwrap();
            assert!(!users::presence_of(&conn, &f.user_id).unwrap().is_online);
        }

        #[tokio::test]
        async fn token_for_another_user_is_rejected() {
            let f = fixture();
            let other = {
                let conn = lock(&f.state.db).unwrap();
                users::insert_user(&conn, "mallory@example.com", "Mallory", None).unwrap()
            };
            let forged = jwt::issue_access_token(&f.state.jwt_secret, &other.id, &other.email).unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let conn_id = f.state.connections.connect(tx);

            dispatch(&f.state, conn_id, None, authenticate("bob@example.com", Some(&forged))).await;
            dispatch(&f.state, conn_id, Some(&other.id), authenticate(&f.user_id, None)).await;
            dispatch(&f.state, conn_id, None, authenticate(&f.user_id, Some("garbage"))).await;

            assert!(!acknowledged(&mut rx));
            assert_eq!(f.state.connections.identity_of(conn_id), None);
        }

        #[tokio::test]
        async fn matching_token_binds_the_connection() {
            let f = fixture();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let conn_id = f.state.connections.connect(tx);
            dispatch(&f.state, conn_id, None, authenticate("bob@example.com", Some(&f.token))).await;
            assert!(acknowledged(&mut rx));
            assert_eq!(f.state.connections.identity_of(conn_id), Some(f.user_id.clone()));

            // Socket opened with ?token= for the same user needs no payload token
            let (tx, mut rx) = mpsc::unbounded_channel();
            let second = f.state.connections.connect(tx);
            dispatch(&f.state, second, Some(&f.user_id), authenticate("bob@example.com", None)).await;
            assert!(acknowledged(&mut rx));
        }

        fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(Message::Text(text)) = rx.try_recv() {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                out.push(value["event"].as_str().unwrap_or_default().to_string());
            }
            out
        }

        #[tokio::test]
        async fn heartbeat_refreshes_last_seen_and_announces_flips_only() {
            let f = fixture();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let conn_id = f.state.connections.connect(tx);
            let (watcher_tx, mut watcher_rx) = mpsc::unbounded_channel();
            f.state.connections.connect(watcher_tx);
            dispatch(&f.state, conn_id, None, authenticate("bob@example.com", Some(&f.token))).await;
            drain(&mut rx);
            assert_eq!(drain(&mut watcher_rx), vec!["userOnline"]);

            let long_ago = "2000-01-01T00:00:00.000Z";
            {
                let conn = lock(&f.state.db).unwrap();
                users::write_presence(&conn, &f.user_id, true, long_ago).unwrap();
            }
            let heartbeat = |is_online| ClientEvent::Heartbeat(HeartbeatPayload { is_online });

            dispatch(&f.state, conn_id, None, heartbeat(true)).await;
            let record = users::presence_of(&lock(&f.state.db).unwrap(), &f.user_id).unwrap();
            assert!(record.is_online);
            assert!(record.last_seen.as_str() > long_ago);
            assert!(drain(&mut watcher_rx).is_empty());

            dispatch(&f.state, conn_id, None, heartbeat(false)).await;
            assert_eq!(drain(&mut watcher_rx), vec!["userOffline"]);
            dispatch(&f.state, conn_id, None, heartbeat(false)).await;
            assert!(drain(&mut watcher_rx).is_empty());
            dispatch(&f.state, conn_id, None, heartbeat(true)).await;
            assert_eq!(drain(&mut watcher_rx), vec!["userOnline"]);
        }

        #[tokio::test]
        async fn heartbeat_from_anonymous_connection_is_ignored() {
            let f = fixture();
            let (tx, _rx) = mpsc::unbounded_channel();
            let conn_id = f.state.connections.connect(tx);
            let event = ClientEvent::Heartbeat(HeartbeatPayload { is_online: true });
            dispatch(&f.state, conn_id, None, event).await;
            let conn = lock(&f.state.db).unwrap();
            assert!(!users::presence_of(&conn, &f.user_id).unwrap().is_online);
        }

        #[tokio::test]
        async fn rebinding_takes_the_previous_identity_offline() {
            let f = fixture();
            let alice = {
                let conn = lock(&f.state.db).unwrap();
                users::insert_user(&conn, "alice@example.com", "Alice", None).unwrap()
            };
            let alice_token =
                jwt::issue_access_token(&f.state.jwt_secret, &alice.id, &alice.email).unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();
            let conn_id = f.state.connections.connect(tx);
            let (watcher_tx, mut watcher_rx) = mpsc::unbounded_channel();
            f.state.connections.connect(watcher_tx);

            dispatch(&f.state, conn_id, None, authenticate(&alice.email, Some(&alice_token))).await;
            assert!(acknowledged(&mut rx));
            drain(&mut watcher_rx);

            dispatch(&f.state, conn_id, None, authenticate("bob@example.com", Some(&f.token))).await;
            assert_eq!(f.state.connections.identity_of(conn_id), Some(f.user_id.clone()));
            assert!(!f.state.connections.is_member(conn_id, &Room::user(&alice.id)));
            assert!(f.state.connections.is_member(conn_id, &Room::user(&f.user_id)));
            assert_eq!(f.state.connections.connections_for_identity(&alice.id), 0);

            let conn = lock(&f.state.db).unwrap();
            assert!(!users::presence_of(&conn, &alice.id).unwrap().is_online);
            assert!(users::presence_of(&conn, &f.user_id).unwrap().is_online);
            assert_eq!(drain(&mut watcher_rx), vec!["userOffline", "userOnline"]);
        }
    }
}
