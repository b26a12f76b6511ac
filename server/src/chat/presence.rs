//! Online/offline presence.
//!
//! The durable `is_online` / `last_seen` columns are the source of truth.
//! Connection lifecycle and heartbeats write them through the store's
//! privacy-gated presence functions, then the outcome is announced to every
//! live connection. A periodic sweep flips users whose heartbeat went stale.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::auth::middleware::Claims;
use crate::chat::typing;
use crate::db::models::{PresenceRecord, PrivacySettings};
use crate::db::users::{self, PrivacyUpdate};
use crate::db::{self, format_timestamp, now_timestamp, StoreResult};
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;
use crate::ws::{router, ConnectionId, Departure};

/// Heartbeat and staleness windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSettings {
    /// How often clients are expected to send a heartbeat
    pub heartbeat_interval: Duration,
    /// A user whose last heartbeat is older than this is considered gone
    pub stale_after: Duration,
    /// How often the sweep runs
    pub sweep_interval: Duration,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

fn announce_online(state: &AppState, user_id: &str, exclude: Option<ConnectionId>) {
    let event = ServerEvent::UserOnline {
        user_id: user_id.to_string(),
    };
    let delivered = router::broadcast_to_all(&state.connections, &event, exclude);
    tracing::debug!(user_id = %user_id, delivered, "Announced online");
}

fn announce_offline(state: &AppState, user_id: &str) {
    let event = ServerEvent::UserOffline {
        user_id: user_id.to_string(),
    };
    let delivered = router::broadcast_to_all(&state.connections, &event, None);
    tracing::debug!(user_id = %user_id, delivered, "Announced offline");
}

// --- Connection lifecycle ---

/// Mark a freshly authenticated user online, if their privacy allows it,
/// and announce it to everyone but the origin. Returns the stored state.
pub async fn on_authenticated(state: &AppState, conn_id: ConnectionId, user_id: &str) -> bool {
    let uid = user_id.to_string();
    let written = db::with_db(&state.db, move |conn| {
        users::write_presence(conn, &uid, true, &now_timestamp())
    })
    .await;

    match written {
        Ok(record) if record.is_online => {
            announce_online(state, user_id, Some(conn_id));
            true
        }
        Ok(_) => {
            tracing::debug!(user_id = %user_id, "Online status hidden, not announced");
            false
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to write presence");
            false
        }
    }
}

/// Presence side of a closed socket.
///
/// Only the user's last live connection takes them offline. The offline
/// write never consults privacy.
pub async fn on_disconnect(state: &AppState, departure: &Departure) {
    let Some(user_id) = departure.identity.as_deref() else {
        return;
    };
    if departure.remaining > 0 {
        tracing::debug!(
            user_id = %user_id,
            remaining = departure.remaining,
            "User still connected elsewhere"
        );
        return;
    }
    go_offline(state, user_id).await;
}

/// A connection re-bound away from `user_id`; take them offline if that
/// was their last connection.
pub async fn release_identity(state: &AppState, user_id: &str) {
    if state.connections.connections_for_identity(user_id) == 0 {
        go_offline(state, user_id).await;
    }
}

async fn go_offline(state: &AppState, user_id: &str) {
    typing::clear_for_user(state, user_id).await;

    let uid = user_id.to_string();
    if let Err(e) =
        db::with_db(&state.db, move |conn| users::write_offline(conn, &uid, &now_timestamp())).await
    {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to write offline presence");
    }
    // Announced even when the write failed
    announce_offline(state, user_id);
}

// --- Heartbeat ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    pub presence: PresenceRecord,
    pub privacy_enabled: bool,
}

/// Refresh `last_seen` and write the requested online state, privacy-gated.
/// Announces only when the stored state actually flipped.
pub async fn heartbeat(
    state: &AppState,
    user_id: &str,
    is_online: bool,
) -> StoreResult<HeartbeatOutcome> {
    let uid = user_id.to_string();
    let (before, after, privacy) = db::with_db(&state.db, move |conn| {
        let before = users::presence_of(conn, &uid)?;
        let after = users::write_presence(conn, &uid, is_online, &now_timestamp())?;
        let privacy = users::privacy_of(conn, &uid)?;
        Ok((before, after, privacy))
    })
    .await
    .inspect_err(|e| tracing::warn!(user_id = %user_id, error = %e, "Heartbeat write failed"))?;

    if before.is_online != after.is_online {
        if after.is_online {
            announce_online(state, user_id, None);
        } else {
            announce_offline(state, user_id);
        }
    }

    Ok(HeartbeatOutcome {
        presence: after,
        privacy_enabled: privacy.online_status,
    })
}

// --- Privacy ---

/// Persist a privacy update and apply its presence consequences.
pub async fn update_privacy(
    state: &AppState,
    user_id: &str,
    update: PrivacyUpdate,
) -> StoreResult<PrivacySettings> {
    let uid = user_id.to_string();
    let (before, after) = db::with_db(&state.db, move |conn| {
        let before = users::privacy_of(conn, &uid)?;
        let after = users::update_privacy(conn, &uid, &update)?;
        Ok((before, after))
    })
    .await?;

    if before.online_status != after.online_status {
        apply_visibility(state, user_id, after.online_status).await;
    }
    if before.typing && !after.typing {
        typing::clear_for_user(state, user_id).await;
    }

    tracing::info!(user_id = %user_id, ?after, "Privacy settings updated");
    Ok(after)
}

/// Toggle the online-status privacy flag.
pub async fn set_online_status_privacy(
    state: &AppState,
    user_id: &str,
    enabled: bool,
) -> StoreResult<PrivacySettings> {
    let update = PrivacyUpdate {
        online_status: Some(enabled),
        ..Default::default()
    };
    update_privacy(state, user_id, update).await
}

async fn apply_visibility(state: &AppState, user_id: &str, enabled: bool) {
    if !enabled {
        go_offline(state, user_id).await;
        return;
    }
    if state.connections.connections_for_identity(user_id) == 0 {
        return;
    }

    let uid = user_id.to_string();
    match db::with_db(&state.db, move |conn| {
        users::write_presence(conn, &uid, true, &now_timestamp())
    })
    .await
    {
        Ok(record) if record.is_online => announce_online(state, user_id, None),
        Ok(_) => {}
        Err(e) => tracing::warn!(user_id = %user_id, error = %e, "Failed to write presence"),
    }
}

// --- Staleness sweep ---

/// Flip every online user with a stale heartbeat offline and announce each.
/// Safe to run at any time; already-offline users are untouched.
pub async fn sweep_stale(state: &AppState) -> StoreResult<Vec<String>> {
    let stale_after = chrono::Duration::from_std(state.presence.stale_after)
        .unwrap_or_else(|_| chrono::Duration::minutes(2));
    let cutoff = format_timestamp(Utc::now() - stale_after);

    let flipped = db::with_db(&state.db, move |conn| users::sweep_stale(conn, &cutoff)).await?;
    for user_id in &flipped {
        typing::clear_for_user(state, user_id).await;
        announce_offline(state, user_id);
    }

    if !flipped.is_empty() {
        tracing::info!(count = flipped.len(), "Presence sweep set users offline");
    }
    Ok(flipped)
}

/// Spawn the periodic presence sweep. Also prunes expired typing indicators.
pub fn spawn_presence_sweep(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(state.presence.sweep_interval);
        // Skip the first immediate tick
        timer.tick().await;
        loop {
            timer.tick().await;
            if let Err(e) = sweep_stale(&state).await {
                tracing::warn!(error = %e, "Presence sweep failed");
            }
            state.typing.prune();
        }
    })
}

// --- REST endpoint handlers ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub is_online: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub is_online: bool,
    pub last_seen: String,
    pub privacy_enabled: bool,
}

/// PUT /api/users/status — REST heartbeat. JWT auth required.
/// Body: { "isOnline": bool }
pub async fn update_status(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<StatusRequest>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let outcome = heartbeat(&state, &claims.sub, body.is_online).await?;

    Ok(Json(StatusResponse {
        success: true,
        is_online: outcome.presence.is_online,
        last_seen: outcome.presence.last_seen,
        privacy_enabled: outcome.privacy_enabled,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub success: bool,
    pub users_set_offline: usize,
}

/// GET /api/users/cleanup — Run the staleness sweep on demand.
pub async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupResponse>, StatusCode> {
    let flipped = sweep_stale(&state).await?;

    Ok(Json(CleanupResponse {
        success: true,
        users_set_offline: flipped.len(),
    }))
}
