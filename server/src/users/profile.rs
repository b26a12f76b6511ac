//! REST endpoints for user profiles and privacy settings.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::jwt;
use crate::auth::middleware::Claims;
use crate::chat::presence;
use crate::db::models::{PrivacySettings, User};
use crate::db::{self, users::{self, PrivacyUpdate}};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub image: Option<String>,
    pub status_message: String,
    pub is_online: bool,
    /// Omitted for other viewers when the user hides their online status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    pub privacy: PrivacySettings,
}

impl UserResponse {
    /// Profile as seen by `viewer_id`. Users who hide their status always
    /// appear offline to others.
    pub fn for_viewer(user: User, viewer_id: &str) -> Self {
        let visible = user.id == viewer_id || user.privacy.online_status;
        Self {
            is_online: visible && user.is_online,
            last_seen: visible.then_some(user.last_seen),
            id: user.id,
            email: user.email,
            name: user.name,
            image: user.image,
            status_message: user.status_message,
            privacy: user.privacy,
        }
    }
}

/// Public part of a profile, as embedded in listings and search results.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

impl UserSummary {
    pub fn for_viewer(user: User, viewer_id: &str) -> Self {
        let visible = user.id == viewer_id || user.privacy.online_status;
        Self {
            is_online: visible && user.is_online,
            last_seen: visible.then_some(user.last_seen),
            id: user.id,
            name: user.name,
            email: user.email,
            image: user.image,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserResponse {
    pub user: UserResponse,
    pub access_token: String,
}

/// POST /api/users — Create a user and issue an access token.
/// Body: { "email", "name", "image"? }. 409 if the email is taken.
pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), StatusCode> {
    let email = body.email.trim().to_lowercase();
    let name = body.name.trim().to_string();
    if !email.contains('@') || name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user = db::with_db(&state.db, move |conn| {
        users::insert_user(conn, &email, &name, body.image.as_deref())
    })
    .await?;

    let access_token = jwt::issue_access_token(&state.jwt_secret, &user.id, &user.email)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to issue access token");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    tracing::info!(user_id = %user.id, "User created");

    let viewer = user.id.clone();
    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            user: UserResponse::for_viewer(user, &viewer),
            access_token,
        }),
    ))
}

/// GET /api/users/{id} — Profile, presence and privacy. JWT auth required.
pub async fn get_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, StatusCode> {
    let user = db::with_db(&state.db, move |conn| users::find_user(conn, &user_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(UserResponse::for_viewer(user, &claims.sub)))
}

/// PUT /api/users/privacy — Partial privacy update. JWT auth required.
/// Turning `onlineStatus` off takes the user offline immediately.
pub async fn update_privacy(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<PrivacyUpdate>,
) -> Result<Json<PrivacySettings>, StatusCode> {
    let privacy = presence::update_privacy(&state, &claims.sub, body).await?;
    Ok(Json(privacy))
}

const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SEARCH_LIMIT: usize = 50;
const MAX_QUERY_LEN: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub users: Vec<UserSummary>,
}

/// GET /api/users?query=&limit= — Find other users by name or email.
/// JWT auth required. Without a query, lists other users. `limit` is 1..=50
/// and defaults to 10.
pub async fn search_users(
    State(state): State<AppState>,
    claims: Claims,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, StatusCode> {
    let query = params.query.unwrap_or_default();
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if query.chars().count() > MAX_QUERY_LEN || !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let viewer = claims.sub.clone();
    let found = db::with_db(&state.db, move |conn| {
        users::search_users(conn, &viewer, &query, limit)
    })
    .await?;

    Ok(Json(SearchResponse {
        users: found
            .into_iter()
            .map(|user| UserSummary::for_viewer(user, &claims.sub))
            .collect(),
    }))
}
