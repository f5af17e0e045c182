//! Check-in API endpoints
//!
//! - POST /api/v1/checkins - Check in at a venue
//! - GET /api/v1/checkins - List check-ins with filters
//! - DELETE /api/v1/checkins/{id} - Remove a check-in

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{ActiveFilter, CheckinFilter, SortOrder};
use crate::services::CreateCheckinInput;

/// Query parameters for listing check-ins
#[derive(Debug, Deserialize)]
pub struct ListCheckinsQuery {
    pub venue: Option<i64>,
    pub user: Option<i64>,
    pub min_age: Option<i64>,
    pub max_age: Option<i64>,
    /// "true" (default), "false" or "all"
    pub active: Option<String>,
    /// "desc" (default) or "asc"
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(default)]
    pub no_cache: bool,
}

impl ListCheckinsQuery {
    fn into_filter(self) -> Result<CheckinFilter, ApiError> {
        let active = match self.active.as_deref() {
            Some(s) => s
                .parse::<ActiveFilter>()
                .map_err(|e| ApiError::validation_error(e.to_string()))?,
            None => ActiveFilter::default(),
        };
        let sort = match self.sort.as_deref() {
            Some(s) => s
                .parse::<SortOrder>()
                .map_err(|e| ApiError::validation_error(e.to_string()))?,
            None => SortOrder::default(),
        };
        Ok(CheckinFilter {
            venue_id: self.venue,
            user_id: self.user,
            min_age: self.min_age,
            max_age: self.max_age,
            active,
            sort,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// Request body for creating a check-in
#[derive(Debug, Deserialize)]
pub struct CreateCheckinRequest {
    pub venue_id: i64,
    /// Admin only, defaults to the caller
    pub user_id: Option<i64>,
}

/// Response for a single check-in
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckinResponse {
    pub id: i64,
    pub venue_id: i64,
    pub user_id: i64,
    pub user_age: i64,
    pub active: bool,
    pub expires_at: String,
    pub created_at: String,
}

impl From<crate::models::Checkin> for CheckinResponse {
    fn from(c: crate::models::Checkin) -> Self {
        Self {
            id: c.id,
            venue_id: c.venue_id,
            user_id: c.user_id,
            user_age: c.user_age,
            active: c.active,
            expires_at: c.expires_at.to_rfc3339(),
            created_at: c.created_at.to_rfc3339(),
        }
    }
}

/// Response for check-in listings
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckinListResponse {
    pub checkins: Vec<CheckinResponse>,
    pub total: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_checkin))
        .route("/", get(list_checkins))
        .route("/{id}", delete(delete_checkin))
}

/// POST /api/v1/checkins - Check in at a venue
///
/// Replaces any previous active check-in for the same user.
async fn create_checkin(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Json(body): Json<CreateCheckinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let checkin = state
        .checkin_service
        .create(
            &user,
            CreateCheckinInput {
                venue_id: body.venue_id,
                user_id: body.user_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(CheckinResponse::from(checkin))))
}

/// GET /api/v1/checkins - List check-ins
async fn list_checkins(
    State(state): State<AppState>,
    Query(query): Query<ListCheckinsQuery>,
) -> Result<Json<CheckinListResponse>, ApiError> {
    let no_cache = query.no_cache;
    let filter = query.into_filter()?;

    let checkins = state.checkin_service.list(&filter, no_cache).await?;
    let total = checkins.len();

    Ok(Json(CheckinListResponse {
        checkins: checkins.into_iter().map(CheckinResponse::from).collect(),
        total,
    }))
}

/// DELETE /api/v1/checkins/{id} - Remove a check-in (owner or admin)
async fn delete_checkin(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.checkin_service.delete(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
