//! Venue API endpoints
//!
//! - GET /api/v1/venues - List venues
//! - GET /api/v1/venues/{id} - Get a venue with its schedule
//! - POST /api/v1/venues - Create a venue (admin)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::models::ScheduleEntry;

/// Request body for creating a venue
#[derive(Debug, Deserialize)]
pub struct CreateVenueRequest {
    pub name: String,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntryBody>,
}

/// One weekday's opening hours, minutes from midnight
#[derive(Debug, Deserialize)]
pub struct ScheduleEntryBody {
    pub weekday: u32,
    pub opens_at: i64,
    pub closes_at: i64,
}

/// Response for a single venue
#[derive(Debug, Serialize, Deserialize)]
pub struct VenueResponse {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Vec<ScheduleEntryResponse>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleEntryResponse {
    pub weekday: u32,
    pub opens_at: i64,
    pub closes_at: i64,
}

impl From<crate::models::Venue> for VenueResponse {
    fn from(v: crate::models::Venue) -> Self {
        Self {
            id: v.id,
            name: v.name,
            created_at: v.created_at.to_rfc3339(),
            schedule: None,
        }
    }
}

impl VenueResponse {
    pub fn with_schedule(mut self, schedule: Vec<ScheduleEntry>) -> Self {
        self.schedule = Some(
            schedule
                .into_iter()
                .map(|e| ScheduleEntryResponse {
                    weekday: e.weekday,
                    opens_at: e.opens_at,
                    closes_at: e.closes_at,
                })
                .collect(),
        );
        self
    }
}

/// Response for venue listings
#[derive(Debug, Serialize, Deserialize)]
pub struct VenueListResponse {
    pub venues: Vec<VenueResponse>,
    pub total: usize,
}

/// POST /api/v1/venues - Create a venue (admin)
pub async fn create_venue(
    State(state): State<AppState>,
    Json(body): Json<CreateVenueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::validation_error("Venue name cannot be empty"));
    }
    for entry in &body.schedule {
        if !(1..=7).contains(&entry.weekday) {
            return Err(ApiError::validation_error(
                "Schedule weekday must be between 1 and 7",
            ));
        }
        if entry.opens_at < 0 || entry.closes_at <= entry.opens_at {
            return Err(ApiError::validation_error(
                "Schedule closing time must be after the opening time",
            ));
        }
    }

    let schedule: Vec<ScheduleEntry> = body
        .schedule
        .iter()
        .map(|e| ScheduleEntry {
            weekday: e.weekday,
            opens_at: e.opens_at,
            closes_at: e.closes_at,
        })
        .collect();

    let venue = state
        .venue_repo
        .create(&body.name, &schedule)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    let response = VenueResponse::from(venue).with_schedule(schedule);
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/venues - List venues
pub async fn list_venues(
    State(state): State<AppState>,
) -> Result<Json<VenueListResponse>, ApiError> {
    let venues = state
        .venue_repo
        .list()
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    let total = venues.len();

    Ok(Json(VenueListResponse {
        venues: venues.into_iter().map(VenueResponse::from).collect(),
        total,
    }))
}

/// GET /api/v1/venues/{id} - Venue with schedule
pub async fn get_venue(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<VenueResponse>, ApiError> {
    let venue = state
        .venue_repo
        .get_by_id(id)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
        .ok_or_else(|| ApiError::not_found(format!("Venue {}", id)))?;

    let schedule = state
        .venue_repo
        .schedule(id)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    Ok(Json(VenueResponse::from(venue).with_schedule(schedule)))
}
