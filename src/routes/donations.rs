use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;

use crate::auth::AuthenticatedUser;
use crate::db::models::{Donation, DonationStatus, Role};
use crate::db::{self, NewDonation};
use crate::error::ApiError;
use crate::matching;
use crate::rewards::{self, PointAction};
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateDonationRequest {
    pub category: String,
    pub description: String,
    pub quantity: Option<String>,
    pub pickup_address: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Deserialize)]
pub struct DeliverRequest {
    pub recipient_name: Option<String>,
    pub recipient_contact: Option<String>,
    pub people_helped: Option<i64>,
    pub feedback: Option<String>,
}

pub async fn list_donations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let donations = match user.role {
        Role::Donor => db::list_donations_for_donor(&state.db, user.id).await?,
        Role::Volunteer => db::list_donations_for_volunteer(&state.db, user.id).await?,
        Role::Admin => db::list_recent_donations(&state.db, 100).await?,
    };
    Ok(Json(donations))
}

pub async fn create_donation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<CreateDonationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if user.role != Role::Donor {
        return Err(ApiError::Forbidden(
            "Only donors can create donations".to_string(),
        ));
    }
    if req.category.trim().is_empty() || req.description.trim().is_empty() {
        return Err(ApiError::Validation(
            "category and description are required".to_string(),
        ));
    }

    let donor = db::get_user(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

    // Pickup location falls back to the donor's profile.
    let donation = db::create_donation(
        &state.db,
        &NewDonation {
            donor_id: donor.id,
            category: req.category,
            description: req.description,
            quantity: req.quantity,
            pickup_address: req.pickup_address,
            city: req.city.or(donor.city),
            area: req.area.or(donor.area),
            latitude: req.latitude.or(donor.latitude),
            longitude: req.longitude.or(donor.longitude),
        },
        Utc::now(),
    )
    .await?;

    let total = db::count_donations_for_donor(&state.db, donor.id).await?;
    if total == 1 {
        rewards::award_points(&state.db, donor.id, PointAction::FirstDonation).await?;
    }
    rewards::award_points(&state.db, donor.id, PointAction::Donation).await?;

    Ok((StatusCode::CREATED, Json(donation)))
}

pub async fn get_donation(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let donation = db::get_donation(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Donation not found".to_string()))?;
    Ok(Json(donation))
}

pub async fn nearby_donations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    if user.role != Role::Volunteer {
        return Err(ApiError::Forbidden(
            "Only volunteers can view nearby donations".to_string(),
        ));
    }

    let volunteer = db::get_user(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;
    let pending = db::list_pending_donations(&state.db).await?;

    Ok(Json(matching::nearby(volunteer.coordinates(), pending)))
}

pub async fn accept_donation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if user.role != Role::Volunteer {
        return Err(ApiError::Forbidden(
            "Only volunteers can accept donations".to_string(),
        ));
    }

    let donation = require_donation(&state, id).await?;
    if donation.status != DonationStatus::Pending {
        return Err(ApiError::Conflict("Donation already assigned".to_string()));
    }

    // Conditional write: a concurrent accept that got here first wins and
    // this request sees zero rows updated.
    let assigned = db::assign_volunteer(&state.db, id, user.id).await?;
    if !assigned {
        return Err(ApiError::Conflict("Donation already assigned".to_string()));
    }

    tracing::info!(donation_id = id, volunteer_id = user.id, "donation accepted");
    Ok(Json(require_donation(&state, id).await?))
}

pub async fn collect_donation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if user.role != Role::Volunteer {
        return Err(ApiError::Forbidden(
            "Only volunteers can collect donations".to_string(),
        ));
    }

    let donation = require_donation(&state, id).await?;
    if donation.volunteer_id != Some(user.id) {
        return Err(ApiError::Forbidden("Not your donation".to_string()));
    }
    if donation.status != DonationStatus::Assigned {
        return Err(ApiError::Conflict(
            "Donation is not awaiting collection".to_string(),
        ));
    }

    let collected = db::mark_collected(&state.db, id, user.id, Utc::now()).await?;
    if !collected {
        return Err(ApiError::Conflict(
            "Donation is not awaiting collection".to_string(),
        ));
    }

    rewards::award_points(&state.db, user.id, PointAction::VolunteerCollect).await?;
    Ok(Json(require_donation(&state, id).await?))
}

pub async fn deliver_donation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(req): Json<DeliverRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if user.role != Role::Volunteer {
        return Err(ApiError::Forbidden(
            "Only volunteers can deliver donations".to_string(),
        ));
    }

    let donation = require_donation(&state, id).await?;
    if donation.volunteer_id != Some(user.id) {
        return Err(ApiError::Forbidden("Not your donation".to_string()));
    }
    if donation.status != DonationStatus::Collected {
        return Err(ApiError::Conflict(
            "Donation has not been collected yet".to_string(),
        ));
    }

    let delivered = db::mark_delivered(
        &state.db,
        id,
        user.id,
        Utc::now(),
        &req.recipient_name,
        &req.recipient_contact,
    )
    .await?;
    if !delivered {
        return Err(ApiError::Conflict(
            "Donation has not been collected yet".to_string(),
        ));
    }

    db::insert_impact(&state.db, id, req.people_helped, &req.feedback, Utc::now()).await?;
    rewards::award_points(&state.db, user.id, PointAction::VolunteerDeliver).await?;

    tracing::info!(donation_id = id, volunteer_id = user.id, "donation delivered");
    Ok(Json(require_donation(&state, id).await?))
}

async fn require_donation(state: &AppState, id: i64) -> Result<Donation, ApiError> {
    db::get_donation(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Donation not found".to_string()))
}
