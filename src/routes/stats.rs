use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::auth::AuthenticatedUser;
use crate::db::models::{DonationStatus, Role};
use crate::db;
use crate::error::ApiError;
use crate::matching;
use crate::AppState;

pub async fn stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let stats = match user.role {
        Role::Donor => json!({
            "total": db::count_donations_for_donor(&state.db, user.id).await?,
            "pending": db::count_donor_donations_with_status(&state.db, user.id, DonationStatus::Pending).await?,
            "delivered": db::count_donor_donations_with_status(&state.db, user.id, DonationStatus::Delivered).await?,
        }),
        Role::Volunteer => {
            let volunteer = db::get_user(&state.db, user.id)
                .await?
                .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;
            let pending = db::list_pending_donations(&state.db).await?;
            let available = matching::nearby(volunteer.coordinates(), pending).len();
            json!({
                "available": available,
                "assigned": db::count_volunteer_active(&state.db, user.id).await?,
                "completed": db::count_volunteer_donations_with_status(&state.db, user.id, DonationStatus::Delivered).await?,
            })
        }
        Role::Admin => json!({
            "users": db::count_users(&state.db).await?,
            "donations": db::count_donations(&state.db).await?,
            "delivered": db::count_donations_with_status(&state.db, DonationStatus::Delivered).await?,
            "pending": db::count_donations_with_status(&state.db, DonationStatus::Pending).await?,
        }),
    };
    Ok(Json(stats))
}

pub async fn leaderboard(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let donors = db::top_users_by_role(&state.db, Role::Donor, 10).await?;
    let volunteers = db::top_users_by_role(&state.db, Role::Volunteer, 10).await?;
    Ok(Json(json!({ "donors": donors, "volunteers": volunteers })))
}
