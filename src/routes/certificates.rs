use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::auth::AuthenticatedUser;
use crate::db::models::{DonationStatus, Role};
use crate::db;
use crate::error::ApiError;
use crate::AppState;

pub async fn list_certificates(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let certificates = db::list_certificates(&state.db, user.id).await?;
    Ok(Json(certificates))
}

/// Delivered donations visible to the caller, joined with their impact
/// records, plus the total number of people helped.
pub async fn impact_summary(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let delivered = match user.role {
        Role::Donor => {
            let mine = db::list_donations_for_donor(&state.db, user.id).await?;
            mine.into_iter()
                .filter(|d| d.status == DonationStatus::Delivered)
                .collect::<Vec<_>>()
        }
        Role::Volunteer => {
            let mine = db::list_donations_for_volunteer(&state.db, user.id).await?;
            mine.into_iter()
                .filter(|d| d.status == DonationStatus::Delivered)
                .collect::<Vec<_>>()
        }
        Role::Admin => db::list_donations_with_status(&state.db, DonationStatus::Delivered).await?,
    };

    let mut total: i64 = 0;
    let mut impacts = Vec::new();
    for donation in &delivered {
        for impact in db::list_impacts_for_donation(&state.db, donation.id).await? {
            total += impact.people_helped.unwrap_or(0);
            impacts.push(json!({ "donation": donation, "impact": impact }));
        }
    }

    Ok(Json(json!({ "total": total, "impacts": impacts })))
}
