//! Gamification: the points ledger and the certificate eligibility engine.
//!
//! Every award re-runs certificate evaluation for the user, so a certificate
//! can only appear as a consequence of a point-earning lifecycle step.

use chrono::Utc;

use crate::db::models::{Certificate, DonationStatus, Role, Tier, User};
use crate::db::{self, DbPool};

/// Point-earning actions. Values are fixed; totals only ever grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointAction {
    Donation,
    VolunteerCollect,
    VolunteerDeliver,
    FirstDonation,
}

impl PointAction {
    pub fn points(self) -> i64 {
        match self {
            PointAction::Donation => 10,
            PointAction::VolunteerCollect => 15,
            PointAction::VolunteerDeliver => 20,
            PointAction::FirstDonation => 50,
        }
    }
}

/// Thresholds in strictly descending order; evaluation stops at the first
/// tier the delivered count reaches.
const TIER_THRESHOLDS: [(i64, Tier); 4] = [
    (100, Tier::Platinum),
    (50, Tier::Gold),
    (20, Tier::Silver),
    (5, Tier::Bronze),
];

/// Adds the action's value to the user's running total, then re-checks
/// certificate eligibility. Returns the new total.
pub async fn award_points(
    pool: &DbPool,
    user_id: i64,
    action: PointAction,
) -> anyhow::Result<i64> {
    let user = db::get_user(pool, user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {} not found", user_id))?;

    let total = db::add_user_points(pool, user_id, action.points()).await?;
    tracing::debug!(user_id, action = ?action, total, "awarded points");

    evaluate_certificates(pool, &user).await?;
    Ok(total)
}

/// Issues at most one certificate: the highest tier whose threshold the
/// user's delivered-donation count meets, and only if that exact tier has
/// not been issued before. Lower tiers are never back-filled, so a count
/// that jumps past several thresholds between evaluations skips them for
/// good.
pub async fn evaluate_certificates(
    pool: &DbPool,
    user: &User,
) -> anyhow::Result<Option<Certificate>> {
    let delivered = match user.role {
        Role::Donor => {
            db::count_donor_donations_with_status(pool, user.id, DonationStatus::Delivered).await?
        }
        Role::Volunteer => {
            db::count_volunteer_donations_with_status(pool, user.id, DonationStatus::Delivered)
                .await?
        }
        Role::Admin => return Ok(None),
    };

    for (threshold, tier) in TIER_THRESHOLDS {
        if delivered >= threshold {
            if db::certificate_exists(pool, user.id, tier).await? {
                return Ok(None);
            }
            let cert = db::insert_certificate(pool, user.id, tier, delivered, Utc::now()).await?;
            tracing::info!(user_id = user.id, tier = tier.as_str(), delivered, "issued certificate");
            return Ok(Some(cert));
        }
    }
    Ok(None)
}
