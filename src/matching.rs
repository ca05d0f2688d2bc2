//! Proximity matching between volunteers and pending donations.
//!
//! Pure functions over already-loaded rows; callers fetch the candidate set
//! and persist nothing. Re-running with unchanged inputs yields the same
//! result.

use serde::Serialize;

use crate::db::models::Donation;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Maximum volunteer-to-pickup distance considered a match.
pub const MATCH_RADIUS_KM: f64 = 20.0;

/// Great-circle distance in kilometers between two (latitude, longitude)
/// pairs in degrees, via the haversine formula.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    EARTH_RADIUS_KM * 2.0 * a.sqrt().asin()
}

/// A pending donation within range, annotated with its distance to the
/// volunteer (km, rounded to two decimals).
#[derive(Serialize, Debug, Clone)]
pub struct MatchedDonation {
    #[serde(flatten)]
    pub donation: Donation,
    pub distance: f64,
}

/// Filters `candidates` down to those within [`MATCH_RADIUS_KM`] of the
/// volunteer, sorted ascending by distance (scan order breaks ties).
///
/// A volunteer without coordinates on file matches nothing. Candidates
/// without pickup coordinates are skipped rather than treated as distance
/// zero.
pub fn nearby(
    volunteer_coords: Option<(f64, f64)>,
    candidates: Vec<Donation>,
) -> Vec<MatchedDonation> {
    let Some((lat, lon)) = volunteer_coords else {
        return Vec::new();
    };

    let mut matches: Vec<MatchedDonation> = candidates
        .into_iter()
        .filter_map(|donation| {
            let (d_lat, d_lon) = match (donation.latitude, donation.longitude) {
                (Some(a), Some(b)) => (a, b),
                _ => return None,
            };
            let distance = haversine_km(lat, lon, d_lat, d_lon);
            if distance > MATCH_RADIUS_KM {
                return None;
            }
            Some(MatchedDonation {
                donation,
                distance: (distance * 100.0).round() / 100.0,
            })
        })
        .collect();

    // Stable sort keeps scan order for equal distances.
    matches.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::DonationStatus;
    use chrono::Utc;

    fn donation_at(id: i64, coords: Option<(f64, f64)>) -> Donation {
        Donation {
            id,
            donor_id: 1,
            volunteer_id: None,
            category: "food".to_string(),
            description: "rice and lentils".to_string(),
            quantity: Some("5 kg".to_string()),
            pickup_address: None,
            city: None,
            area: None,
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
            status: DonationStatus::Pending,
            created_at: Utc::now(),
            collected_at: None,
            delivered_at: None,
            recipient_name: None,
            recipient_contact: None,
        }
    }

    #[test]
    fn distance_is_symmetric() {
        let d1 = haversine_km(19.076, 72.8777, 18.5204, 73.8567);
        let d2 = haversine_km(18.5204, 73.8567, 19.076, 72.8777);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn distance_to_self_is_zero() {
        assert_eq!(haversine_km(19.076, 72.8777, 19.076, 72.8777), 0.0);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_km(18.0, 73.0, 19.0, 73.0);
        assert!((d - 111.0).abs() < 1.0, "got {} km", d);
    }

    #[test]
    fn nearby_filters_by_radius_and_sorts_ascending() {
        let volunteer = Some((19.0760, 72.8777)); // Mumbai
        let candidates = vec![
            donation_at(1, Some((19.2183, 72.9781))), // ~19 km, in range
            donation_at(2, Some((18.5204, 73.8567))), // Pune, ~120 km, out
            donation_at(3, Some((19.0821, 72.8805))), // < 1 km, in range
        ];

        let matches = nearby(volunteer, candidates);
        let ids: Vec<i64> = matches.iter().map(|m| m.donation.id).collect();
        assert_eq!(ids, vec![3, 1]);
        for m in &matches {
            assert!(m.distance <= MATCH_RADIUS_KM);
        }
        for pair in matches.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn nearby_rounds_distance_to_two_decimals() {
        let matches = nearby(Some((19.0, 72.0)), vec![donation_at(1, Some((19.05, 72.05)))]);
        assert_eq!(matches.len(), 1);
        let d = matches[0].distance;
        assert_eq!((d * 100.0).round() / 100.0, d);
    }

    #[test]
    fn volunteer_without_coordinates_matches_nothing() {
        let candidates = vec![
            donation_at(1, Some((19.0760, 72.8777))),
            donation_at(2, Some((19.0821, 72.8805))),
        ];
        assert!(nearby(None, candidates).is_empty());
    }

    #[test]
    fn candidates_without_coordinates_are_skipped() {
        let matches = nearby(
            Some((19.0760, 72.8777)),
            vec![donation_at(1, None), donation_at(2, Some((19.0821, 72.8805)))],
        );
        let ids: Vec<i64> = matches.iter().map(|m| m.donation.id).collect();
        assert_eq!(ids, vec![2]);
    }
}
