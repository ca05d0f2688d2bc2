use chrono::Utc;
use sharecircle::db::models::{DonationStatus, Role, User};
use sharecircle::db::{self, DbPool, NewDonation, NewUser};
use sharecircle::matching;
use sharecircle::rewards::{self, PointAction};
use uuid::Uuid;

fn test_pool(name: &str) -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(name);
    let pool = db::init_pool_at(path.to_str().expect("utf8 path")).expect("init pool");
    (dir, pool)
}

async fn register_user(pool: &DbPool, role: Role, coords: Option<(f64, f64)>) -> User {
    let name = format!("test-user-{}", Uuid::new_v4());
    db::create_user(
        pool,
        &NewUser {
            username: name.clone(),
            email: format!("{}@example.com", name),
            password_hash: "unused".to_string(),
            role,
            phone: None,
            city: Some("Mumbai".to_string()),
            area: None,
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
        },
        Utc::now(),
    )
    .await
    .expect("create user")
}

#[tokio::test]
async fn donation_lifecycle_awards_points_and_records_impact() {
    let (_dir, pool) = test_pool("lifecycle.db");

    // Donor in central Mumbai; volunteer roughly 10 km north.
    let donor = register_user(&pool, Role::Donor, Some((19.0760, 72.8777))).await;
    let volunteer = register_user(&pool, Role::Volunteer, Some((19.1600, 72.8500))).await;

    let donation = db::create_donation(
        &pool,
        &NewDonation {
            donor_id: donor.id,
            category: "food".to_string(),
            description: "cooked meals for ten".to_string(),
            quantity: Some("10 boxes".to_string()),
            pickup_address: Some("12 Hill Road".to_string()),
            city: donor.city.clone(),
            area: None,
            latitude: donor.latitude,
            longitude: donor.longitude,
        },
        Utc::now(),
    )
    .await
    .expect("create donation");
    assert_eq!(donation.status, DonationStatus::Pending);

    // First donation: 50 + 10 points, same as the create handler awards.
    let total = db::count_donations_for_donor(&pool, donor.id)
        .await
        .expect("count donations");
    assert_eq!(total, 1);
    rewards::award_points(&pool, donor.id, PointAction::FirstDonation)
        .await
        .expect("first donation award");
    let donor_points = rewards::award_points(&pool, donor.id, PointAction::Donation)
        .await
        .expect("donation award");
    assert_eq!(donor_points, 60);

    // The matcher surfaces the pickup for the nearby volunteer.
    let pending = db::list_pending_donations(&pool).await.expect("pending");
    let matches = matching::nearby(volunteer.coordinates(), pending);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].donation.id, donation.id);
    assert!(matches[0].distance <= matching::MATCH_RADIUS_KM);

    // Accept binds the volunteer; a rival accept loses the conditional write.
    assert!(db::assign_volunteer(&pool, donation.id, volunteer.id)
        .await
        .expect("accept"));
    let rival = register_user(&pool, Role::Volunteer, None).await;
    assert!(!db::assign_volunteer(&pool, donation.id, rival.id)
        .await
        .expect("rival accept"));

    let assigned = db::get_donation(&pool, donation.id)
        .await
        .expect("get donation")
        .expect("donation exists");
    assert_eq!(assigned.status, DonationStatus::Assigned);
    assert_eq!(assigned.volunteer_id, Some(volunteer.id));

    // Collect: timestamp set, volunteer gains 15 points.
    assert!(db::mark_collected(&pool, donation.id, volunteer.id, Utc::now())
        .await
        .expect("collect"));
    let volunteer_points = rewards::award_points(&pool, volunteer.id, PointAction::VolunteerCollect)
        .await
        .expect("collect award");
    assert_eq!(volunteer_points, 15);
    let collected = db::get_donation(&pool, donation.id)
        .await
        .expect("get donation")
        .expect("donation exists");
    assert_eq!(collected.status, DonationStatus::Collected);
    assert!(collected.collected_at.is_some());

    // Deliver: recipient recorded, impact created, 20 more points.
    assert!(db::mark_delivered(
        &pool,
        donation.id,
        volunteer.id,
        Utc::now(),
        &Some("Asha".to_string()),
        &Some("9876500000".to_string()),
    )
    .await
    .expect("deliver"));
    db::insert_impact(
        &pool,
        donation.id,
        Some(5),
        &Some("fed a family of five".to_string()),
        Utc::now(),
    )
    .await
    .expect("insert impact");
    let volunteer_points = rewards::award_points(&pool, volunteer.id, PointAction::VolunteerDeliver)
        .await
        .expect("deliver award");
    assert_eq!(volunteer_points, 35);

    let delivered = db::get_donation(&pool, donation.id)
        .await
        .expect("get donation")
        .expect("donation exists");
    assert_eq!(delivered.status, DonationStatus::Delivered);
    assert!(delivered.delivered_at.is_some());
    assert_eq!(delivered.recipient_name.as_deref(), Some("Asha"));

    let impacts = db::list_impacts_for_donation(&pool, donation.id)
        .await
        .expect("list impacts");
    assert_eq!(impacts.len(), 1);
    assert_eq!(impacts[0].people_helped, Some(5));
}

#[tokio::test]
async fn status_transitions_only_move_forward() {
    let (_dir, pool) = test_pool("transitions.db");
    let donor = register_user(&pool, Role::Donor, None).await;
    let volunteer = register_user(&pool, Role::Volunteer, None).await;

    let donation = db::create_donation(
        &pool,
        &NewDonation {
            donor_id: donor.id,
            category: "clothes".to_string(),
            description: "winter jackets".to_string(),
            quantity: None,
            pickup_address: None,
            city: None,
            area: None,
            latitude: None,
            longitude: None,
        },
        Utc::now(),
    )
    .await
    .expect("create donation");

    // Collect and deliver both refuse a donation that is still pending.
    assert!(!db::mark_collected(&pool, donation.id, volunteer.id, Utc::now())
        .await
        .expect("collect on pending"));
    assert!(
        !db::mark_delivered(&pool, donation.id, volunteer.id, Utc::now(), &None, &None)
            .await
            .expect("deliver on pending")
    );

    assert!(db::assign_volunteer(&pool, donation.id, volunteer.id)
        .await
        .expect("accept"));

    // Deliver still refuses until the pickup has been collected.
    assert!(
        !db::mark_delivered(&pool, donation.id, volunteer.id, Utc::now(), &None, &None)
            .await
            .expect("deliver on assigned")
    );

    // A different volunteer cannot collect someone else's assignment.
    let rival = register_user(&pool, Role::Volunteer, None).await;
    assert!(!db::mark_collected(&pool, donation.id, rival.id, Utc::now())
        .await
        .expect("rival collect"));

    assert!(db::mark_collected(&pool, donation.id, volunteer.id, Utc::now())
        .await
        .expect("collect"));
    assert!(
        db::mark_delivered(&pool, donation.id, volunteer.id, Utc::now(), &None, &None)
            .await
            .expect("deliver")
    );

    // Delivered is terminal.
    assert!(!db::assign_volunteer(&pool, donation.id, rival.id)
        .await
        .expect("accept after delivery"));
}
