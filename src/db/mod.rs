use anyhow::Context;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::env;

pub mod models;

use models::{Certificate, Donation, DonationStatus, Impact, Role, Tier, User};

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL,
    phone TEXT,
    city TEXT,
    area TEXT,
    latitude REAL,
    longitude REAL,
    points INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS donations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    donor_id INTEGER NOT NULL REFERENCES users(id),
    volunteer_id INTEGER REFERENCES users(id),
    category TEXT NOT NULL,
    description TEXT NOT NULL,
    quantity TEXT,
    pickup_address TEXT,
    city TEXT,
    area TEXT,
    latitude REAL,
    longitude REAL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    collected_at TEXT,
    delivered_at TEXT,
    recipient_name TEXT,
    recipient_contact TEXT
);

CREATE INDEX IF NOT EXISTS idx_donations_status ON donations(status);
CREATE INDEX IF NOT EXISTS idx_donations_donor ON donations(donor_id);
CREATE INDEX IF NOT EXISTS idx_donations_volunteer ON donations(volunteer_id);

CREATE TABLE IF NOT EXISTS certificates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    tier TEXT NOT NULL,
    donations_count INTEGER NOT NULL,
    issued_at TEXT NOT NULL,
    UNIQUE (user_id, tier)
);

CREATE TABLE IF NOT EXISTS impacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    donation_id INTEGER NOT NULL REFERENCES donations(id),
    people_helped INTEGER,
    feedback TEXT,
    created_at TEXT NOT NULL
);
";

pub async fn init_pool() -> anyhow::Result<DbPool> {
    let path = env::var("DATABASE_PATH").unwrap_or_else(|_| "sharecircle.db".to_string());
    init_pool_at(&path)
}

pub fn init_pool_at(path: &str) -> anyhow::Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = Pool::builder()
        .max_size(10)
        .connection_timeout(std::time::Duration::from_secs(60))
        .build(manager)
        .map_err(|e| anyhow::anyhow!("Failed to create DB pool: {}", e))?;

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA).context("applying schema")?;
    Ok(pool)
}

// ---- users ----

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, phone, city, area, latitude, longitude, points, created_at";

pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        phone: row.get(5)?,
        city: row.get(6)?,
        area: row.get(7)?,
        latitude: row.get(8)?,
        longitude: row.get(9)?,
        points: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn get_user_on(conn: &Connection, id: i64) -> anyhow::Result<Option<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))?;
    Ok(stmt.query_row(params![id], user_from_row).optional()?)
}

pub async fn create_user(pool: &DbPool, new: &NewUser, now: DateTime<Utc>) -> anyhow::Result<User> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO users (username, email, password_hash, role, phone, city, area, latitude, longitude, points, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
        params![
            new.username,
            new.email,
            new.password_hash,
            new.role,
            new.phone,
            new.city,
            new.area,
            new.latitude,
            new.longitude,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_user_on(&conn, id)?.ok_or_else(|| anyhow::anyhow!("user {} missing after insert", id))
}

pub async fn get_user(pool: &DbPool, id: i64) -> anyhow::Result<Option<User>> {
    let conn = pool.get()?;
    get_user_on(&conn, id)
}

pub async fn find_user_by_username(pool: &DbPool, username: &str) -> anyhow::Result<Option<User>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE username = ?1",
        USER_COLUMNS
    ))?;
    Ok(stmt.query_row(params![username], user_from_row).optional()?)
}

pub async fn find_user_by_email(pool: &DbPool, email: &str) -> anyhow::Result<Option<User>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS))?;
    Ok(stmt.query_row(params![email], user_from_row).optional()?)
}

/// Adds to the stored running total in a single conditional write and returns
/// the new total. Points only ever move upward.
pub async fn add_user_points(pool: &DbPool, id: i64, delta: i64) -> anyhow::Result<i64> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE users SET points = points + ?2 WHERE id = ?1",
        params![id, delta],
    )?;
    if updated == 0 {
        anyhow::bail!("user {} not found", id);
    }
    let points =
        conn.query_row("SELECT points FROM users WHERE id = ?1", params![id], |row| {
            row.get(0)
        })?;
    Ok(points)
}

pub async fn top_users_by_role(pool: &DbPool, role: Role, limit: i64) -> anyhow::Result<Vec<User>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE role = ?1 ORDER BY points DESC LIMIT ?2",
        USER_COLUMNS
    ))?;
    let rows = stmt.query_map(params![role, limit], user_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub async fn count_users(pool: &DbPool) -> anyhow::Result<i64> {
    let conn = pool.get()?;
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

// ---- donations ----

const DONATION_COLUMNS: &str = "id, donor_id, volunteer_id, category, description, quantity, \
     pickup_address, city, area, latitude, longitude, status, created_at, collected_at, \
     delivered_at, recipient_name, recipient_contact";

pub struct NewDonation {
    pub donor_id: i64,
    pub category: String,
    pub description: String,
    pub quantity: Option<String>,
    pub pickup_address: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn donation_from_row(row: &Row<'_>) -> rusqlite::Result<Donation> {
    Ok(Donation {
        id: row.get(0)?,
        donor_id: row.get(1)?,
        volunteer_id: row.get(2)?,
        category: row.get(3)?,
        description: row.get(4)?,
        quantity: row.get(5)?,
        pickup_address: row.get(6)?,
        city: row.get(7)?,
        area: row.get(8)?,
        latitude: row.get(9)?,
        longitude: row.get(10)?,
        status: row.get(11)?,
        created_at: row.get(12)?,
        collected_at: row.get(13)?,
        delivered_at: row.get(14)?,
        recipient_name: row.get(15)?,
        recipient_contact: row.get(16)?,
    })
}

fn get_donation_on(conn: &Connection, id: i64) -> anyhow::Result<Option<Donation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM donations WHERE id = ?1",
        DONATION_COLUMNS
    ))?;
    Ok(stmt.query_row(params![id], donation_from_row).optional()?)
}

pub async fn create_donation(
    pool: &DbPool,
    new: &NewDonation,
    now: DateTime<Utc>,
) -> anyhow::Result<Donation> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO donations (donor_id, category, description, quantity, pickup_address, city, area, latitude, longitude, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10)",
        params![
            new.donor_id,
            new.category,
            new.description,
            new.quantity,
            new.pickup_address,
            new.city,
            new.area,
            new.latitude,
            new.longitude,
            now
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_donation_on(&conn, id)?.ok_or_else(|| anyhow::anyhow!("donation {} missing after insert", id))
}

pub async fn get_donation(pool: &DbPool, id: i64) -> anyhow::Result<Option<Donation>> {
    let conn = pool.get()?;
    get_donation_on(&conn, id)
}

pub async fn list_donations_for_donor(pool: &DbPool, donor_id: i64) -> anyhow::Result<Vec<Donation>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM donations WHERE donor_id = ?1 ORDER BY created_at DESC, id DESC",
        DONATION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![donor_id], donation_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub async fn list_donations_for_volunteer(
    pool: &DbPool,
    volunteer_id: i64,
) -> anyhow::Result<Vec<Donation>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM donations WHERE volunteer_id = ?1 ORDER BY created_at DESC, id DESC",
        DONATION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![volunteer_id], donation_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub async fn list_recent_donations(pool: &DbPool, limit: i64) -> anyhow::Result<Vec<Donation>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM donations ORDER BY created_at DESC, id DESC LIMIT ?1",
        DONATION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![limit], donation_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub async fn list_pending_donations(pool: &DbPool) -> anyhow::Result<Vec<Donation>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM donations WHERE status = 'pending' ORDER BY created_at DESC, id DESC",
        DONATION_COLUMNS
    ))?;
    let rows = stmt.query_map([], donation_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub async fn list_donations_with_status(
    pool: &DbPool,
    status: DonationStatus,
) -> anyhow::Result<Vec<Donation>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM donations WHERE status = ?1 ORDER BY created_at DESC, id DESC",
        DONATION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![status], donation_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub async fn count_donations_for_donor(pool: &DbPool, donor_id: i64) -> anyhow::Result<i64> {
    let conn = pool.get()?;
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM donations WHERE donor_id = ?1",
        params![donor_id],
        |row| row.get(0),
    )?)
}

pub async fn count_donor_donations_with_status(
    pool: &DbPool,
    donor_id: i64,
    status: DonationStatus,
) -> anyhow::Result<i64> {
    let conn = pool.get()?;
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM donations WHERE donor_id = ?1 AND status = ?2",
        params![donor_id, status],
        |row| row.get(0),
    )?)
}

pub async fn count_volunteer_donations_with_status(
    pool: &DbPool,
    volunteer_id: i64,
    status: DonationStatus,
) -> anyhow::Result<i64> {
    let conn = pool.get()?;
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM donations WHERE volunteer_id = ?1 AND status = ?2",
        params![volunteer_id, status],
        |row| row.get(0),
    )?)
}

/// Assigned or collected but not yet delivered.
pub async fn count_volunteer_active(pool: &DbPool, volunteer_id: i64) -> anyhow::Result<i64> {
    let conn = pool.get()?;
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM donations WHERE volunteer_id = ?1 AND status IN ('assigned', 'collected')",
        params![volunteer_id],
        |row| row.get(0),
    )?)
}

pub async fn count_donations(pool: &DbPool) -> anyhow::Result<i64> {
    let conn = pool.get()?;
    Ok(conn.query_row("SELECT COUNT(*) FROM donations", [], |row| row.get(0))?)
}

pub async fn count_donations_with_status(
    pool: &DbPool,
    status: DonationStatus,
) -> anyhow::Result<i64> {
    let conn = pool.get()?;
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM donations WHERE status = ?1",
        params![status],
        |row| row.get(0),
    )?)
}

/// Binds a volunteer to a pending donation. The status guard makes concurrent
/// accepts race-safe: exactly one request sees a row updated.
pub async fn assign_volunteer(
    pool: &DbPool,
    donation_id: i64,
    volunteer_id: i64,
) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE donations SET volunteer_id = ?2, status = 'assigned'
         WHERE id = ?1 AND status = 'pending'",
        params![donation_id, volunteer_id],
    )?;
    Ok(updated == 1)
}

pub async fn mark_collected(
    pool: &DbPool,
    donation_id: i64,
    volunteer_id: i64,
    at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE donations SET status = 'collected', collected_at = ?3
         WHERE id = ?1 AND volunteer_id = ?2 AND status = 'assigned'",
        params![donation_id, volunteer_id, at],
    )?;
    Ok(updated == 1)
}

pub async fn mark_delivered(
    pool: &DbPool,
    donation_id: i64,
    volunteer_id: i64,
    at: DateTime<Utc>,
    recipient_name: &Option<String>,
    recipient_contact: &Option<String>,
) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE donations SET status = 'delivered', delivered_at = ?3, recipient_name = ?4, recipient_contact = ?5
         WHERE id = ?1 AND volunteer_id = ?2 AND status = 'collected'",
        params![donation_id, volunteer_id, at, recipient_name, recipient_contact],
    )?;
    Ok(updated == 1)
}

// ---- certificates ----

const CERTIFICATE_COLUMNS: &str = "id, user_id, tier, donations_count, issued_at";

fn certificate_from_row(row: &Row<'_>) -> rusqlite::Result<Certificate> {
    Ok(Certificate {
        id: row.get(0)?,
        user_id: row.get(1)?,
        tier: row.get(2)?,
        donations_count: row.get(3)?,
        issued_at: row.get(4)?,
    })
}

pub async fn certificate_exists(pool: &DbPool, user_id: i64, tier: Tier) -> anyhow::Result<bool> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM certificates WHERE user_id = ?1 AND tier = ?2",
        params![user_id, tier],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub async fn insert_certificate(
    pool: &DbPool,
    user_id: i64,
    tier: Tier,
    donations_count: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<Certificate> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO certificates (user_id, tier, donations_count, issued_at) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, tier, donations_count, now],
    )?;
    let id = conn.last_insert_rowid();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM certificates WHERE id = ?1",
        CERTIFICATE_COLUMNS
    ))?;
    Ok(stmt.query_row(params![id], certificate_from_row)?)
}

pub async fn list_certificates(pool: &DbPool, user_id: i64) -> anyhow::Result<Vec<Certificate>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM certificates WHERE user_id = ?1 ORDER BY issued_at DESC, id DESC",
        CERTIFICATE_COLUMNS
    ))?;
    let rows = stmt.query_map(params![user_id], certificate_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ---- impacts ----

const IMPACT_COLUMNS: &str = "id, donation_id, people_helped, feedback, created_at";

fn impact_from_row(row: &Row<'_>) -> rusqlite::Result<Impact> {
    Ok(Impact {
        id: row.get(0)?,
        donation_id: row.get(1)?,
        people_helped: row.get(2)?,
        feedback: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub async fn insert_impact(
    pool: &DbPool,
    donation_id: i64,
    people_helped: Option<i64>,
    feedback: &Option<String>,
    now: DateTime<Utc>,
) -> anyhow::Result<Impact> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO impacts (donation_id, people_helped, feedback, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![donation_id, people_helped, feedback, now],
    )?;
    let id = conn.last_insert_rowid();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM impacts WHERE id = ?1",
        IMPACT_COLUMNS
    ))?;
    Ok(stmt.query_row(params![id], impact_from_row)?)
}

pub async fn list_impacts_for_donation(
    pool: &DbPool,
    donation_id: i64,
) -> anyhow::Result<Vec<Impact>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM impacts WHERE donation_id = ?1 ORDER BY created_at DESC, id DESC",
        IMPACT_COLUMNS
    ))?;
    let rows = stmt.query_map(params![donation_id], impact_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
