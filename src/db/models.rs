use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Donor,
    Volunteer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::Volunteer => "volunteer",
            Role::Admin => "admin",
        }
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "donor" => Ok(Role::Donor),
            "volunteer" => Ok(Role::Volunteer),
            "admin" => Ok(Role::Admin),
            other => Err(FromSqlError::Other(format!("unknown role: {}", other).into())),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Forward-only lifecycle: pending -> assigned -> collected -> delivered.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Assigned,
    Collected,
    Delivered,
}

impl DonationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DonationStatus::Pending => "pending",
            DonationStatus::Assigned => "assigned",
            DonationStatus::Collected => "collected",
            DonationStatus::Delivered => "delivered",
        }
    }
}

impl FromSql for DonationStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(DonationStatus::Pending),
            "assigned" => Ok(DonationStatus::Assigned),
            "collected" => Ok(DonationStatus::Collected),
            "delivered" => Ok(DonationStatus::Delivered),
            other => Err(FromSqlError::Other(
                format!("unknown donation status: {}", other).into(),
            )),
        }
    }
}

impl ToSql for DonationStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Platinum => "platinum",
        }
    }
}

impl FromSql for Tier {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "bronze" => Ok(Tier::Bronze),
            "silver" => Ok(Tier::Silver),
            "gold" => Ok(Tier::Gold),
            "platinum" => Ok(Tier::Platinum),
            other => Err(FromSqlError::Other(format!("unknown tier: {}", other).into())),
        }
    }
}

impl ToSql for Tier {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Coordinates on file, present only when both halves are set.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Donation {
    pub id: i64,
    pub donor_id: i64,
    pub volunteer_id: Option<i64>,
    pub category: String,
    pub description: String,
    pub quantity: Option<String>,
    pub pickup_address: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: DonationStatus,
    pub created_at: DateTime<Utc>,
    pub collected_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub recipient_name: Option<String>,
    pub recipient_contact: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct Certificate {
    pub id: i64,
    pub user_id: i64,
    pub tier: Tier,
    pub donations_count: i64,
    pub issued_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone)]
pub struct Impact {
    pub id: i64,
    pub donation_id: i64,
    pub people_helped: Option<i64>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}
