//! CARE API data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Access and refresh tokens returned by the CARE login endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access: String,
    pub refresh: Option<String>,
}

/// Authenticated patient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientIdentity {
    pub patient_id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub tokens: AuthTokens,
}

/// Authenticated staff member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffIdentity {
    pub staff_id: String,
    pub name: String,
    pub role: String,
    pub department: String,
    pub tokens: AuthTokens,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicalRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub doctor_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub diagnosis: String,
    #[serde(deserialize_with = "lenient_string")]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Medication {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub dosage: String,
    #[serde(deserialize_with = "lenient_string")]
    pub frequency: String,
    #[serde(deserialize_with = "lenient_string")]
    pub start_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub end_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub prescriber_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Procedure {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub scheduled_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(deserialize_with = "lenient_string")]
    pub provider_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(deserialize_with = "lenient_string")]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Appointment {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub time: String,
    #[serde(deserialize_with = "lenient_string")]
    pub doctor_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub department: String,
    #[serde(deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(deserialize_with = "lenient_string")]
    pub notes: String,
}

/// Patient search hit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientSummary {
    #[serde(deserialize_with = "lenient_string")]
    pub external_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub phone_number: String,
    #[serde(deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(deserialize_with = "lenient_string")]
    pub address: String,
    #[serde(deserialize_with = "lenient_string")]
    pub date_of_birth: String,
}

/// Recently seen patient
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentPatient {
    #[serde(deserialize_with = "lenient_string")]
    pub external_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub last_visit_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub last_visit_reason: String,
    #[serde(deserialize_with = "lenient_string")]
    pub phone_number: String,
    #[serde(deserialize_with = "lenient_string")]
    pub email: String,
}

/// Result of a patient notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationReceipt {
    pub notification_id: String,
    pub sent_at: DateTime<Utc>,
}

/// Paginated list envelope
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct LoginResponse {
    #[serde(deserialize_with = "lenient_string")]
    pub access: String,
    #[serde(deserialize_with = "lenient_string")]
    pub refresh: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct PatientLookup {
    #[serde(deserialize_with = "lenient_string")]
    pub external_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub phone_number: String,
    #[serde(deserialize_with = "lenient_string")]
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct StaffProfile {
    #[serde(deserialize_with = "lenient_string")]
    pub username: String,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub role: String,
    #[serde(deserialize_with = "lenient_string")]
    pub department: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct NotificationResponse {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
}

/// Strings, numbers and nulls all become a string (`null` -> "")
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}
