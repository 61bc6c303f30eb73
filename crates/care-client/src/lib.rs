//! care-client: CARE REST API client
//!
//! Authentication for patients and staff, patient data retrieval and
//! staff operations (search, notifications, recent patients).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use care_client::CareClient;
//!
//! let client = CareClient::new("https://care.example.org", "api-key")?;
//! let staff = client.authenticate_staff("dr.rao", "secret").await?;
//! let patients = client.recent_patients(&staff.tokens.access, 5).await?;
//! ```

pub mod client;
pub mod error;
pub mod models;

pub use client::{CareClient, is_valid_patient_id};
pub use error::{CareError, Result};
pub use models::{
    Appointment, AuthTokens, MedicalRecord, Medication, NotificationReceipt, PatientIdentity,
    PatientSummary, Procedure, RecentPatient, StaffIdentity,
};
