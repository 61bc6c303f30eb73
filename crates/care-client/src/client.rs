//! CARE REST API client

use std::time::Duration;

use care_core::RateLimiters;
use care_core::rate_limit::CARE_API;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::error::{CareError, Result};
use crate::models::{
    Appointment, AuthTokens, LoginResponse, MedicalRecord, Medication, NotificationReceipt,
    NotificationResponse, Page, PatientIdentity, PatientLookup, PatientSummary, Procedure,
    RecentPatient, StaffIdentity, StaffProfile,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// CARE API client
#[derive(Clone)]
pub struct CareClient {
    client: Client,
    base_url: String,
    api_key: String,
    limiters: RateLimiters,
}

impl CareClient {
    /// Create a new client; requests without a user token use `api_key`
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let base_url = base_url.trim_end_matches('/').to_string();
        if Url::parse(&base_url).map_or(true, |url| url.cannot_be_a_base()) {
            return Err(CareError::InvalidUrl(base_url));
        }
        info!("CARE API client initialized for: {}", base_url);

        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            limiters: RateLimiters::default(),
        })
    }

    /// Replace the rate limiter registry
    pub fn with_rate_limiters(mut self, limiters: RateLimiters) -> Self {
        self.limiters = limiters;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build `<base>/<segments...>/`, percent-encoding each segment
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| CareError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| CareError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments)
            .push("");
        Ok(url)
    }

    /// URL of a per-patient resource; the id always stays one path segment
    fn patient_url(&self, patient_id: &str, resource: &str) -> Result<Url> {
        if !is_valid_patient_id(patient_id) {
            warn!("Refusing CARE request for invalid patient id {:?}", patient_id);
            return Err(CareError::InvalidPatientId(patient_id.to_string()));
        }
        self.url(&["api", "v1", "patient", patient_id, resource])
    }

    /// Send a request and return the decoded JSON body (`{}` when empty)
    async fn request(
        &self,
        method: Method,
        url: Url,
        token: Option<&str>,
        body: Option<Value>,
        query: &[(&str, String)],
    ) -> Result<Value> {
        self.limiters.acquire(CARE_API).await;

        debug!("CARE API {} {}", method, url);
        let path = url.path().to_string();

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token.unwrap_or(self.api_key.as_str()))
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.inspect_err(|e| {
            error!("CARE API request failed: {}", e);
        })?;

        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            warn!("CARE API returned 401 for {}", path);
            return Err(CareError::Unauthorized);
        }
        if !status.is_success() {
            error!("CARE API error: {} - {}", status, text);
            return Err(CareError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        token: Option<&str>,
        body: Option<Value>,
        query: &[(&str, String)],
    ) -> Result<T> {
        let value = self.request(method, url, token, body, query).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list<T: DeserializeOwned>(&self, url: Url, token: &str) -> Result<Vec<T>> {
        let page: Page<T> = self
            .request_as(Method::GET, url, Some(token), None, &[])
            .await?;
        Ok(page.results)
    }

    /// Exchange credentials for CARE tokens
    pub async fn login(
        &self,
        username: &str,
        password: Option<&str>,
        user_type: &str,
    ) -> Result<AuthTokens> {
        let body = json!({
            "username": username,
            "password": password,
            "user_type": user_type,
        });
        let response: LoginResponse = self
            .request_as(
                Method::POST,
                self.url(&["api", "v1", "auth", "login"])?,
                None,
                Some(body),
                &[],
            )
            .await?;

        if response.access.is_empty() {
            error!("Failed to get authentication token for {}: {}", user_type, username);
            return Err(CareError::AuthenticationFailed(
                "no access token returned".to_string(),
            ));
        }

        Ok(AuthTokens {
            access: response.access,
            refresh: Some(response.refresh).filter(|r| !r.is_empty()),
        })
    }

    /// Get a new access token; the old refresh token is kept if none is returned
    pub async fn refresh_token(&self, refresh: &str) -> Result<AuthTokens> {
        let response: LoginResponse = self
            .request_as(
                Method::POST,
                self.url(&["api", "v1", "auth", "token", "refresh"])?,
                None,
                Some(json!({ "refresh": refresh })),
                &[],
            )
            .await?;

        if response.access.is_empty() {
            return Err(CareError::AuthenticationFailed(
                "no access token returned on refresh".to_string(),
            ));
        }

        debug!("Refreshed CARE access token");
        Ok(AuthTokens {
            access: response.access,
            refresh: Some(if response.refresh.is_empty() {
                refresh.to_string()
            } else {
                response.refresh
            }),
        })
    }

    /// Authenticate a patient by patient id or registered phone number
    pub async fn authenticate_patient(&self, patient_id: &str) -> Result<PatientIdentity> {
        let tokens = self.login(patient_id, None, "patient").await?;

        let patient: PatientLookup = self
            .request_as(
                Method::POST,
                self.url(&["api", "v1", "patient", "search_retrieve"])?,
                Some(&tokens.access),
                Some(json!({ "identifier": patient_id })),
                &[],
            )
            .await?;

        info!("Patient authenticated: {}", patient_id);
        Ok(PatientIdentity {
            patient_id: or_default(patient.external_id, patient_id),
            name: or_default(patient.name, "Unknown"),
            phone: patient.phone_number,
            email: patient.email,
            tokens,
        })
    }

    /// Authenticate a staff member with username and password
    pub async fn authenticate_staff(&self, staff_id: &str, password: &str) -> Result<StaffIdentity> {
        let tokens = self.login(staff_id, Some(password), "staff").await?;

        let profile: StaffProfile = self
            .request_as(
                Method::GET,
                self.url(&["api", "v1", "staff", "me"])?,
                Some(&tokens.access),
                None,
                &[],
            )
            .await?;

        info!("Staff authenticated: {}", staff_id);
        Ok(StaffIdentity {
            staff_id: or_default(profile.username, staff_id),
            name: or_default(profile.name, "Unknown"),
            role: profile.role,
            department: profile.department,
            tokens,
        })
    }

    pub async fn patient_records(&self, patient_id: &str, token: &str) -> Result<Vec<MedicalRecord>> {
        self.list(self.patient_url(patient_id, "records")?, token)
            .await
    }

    pub async fn patient_medications(&self, patient_id: &str, token: &str) -> Result<Vec<Medication>> {
        self.list(self.patient_url(patient_id, "medication")?, token)
            .await
    }

    pub async fn patient_procedures(&self, patient_id: &str, token: &str) -> Result<Vec<Procedure>> {
        self.list(self.patient_url(patient_id, "procedure")?, token)
            .await
    }

    pub async fn patient_appointments(&self, patient_id: &str, token: &str) -> Result<Vec<Appointment>> {
        self.list(self.patient_url(patient_id, "get_appointments")?, token)
            .await
    }

    /// Search patients by name, id or phone number
    pub async fn search_patients(&self, query: &str, token: &str) -> Result<Vec<PatientSummary>> {
        let page: Page<PatientSummary> = self
            .request_as(
                Method::POST,
                self.url(&["api", "v1", "patient", "search"])?,
                Some(token),
                Some(json!({ "search_query": query })),
                &[],
            )
            .await?;
        debug!("Search '{}' matched {} patients", query, page.results.len());
        Ok(page.results)
    }

    /// Send a notification to a patient
    pub async fn notify_patient(
        &self,
        patient_id: &str,
        message: &str,
        token: &str,
    ) -> Result<NotificationReceipt> {
        let response: NotificationResponse = self
            .request_as(
                Method::POST,
                self.patient_url(patient_id, "notification")?,
                Some(token),
                Some(json!({
                    "message": message,
                    "type": "message",
                    "priority": "normal",
                })),
                &[],
            )
            .await?;

        let notification_id = if response.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            response.id
        };
        info!("Notification {} sent to patient {}", notification_id, patient_id);

        Ok(NotificationReceipt {
            notification_id,
            sent_at: Utc::now(),
        })
    }

    /// Recently seen patients, at most `limit`
    pub async fn recent_patients(&self, token: &str, limit: usize) -> Result<Vec<RecentPatient>> {
        let page: Page<RecentPatient> = self
            .request_as(
                Method::GET,
                self.url(&["api", "v1", "patient", "recent"])?,
                Some(token),
                None,
                &[("limit", limit.to_string())],
            )
            .await?;
        let mut patients = page.results;
        patients.truncate(limit);
        Ok(patients)
    }
}

/// A patient id must be usable as a single URL path segment
pub fn is_valid_patient_id(patient_id: &str) -> bool {
    !patient_id.is_empty()
        && patient_id != "."
        && patient_id != ".."
        && !patient_id
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_whitespace() || c.is_control())
}

fn or_default(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CareClient {
        CareClient::new(&format!("{}/", server.uri()), "api-key")
            .unwrap()
            .with_rate_limiters(RateLimiters::unlimited())
    }

    async fn mount_login(server: &MockServer, user_type: &str, access: &str) {
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login/"))
            .and(header("Authorization", "Bearer api-key"))
            .and(body_partial_json(json!({ "user_type": user_type })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access": access, "refresh": "refresh-1" })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_authenticate_patient() {
        let server = MockServer::start().await;
        mount_login(&server, "patient", "patient-access").await;
        Mock::given(method("POST"))
            .and(path("/api/v1/patient/search_retrieve/"))
            .and(header("Authorization", "Bearer patient-access"))
            .and(body_json(json!({ "identifier": "9876543210" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "external_id": "P123456",
                "name": "Asha Kumar",
                "phone_number": "9876543210"
            })))
            .mount(&server)
            .await;

        let patient = client(&server)
            .authenticate_patient("9876543210")
            .await
            .unwrap();

        assert_eq!(patient.patient_id, "P123456");
        assert_eq!(patient.name, "Asha Kumar");
        assert_eq!(patient.email, "");
        assert_eq!(patient.tokens.access, "patient-access");
        assert_eq!(patient.tokens.refresh.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_authenticate_patient_defaults() {
        let server = MockServer::start().await;
        mount_login(&server, "patient", "patient-access").await;
        Mock::given(method("POST"))
            .and(path("/api/v1/patient/search_retrieve/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let patient = client(&server).authenticate_patient("P9").await.unwrap();
        assert_eq!(patient.patient_id, "P9");
        assert_eq!(patient.name, "Unknown");
    }

    #[tokio::test]
    async fn test_authenticate_staff() {
        let server = MockServer::start().await;
        mount_login(&server, "staff", "staff-access").await;
        Mock::given(method("GET"))
            .and(path("/api/v1/staff/me/"))
            .and(header("Authorization", "Bearer staff-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "username": "dr.rao",
                "name": "Dr. Rao",
                "role": "Doctor",
                "department": "Cardiology"
            })))
            .mount(&server)
            .await;

        let staff = client(&server)
            .authenticate_staff("dr.rao", "secret")
            .await
            .unwrap();
        assert_eq!(staff.staff_id, "dr.rao");
        assert_eq!(staff.name, "Dr. Rao");
        assert_eq!(staff.department, "Cardiology");
    }

    #[tokio::test]
    async fn test_login_without_access_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "detail": "ok" })))
            .mount(&server)
            .await;

        let err = client(&server)
            .login("dr.rao", Some("bad"), "staff")
            .await
            .unwrap_err();
        assert!(matches!(err, CareError::AuthenticationFailed(_)));
        assert!(err.is_auth_rejection());
    }

    #[tokio::test]
    async fn test_unauthorized_and_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/patient/P1/records/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/patient/P1/medication/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(
            client.patient_records("P1", "expired").await,
            Err(CareError::Unauthorized)
        ));
        match client.patient_medications("P1", "token").await {
            Err(CareError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_patient_lists_decode_partial_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/patient/P1/records/"))
            .and(header("Authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "id": 1, "date": "2024-03-01", "doctor_name": "Dr. Rao", "diagnosis": "Flu" },
                    { "id": 2, "notes": null }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/patient/P1/get_appointments/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = client(&server);
        let records = client.patient_records("P1", "user-token").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "1");
        assert_eq!(records[0].diagnosis, "Flu");
        assert_eq!(records[1].notes, "");

        assert!(client.patient_appointments("P1", "user-token").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_patients() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/patient/search/"))
            .and(body_json(json!({ "search_query": "Asha" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "external_id": "P1", "name": "Asha Kumar", "phone_number": "98765" }]
            })))
            .mount(&server)
            .await;

        let results = client(&server).search_patients("Asha", "t").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].external_id, "P1");
        assert_eq!(results[0].address, "");
    }

    #[tokio::test]
    async fn test_notify_patient_generates_id_for_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/patient/P1/notification/"))
            .and(body_json(json!({
                "message": "Your report is ready",
                "type": "message",
                "priority": "normal"
            })))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/patient/P2/notification/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 77 })))
            .mount(&server)
            .await;

        let client = client(&server);
        let receipt = client
            .notify_patient("P1", "Your report is ready", "t")
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(&receipt.notification_id).is_ok());

        let receipt = client.notify_patient("P2", "hello", "t").await.unwrap();
        assert_eq!(receipt.notification_id, "77");
    }

    #[tokio::test]
    async fn test_patient_id_stays_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/patient/P%7B1%7D/notification/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "n-1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/patient/+919876543210/records/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let receipt = client.notify_patient("P{1}", "hi", "t").await.unwrap();
        assert_eq!(receipt.notification_id, "n-1");
        assert!(client.patient_records("+919876543210", "t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_patient_id_sends_nothing() {
        let server = MockServer::start().await;
        let client = client(&server);

        for id in ["P1/../../auth/login", "..", "P1?admin=1", "P1#x", "P1%2F", "P 1", ""] {
            let err = client.notify_patient(id, "hi", "t").await.unwrap_err();
            assert!(matches!(err, CareError::InvalidPatientId(_)), "{id:?}");
            assert!(client.patient_records(id, "t").await.is_err());
        }
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_is_valid_patient_id() {
        assert!(is_valid_patient_id("P123456"));
        assert!(is_valid_patient_id("+919876543210"));
        assert!(!is_valid_patient_id("."));
        assert!(!is_valid_patient_id("a/b"));
        assert!(!is_valid_patient_id("a\\b"));
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(matches!(
            CareClient::new("not a url", "k"),
            Err(CareError::InvalidUrl(_))
        ));
        assert!(matches!(
            CareClient::new("mailto:care@example.org", "k"),
            Err(CareError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_patients_truncates_to_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/patient/recent/"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "external_id": "P1", "name": "A" },
                    { "external_id": "P2", "name": "B" },
                    { "external_id": "P3", "name": "C" }
                ]
            })))
            .mount(&server)
            .await;

        let patients = client(&server).recent_patients("t", 2).await.unwrap();
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[1].external_id, "P2");
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/token/refresh/"))
            .and(body_json(json!({ "refresh": "refresh-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": "access-2" })))
            .mount(&server)
            .await;

        let tokens = client(&server).refresh_token("refresh-1").await.unwrap();
        assert_eq!(tokens.access, "access-2");
        assert_eq!(tokens.refresh.as_deref(), Some("refresh-1"));
    }
}
