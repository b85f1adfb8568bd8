//! Typed wrappers for the LovelyBridge REST endpoints.

use serde_json::json;
use tracing::debug;

use super::client::ApiClient;
use super::transport::RequestDescriptor;
use super::ApiError;
use crate::models::couple::CoupleRequestList;
use crate::models::memory::MemoryList;
use crate::models::profile::ProfileExistsResponse;
use crate::models::{
    AttendanceCheckIn, AttendanceStatus, CoupleRequest, CoupleStatus, LoginRequest,
    LoginResponse, Memory, MemoryQuery, MemoryUpdate, NewMemory, PasswordChangeRequest,
    PasswordChangeResponse, PasswordVerifyResponse, Profile, ProfileUpdate, RegisterRequest,
    RegisterResponse,
};

const LOGIN_PATH: &str = "/api/auth/login/";
const REGISTER_PATH: &str = "/api/auth/register/";
const PROFILE_EXISTS_PATH: &str = "/api/auth/profile/exists/";
const COUPLE_BASE: &str = "/api/auth/couple";
const ATTENDANCE_BASE: &str = "/api/auth/attendance";
const MEMORIES_PATH: &str = "/api/auth/memories/";
const PASSWORD_BASE: &str = "/api/auth/password";

impl ApiClient {
    // ===== Account =====

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        self.post_json(LOGIN_PATH, request).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        self.post_json(REGISTER_PATH, request).await
    }

    pub async fn verify_password(&self, current_password: &str) -> Result<bool, ApiError> {
        let body = json!({ "current_password": current_password });
        let response: PasswordVerifyResponse = self
            .post_json(&format!("{}/verify/", PASSWORD_BASE), &body)
            .await?;
        Ok(response.verified)
    }

    pub async fn change_password(
        &self,
        request: &PasswordChangeRequest,
    ) -> Result<PasswordChangeResponse, ApiError> {
        self.post_json(&format!("{}/change/", PASSWORD_BASE), request)
            .await
    }

    // ===== Profile =====

    /// Save profile fields. Backends that only accept POST on the profile
    /// endpoint answer PATCH with 405, so that case is retried as POST.
    pub async fn complete_profile(&self, update: &ProfileUpdate) -> Result<Profile, ApiError> {
        let path = self.profile_path();
        match self.patch_json(&path, update).await {
            Err(ApiError::MethodNotAllowed) => {
                debug!("Profile PATCH not allowed, retrying as POST");
                self.post_json(&path, update).await
            }
            other => other,
        }
    }

    pub async fn check_profile_exists(&self) -> Result<bool, ApiError> {
        let response: ProfileExistsResponse = self
            .get_json(RequestDescriptor::get(PROFILE_EXISTS_PATH))
            .await?;
        Ok(response.has_profile)
    }

    pub async fn get_profile(&self) -> Result<Profile, ApiError> {
        self.get_json(RequestDescriptor::get(self.profile_path()))
            .await
    }

    // ===== Couple =====

    pub async fn request_couple(&self, partner_username: &str) -> Result<CoupleRequest, ApiError> {
        let body = json!({ "partner_username": partner_username });
        self.post_json(&format!("{}/request/", COUPLE_BASE), &body)
            .await
    }

    pub async fn incoming_couple_requests(&self) -> Result<Vec<CoupleRequest>, ApiError> {
        let list: CoupleRequestList = self
            .get_json(RequestDescriptor::get(format!(
                "{}/requests/incoming/",
                COUPLE_BASE
            )))
            .await?;
        Ok(list.requests)
    }

    pub async fn sent_couple_requests(&self) -> Result<Vec<CoupleRequest>, ApiError> {
        let list: CoupleRequestList = self
            .get_json(RequestDescriptor::get(format!("{}/requests/sent/", COUPLE_BASE)))
            .await?;
        Ok(list.requests)
    }

    pub async fn accept_couple_request(&self, request_id: i64) -> Result<CoupleStatus, ApiError> {
        let body = json!({ "request_id": request_id });
        self.post_json(&format!("{}/accept/", COUPLE_BASE), &body)
            .await
    }

    /// Reject an incoming request; returns the remaining incoming requests
    pub async fn reject_couple_request(
        &self,
        request_id: i64,
    ) -> Result<Vec<CoupleRequest>, ApiError> {
        let body = json!({ "request_id": request_id });
        let list: CoupleRequestList = self
            .post_json(&format!("{}/reject/", COUPLE_BASE), &body)
            .await?;
        Ok(list.requests)
    }

    /// Cancel a sent request; returns the remaining sent requests
    pub async fn cancel_couple_request(
        &self,
        request_id: i64,
    ) -> Result<Vec<CoupleRequest>, ApiError> {
        let body = json!({ "request_id": request_id });
        let list: CoupleRequestList = self
            .post_json(&format!("{}/cancel/", COUPLE_BASE), &body)
            .await?;
        Ok(list.requests)
    }

    pub async fn couple_status(&self) -> Result<CoupleStatus, ApiError> {
        self.get_json(RequestDescriptor::get(format!("{}/status/", COUPLE_BASE)))
            .await
    }

    // ===== Attendance =====

    pub async fn attendance_status(&self) -> Result<AttendanceStatus, ApiError> {
        self.get_json(RequestDescriptor::get(format!("{}/status/", ATTENDANCE_BASE)))
            .await
    }

    pub async fn check_in_attendance(&self) -> Result<AttendanceCheckIn, ApiError> {
        self.post_json(&format!("{}/check-in/", ATTENDANCE_BASE), &json!({}))
            .await
    }

    // ===== Memories =====

    pub async fn create_memory(&self, memory: &NewMemory) -> Result<Memory, ApiError> {
        self.post_json(MEMORIES_PATH, memory).await
    }

    pub async fn list_memories(&self, query: &MemoryQuery) -> Result<Vec<Memory>, ApiError> {
        let mut request = RequestDescriptor::get(MEMORIES_PATH);
        request.query = query.params();
        let list: MemoryList = self.get_json(request).await?;
        Ok(list.memories)
    }

    pub async fn get_memory(&self, memory_id: i64) -> Result<Memory, ApiError> {
        self.get_json(RequestDescriptor::get(memory_path(memory_id)))
            .await
    }

    pub async fn update_memory(
        &self,
        memory_id: i64,
        update: &MemoryUpdate,
    ) -> Result<Memory, ApiError> {
        self.patch_json(&memory_path(memory_id), update).await
    }

    pub async fn delete_memory(&self, memory_id: i64) -> Result<(), ApiError> {
        self.delete(&memory_path(memory_id)).await
    }
}

fn memory_path(memory_id: i64) -> String {
    format!("{}{}/", MEMORIES_PATH, memory_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::{HttpResponse, HttpTransport, OutgoingRequest};
    use async_trait::async_trait;
    use reqwest::{Method, StatusCode};
    use std::sync::{Arc, Mutex};

    /// Replies from a queue of canned responses, recording requests
    struct CannedTransport {
        replies: Mutex<Vec<HttpResponse>>,
        seen: Mutex<Vec<OutgoingRequest>>,
    }

    impl CannedTransport {
        fn new(mut replies: Vec<HttpResponse>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for CannedTransport {
        async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, ApiError> {
            self.seen.lock().unwrap().push(request);
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop()
                .expect("no canned response left"))
        }
    }

    #[test]
    fn test_memory_path() {
        assert_eq!(memory_path(12), "/api/auth/memories/12/");
    }

    #[tokio::test]
    async fn test_complete_profile_falls_back_to_post() {
        let transport = CannedTransport::new(vec![
            HttpResponse::new(StatusCode::METHOD_NOT_ALLOWED, ""),
            HttpResponse::new(StatusCode::OK, r#"{"nickname": "bee", "gender": "female"}"#),
        ]);
        let client = ApiClient::new("http://api.test", transport.clone());

        let update = ProfileUpdate {
            nickname: Some("bee".to_string()),
            ..Default::default()
        };
        let profile = client.complete_profile(&update).await.unwrap();
        assert_eq!(profile.nickname.as_deref(), Some("bee"));

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::PATCH);
        assert_eq!(seen[1].method, Method::POST);
        assert_eq!(seen[1].url, "http://api.test/api/auth/profile/");
    }

    #[tokio::test]
    async fn test_list_memories_sends_query() {
        let transport = CannedTransport::new(vec![HttpResponse::new(
            StatusCode::OK,
            r#"{"memories": [{"id": 1, "title": "Han river", "content": "picnic", "created_at": "2024-04-02"}]}"#,
        )]);
        let client = ApiClient::new("http://api.test", transport.clone());

        let query = MemoryQuery {
            q: Some("river".to_string()),
            ordering: None,
        };
        let memories = client.list_memories(&query).await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].title, "Han river");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].query, vec![("q".to_string(), "river".to_string())]);
    }

    #[tokio::test]
    async fn test_reject_returns_remaining_requests() {
        let transport = CannedTransport::new(vec![HttpResponse::new(
            StatusCode::OK,
            r#"{"requests": []}"#,
        )]);
        let client = ApiClient::new("http://api.test", transport.clone());

        let remaining = client.reject_couple_request(3).await.unwrap();
        assert!(remaining.is_empty());
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].url, "http://api.test/api/auth/couple/reject/");
        assert_eq!(seen[0].body, Some(json!({ "request_id": 3 })));
    }
}
