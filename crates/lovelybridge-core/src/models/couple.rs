use serde::{Deserialize, Serialize};

use super::Gender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoupleRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoupleRequest {
    pub id: i64,
    pub requester_username: String,
    pub recipient_username: String,
    pub status: CoupleRequestStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CoupleRequestList {
    pub requests: Vec<CoupleRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoupleStatus {
    pub is_coupled: bool,
    pub partner_username: Option<String>,
    pub partner_nickname: Option<String>,
    /// The backend sends "" when the partner has not picked one
    #[serde(default, deserialize_with = "empty_gender_as_none")]
    pub partner_gender: Option<Gender>,
}

impl CoupleStatus {
    pub fn partner_display_name(&self) -> Option<&str> {
        self.partner_nickname
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.partner_username.as_deref())
    }
}

fn empty_gender_as_none<'de, D>(deserializer: D) -> Result<Option<Gender>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_couple_status_with_empty_gender() {
        let json = r#"{"is_coupled": true, "partner_username": "jun", "partner_nickname": "", "partner_gender": ""}"#;
        let status: CoupleStatus = serde_json::from_str(json).unwrap();
        assert!(status.is_coupled);
        assert_eq!(status.partner_gender, None);
        assert_eq!(status.partner_display_name(), Some("jun"));
    }

    #[test]
    fn test_parse_uncoupled_status() {
        let status: CoupleStatus = serde_json::from_str(r#"{"is_coupled": false}"#).unwrap();
        assert!(!status.is_coupled);
        assert_eq!(status.partner_display_name(), None);
    }

    #[test]
    fn test_parse_request_list() {
        let json = r#"{"requests": [{"id": 7, "requester_username": "jun", "recipient_username": "minji", "status": "pending", "created_at": "2024-05-01T10:00:00Z"}]}"#;
        let list: CoupleRequestList = serde_json::from_str(json).unwrap();
        assert_eq!(list.requests.len(), 1);
        assert_eq!(list.requests[0].status, CoupleRequestStatus::Pending);
    }
}
