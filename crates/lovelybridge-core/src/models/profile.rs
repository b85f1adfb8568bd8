use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::Other => "other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "female" => Ok(Gender::Female),
            "male" => Ok(Gender::Male),
            "other" => Ok(Gender::Other),
            other => Err(format!("unknown gender: {}", other)),
        }
    }
}

/// Profile as returned by the profile endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub username: Option<String>,
    pub email: Option<String>,
    pub nickname: Option<String>,
    pub gender: Option<Gender>,
}

impl Profile {
    /// Nickname if set, else username
    pub fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.username.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProfileExistsResponse {
    pub has_profile: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_parse() {
        assert_eq!("Female".parse::<Gender>(), Ok(Gender::Female));
        assert_eq!(" male ".parse::<Gender>(), Ok(Gender::Male));
        assert!("unknown".parse::<Gender>().is_err());
    }

    #[test]
    fn test_profile_update_skips_unset_fields() {
        let update = ProfileUpdate {
            nickname: Some("bee".to_string()),
            gender: None,
        };
        assert_eq!(serde_json::to_string(&update).unwrap(), r#"{"nickname":"bee"}"#);
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let profile = Profile {
            username: Some("minji".to_string()),
            nickname: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(profile.display_name(), "minji");
    }
}
