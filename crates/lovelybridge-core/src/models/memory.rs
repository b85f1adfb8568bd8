use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MemoryList {
    pub memories: Vec<Memory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMemory {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl MemoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOrdering {
    NewestFirst,
    OldestFirst,
    TitleAsc,
    TitleDesc,
}

impl MemoryOrdering {
    /// Value of the `ordering` query parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            MemoryOrdering::NewestFirst => "-created_at",
            MemoryOrdering::OldestFirst => "created_at",
            MemoryOrdering::TitleAsc => "title",
            MemoryOrdering::TitleDesc => "-title",
        }
    }
}

impl fmt::Display for MemoryOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

impl FromStr for MemoryOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "-created_at" | "newest" => Ok(MemoryOrdering::NewestFirst),
            "created_at" | "oldest" => Ok(MemoryOrdering::OldestFirst),
            "title" => Ok(MemoryOrdering::TitleAsc),
            "-title" => Ok(MemoryOrdering::TitleDesc),
            other => Err(format!("unknown ordering: {}", other)),
        }
    }
}

/// Search and ordering for the memory list
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub q: Option<String>,
    pub ordering: Option<MemoryOrdering>,
}

impl MemoryQuery {
    pub(crate) fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(ref q) = self.q {
            params.push(("q".to_string(), q.clone()));
        }
        if let Some(ordering) = self.ordering {
            params.push(("ordering".to_string(), ordering.as_param().to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params() {
        assert!(MemoryQuery::default().params().is_empty());

        let query = MemoryQuery {
            q: Some("jeju".to_string()),
            ordering: Some(MemoryOrdering::TitleDesc),
        };
        assert_eq!(
            query.params(),
            vec![
                ("q".to_string(), "jeju".to_string()),
                ("ordering".to_string(), "-title".to_string()),
            ]
        );
    }

    #[test]
    fn test_ordering_from_str() {
        assert_eq!("newest".parse::<MemoryOrdering>(), Ok(MemoryOrdering::NewestFirst));
        assert_eq!("-title".parse::<MemoryOrdering>(), Ok(MemoryOrdering::TitleDesc));
        assert!("random".parse::<MemoryOrdering>().is_err());
    }
}
