use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

/// Whether a feedback link still accepts submissions.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkStatus {
    #[default]
    Active,
    Closed,
}

impl LinkStatus {
    pub fn accepts_submissions(self) -> bool {
        self == LinkStatus::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::Active => "ACTIVE",
            LinkStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for LinkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(LinkStatus::Active),
            "CLOSED" => Ok(LinkStatus::Closed),
            other => Err(format!("'{}' is not a link status", other)),
        }
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LinkStatus> for bson::Bson {
    fn from(status: LinkStatus) -> Self {
        bson::Bson::String(status.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_known_statuses() {
        assert_eq!("ACTIVE".parse::<LinkStatus>(), Ok(LinkStatus::Active));
        assert_eq!("CLOSED".parse::<LinkStatus>(), Ok(LinkStatus::Closed));
        assert!("closed".parse::<LinkStatus>().is_err());
        assert!("ARCHIVED".parse::<LinkStatus>().is_err());
    }

    #[test]
    fn only_active_links_accept_submissions() {
        assert!(LinkStatus::Active.accepts_submissions());
        assert!(!LinkStatus::Closed.accepts_submissions());
        assert_eq!(LinkStatus::default(), LinkStatus::Active);
    }

    #[test]
    fn serialized_form_matches_display() {
        let json = serde_json::to_string(&LinkStatus::Closed).expect("serializable");
        assert_eq!(json, "\"CLOSED\"");
        assert_eq!(LinkStatus::Closed.to_string(), "CLOSED");
    }
}
