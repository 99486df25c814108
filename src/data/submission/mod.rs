use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

use super::link::FeedbackLink;
use super::Id;
use crate::data::validate;
use crate::resp::problem::Problem;

pub mod db;

pub static SUBMISSION_COLLECTION_NAME: &str = "feedback_submissions";

pub const CONTENT_MIN: usize = 10;
pub const CONTENT_MAX: usize = 1000;

/// Anonymous feedback. Nothing about the submitter is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    #[serde(rename = "_id")]
    pub id: Id,
    pub content: String,
    pub feedback_link: Id,
    pub created_at: bson::DateTime,
}

impl FeedbackSubmission {
    pub fn new(content: &str, link: &FeedbackLink) -> FeedbackSubmission {
        FeedbackSubmission {
            id: Id::new(),
            content: content.trim().to_string(),
            feedback_link: link.id,
            created_at: bson::DateTime::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubmissionCreateData {
    pub content: String,
    /// Public token of the feedback link.
    pub token: String,
}

impl SubmissionCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut issues = vec![];
        validate::length(
            self.content.trim(),
            "Feedback",
            CONTENT_MIN,
            CONTENT_MAX,
            &mut issues,
        );
        validate::required(self.token.trim(), "Token", &mut issues);
        validate::finish(issues)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub id: Uuid,
    pub content: String,
    pub feedback_link: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<FeedbackSubmission> for SubmissionResponse {
    fn from(value: FeedbackSubmission) -> Self {
        SubmissionResponse {
            id: value.id.to_uuid_1(),
            content: value.content,
            feedback_link: value.feedback_link.to_uuid_1(),
            created_at: value.created_at.to_chrono(),
        }
    }
}
