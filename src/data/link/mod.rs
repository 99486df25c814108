use bson::{doc, Document};
use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

use super::class::Class;
use super::Id;
use crate::data::validate;
use crate::resp::problem::Problem;
use crate::status::LinkStatus;

pub mod db;

pub static LINK_COLLECTION_NAME: &str = "feedback_links";

pub const TITLE_MIN: usize = 1;
pub const TITLE_MAX: usize = 100;

/// Unguessable public token for a new link.
pub fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackLink {
    #[serde(rename = "_id")]
    pub id: Id,
    pub title: String,
    pub token: String,
    #[serde(default)]
    pub status: LinkStatus,
    pub class: Id,
    pub professor: Id,
    #[serde(default)]
    pub submissions: Vec<Id>,
    pub created_at: bson::DateTime,
}

impl FeedbackLink {
    pub fn new(title: &str, class: &Class) -> FeedbackLink {
        FeedbackLink {
            id: Id::new(),
            title: title.trim().to_string(),
            token: generate_token(),
            status: LinkStatus::Active,
            class: class.id,
            professor: class.professor,
            submissions: vec![],
            created_at: bson::DateTime::now(),
        }
    }

    pub fn check_owner(&self, user: Id) -> Result<(), Problem> {
        if self.professor == user {
            Ok(())
        } else {
            Err(problem::not_owner())
        }
    }

    /// `$set` of the fields a professor may edit.
    pub fn update_document(&self) -> Document {
        doc! {
            "$set": {
                "title": self.title.as_str(),
                "status": self.status,
            }
        }
    }

    pub fn check_open(&self) -> Result<(), Problem> {
        if self.status.accepts_submissions() {
            Ok(())
        } else {
            Err(problem::closed())
        }
    }
}

pub mod problem {
    use crate::resp::problem::Problem;

    #[inline]
    pub fn not_found() -> Problem {
        Problem::not_found("Feedback link not found")
    }

    #[inline]
    pub fn not_owner() -> Problem {
        Problem::forbidden("You are not the owner of this feedback link")
    }

    #[inline]
    pub fn closed() -> Problem {
        Problem::forbidden("This feedback link is currently closed.")
    }
}

fn title_issues(title: &str, issues: &mut Vec<String>) {
    validate::length(title.trim(), "Title", TITLE_MIN, TITLE_MAX, issues);
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LinkCreateData {
    pub title: String,
}

impl LinkCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut issues = vec![];
        title_issues(&self.title, &mut issues);
        validate::finish(issues)
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct LinkUpdateData {
    #[serde(default)]
    pub title: Option<String>,
    /// `ACTIVE` or `CLOSED`.
    #[serde(default)]
    pub status: Option<String>,
}

impl LinkUpdateData {
    /// Checks present fields and returns the requested status, if any.
    pub fn validate(&self) -> Result<Option<LinkStatus>, Problem> {
        let mut issues = vec![];
        if let Some(title) = &self.title {
            title_issues(title, &mut issues);
        }
        let status = match self.status.as_deref().map(str::parse::<LinkStatus>) {
            Some(Ok(status)) => Some(status),
            Some(Err(_)) => {
                issues.push("Status must be ACTIVE or CLOSED".to_string());
                None
            }
            None => None,
        };
        validate::finish(issues)?;
        Ok(status)
    }

    pub fn apply(&self, status: Option<LinkStatus>, link: &mut FeedbackLink) {
        if let Some(title) = &self.title {
            link.title = title.trim().to_string();
        }
        if let Some(status) = status {
            link.status = status;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub id: Uuid,
    pub title: String,
    pub token: String,
    pub status: LinkStatus,
    pub class: Uuid,
    pub professor: Uuid,
    pub submissions: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub shareable_link: String,
}

impl LinkResponse {
    pub fn new(link: FeedbackLink, shareable_link: String) -> LinkResponse {
        LinkResponse {
            id: link.id.to_uuid_1(),
            title: link.title,
            token: link.token,
            status: link.status,
            class: link.class.to_uuid_1(),
            professor: link.professor.to_uuid_1(),
            submissions: link.submissions.into_iter().map(|it| it.to_uuid_1()).collect(),
            created_at: link.created_at.to_chrono(),
            shareable_link,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicClassInfo {
    pub class_name: String,
    pub semester: Option<String>,
}

/// What anonymous submitters see: no owner, no submissions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicLinkResponse {
    pub title: String,
    pub status: LinkStatus,
    pub token: String,
    pub class: Option<PublicClassInfo>,
}

impl PublicLinkResponse {
    pub fn new(link: FeedbackLink, class: Option<Class>) -> PublicLinkResponse {
        PublicLinkResponse {
            title: link.title,
            status: link.status,
            token: link.token,
            class: class.map(|class| PublicClassInfo {
                class_name: class.class_name,
                semester: class.semester,
            }),
        }
    }
}
