use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

use super::link::LinkResponse;
use super::Id;
use crate::data::validate;
use crate::resp::problem::Problem;
use crate::util::non_empty_trimmed;

pub mod db;

pub static CLASS_COLLECTION_NAME: &str = "classes";

pub const CLASS_NAME_MIN: usize = 2;
pub const CLASS_NAME_MAX: usize = 100;
pub const SEMESTER_MAX: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    #[serde(rename = "_id")]
    pub id: Id,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
    /// Owning professor.
    pub professor: Id,
    #[serde(default)]
    pub feedback_links: Vec<Id>,
    pub created_at: bson::DateTime,
}

impl Class {
    pub fn new(data: ClassCreateData, professor: Id) -> Class {
        Class {
            id: Id::new(),
            class_name: data.class_name.trim().to_string(),
            semester: non_empty_trimmed(data.semester.as_deref()),
            professor,
            feedback_links: vec![],
            created_at: bson::DateTime::now(),
        }
    }

    /// Answers 403 unless `user` owns this class.
    pub fn check_owner(&self, user: Id) -> Result<(), Problem> {
        if self.professor == user {
            Ok(())
        } else {
            Err(problem::not_owner())
        }
    }
}

pub mod problem {
    use crate::resp::problem::Problem;

    #[inline]
    pub fn not_found() -> Problem {
        Problem::not_found("Class not found")
    }

    #[inline]
    pub fn not_found_or_not_owner() -> Problem {
        Problem::not_found("Class not found or you are not the owner")
    }

    #[inline]
    pub fn not_owner() -> Problem {
        Problem::forbidden("You are not the owner of this class")
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassCreateData {
    pub class_name: String,
    #[serde(default)]
    pub semester: Option<String>,
}

impl ClassCreateData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut issues = vec![];
        validate::length(
            self.class_name.trim(),
            "Class name",
            CLASS_NAME_MIN,
            CLASS_NAME_MAX,
            &mut issues,
        );
        if let Some(semester) = &self.semester {
            validate::length(semester.trim(), "Semester", 0, SEMESTER_MAX, &mut issues);
        }
        validate::finish(issues)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassResponse {
    pub id: Uuid,
    pub class_name: String,
    pub semester: Option<String>,
    pub professor: Uuid,
    pub feedback_links: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Class> for ClassResponse {
    fn from(value: Class) -> Self {
        ClassResponse {
            id: value.id.to_uuid_1(),
            class_name: value.class_name,
            semester: value.semester,
            professor: value.professor.to_uuid_1(),
            feedback_links: value
                .feedback_links
                .into_iter()
                .map(|it| it.to_uuid_1())
                .collect(),
            created_at: value.created_at.to_chrono(),
        }
    }
}

/// Class with its feedback links resolved.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassDetailResponse {
    pub id: Uuid,
    pub class_name: String,
    pub semester: Option<String>,
    pub professor: Uuid,
    pub feedback_links: Vec<LinkResponse>,
    pub created_at: DateTime<Utc>,
}

impl ClassDetailResponse {
    pub fn new(class: Class, feedback_links: Vec<LinkResponse>) -> ClassDetailResponse {
        ClassDetailResponse {
            id: class.id.to_uuid_1(),
            class_name: class.class_name,
            semester: class.semester,
            professor: class.professor.to_uuid_1(),
            feedback_links,
            created_at: class.created_at.to_chrono(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(class_name: &str, semester: Option<&str>) -> ClassCreateData {
        ClassCreateData {
            class_name: class_name.to_string(),
            semester: semester.map(str::to_string),
        }
    }

    #[test]
    fn class_name_bounds() {
        assert!(create("CS 101", None).validate().is_ok());
        assert!(create("  A  ", None).validate().is_err());
        assert!(create(&"x".repeat(101), None).validate().is_err());
        assert!(create(&"x".repeat(100), Some(&"s".repeat(50))).validate().is_ok());
        assert!(create("CS 101", Some(&"s".repeat(51))).validate().is_err());
    }

    #[test]
    fn new_class_is_trimmed_and_owned() {
        let professor = Id::new();
        let class = Class::new(create("  Compilers ", Some("   ")), professor);
        assert_eq!(class.class_name, "Compilers");
        assert_eq!(class.semester, None);
        assert!(class.feedback_links.is_empty());
        assert!(class.check_owner(professor).is_ok());
        assert_eq!(
            class.check_owner(Id::new()).unwrap_err().status,
            rocket::http::Status::Forbidden
        );
    }

    #[test]
    fn response_uses_camel_case() {
        let class = Class::new(create("Compilers", Some("Fall 2024")), Id::new());
        let json = serde_json::to_value(ClassResponse::from(class)).expect("serializable");
        assert_eq!(json["className"], "Compilers");
        assert_eq!(json["semester"], "Fall 2024");
        assert!(json["feedbackLinks"].as_array().expect("array").is_empty());
        assert!(json.get("createdAt").is_some());
    }
}
