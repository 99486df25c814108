use std::io::Cursor;

use rocket::http::ContentType;
use rocket::http::Status;
use rocket::response::Responder;
use rocket::{response, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use utoipa::ToSchema;

/// Failure envelope: `{ "success": false, "message": ..., "detail"?: ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Problem {
    #[serde(skip)]
    pub status: Status,
    pub message: String,

    pub detail: Option<String>,
}

impl Default for Problem {
    fn default() -> Self {
        Problem {
            status: Status::InternalServerError,
            message: "An unexpected error occurred.".to_string(),
            detail: None,
        }
    }
}

impl Problem {
    pub fn new(status: Status, message: impl ToString) -> Problem {
        Problem {
            status,
            message: message.to_string(),
            ..Default::default()
        }
    }

    pub fn bad_request(message: impl ToString) -> Problem {
        Problem::new(Status::BadRequest, message)
    }

    pub fn forbidden(message: impl ToString) -> Problem {
        Problem::new(Status::Forbidden, message)
    }

    pub fn not_found(message: impl ToString) -> Problem {
        Problem::new(Status::NotFound, message)
    }

    pub fn detail(mut self, value: impl ToString) -> Problem {
        self.detail = Some(value.to_string());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();

        body.insert(String::from("success"), Value::Bool(false));
        body.insert(
            String::from("message"),
            Value::String(self.message.clone()),
        );
        if let Some(detail) = &self.detail {
            body.insert(String::from("detail"), Value::String(detail.clone()));
        }

        Value::Object(body)
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for Problem {}

impl<'r> Responder<'r, 'static> for Problem {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body_string = self.to_json().to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .raw_header("Content-Language", "en")
            .sized_body(body_string.len(), Cursor::new(body_string))
            .ok()
    }
}

pub mod problems {
    use crate::resp::problem::Problem;

    #[inline]
    pub fn parse_problem(detail: impl ToString) -> Problem {
        Problem::bad_request("There was a problem parsing part of the request.").detail(detail)
    }

    #[inline]
    pub fn invalid_input(issues: &[String]) -> Problem {
        Problem::bad_request(format!("Invalid input: {}", issues.join(", ")))
    }

    #[inline]
    pub fn invalid_id(what: &str) -> Problem {
        Problem::bad_request(format!("Invalid {} ID", what))
    }
}

const DUPLICATE_KEY: i32 = 11000;

/// Whether a unique index rejected the write.
pub fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == DUPLICATE_KEY,
        ErrorKind::Command(ce) => ce.code == DUPLICATE_KEY,
        _ => false,
    }
}

impl From<mongodb::error::Error> for Problem {
    fn from(e: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        if is_duplicate_key(&e) {
            tracing::debug!("unique index rejected write: {}", e);
            return Problem::bad_request("A record with the same unique value already exists.");
        }

        tracing::error!("MongoDB error while processing request: {}", e);

        fn mongodb_problem() -> Problem {
            Problem::new(
                Status::InternalServerError,
                "MongoDB failed while processing request.",
            )
        }

        fn access_problem() -> Problem {
            Problem::new(
                Status::InternalServerError,
                "Server was unable to access MongoDB.",
            )
        }

        fn bson_problem() -> Problem {
            Problem::new(
                Status::InternalServerError,
                "There was a problem with handling MongoDB bson.",
            )
        }

        match e.kind.as_ref() {
            ErrorKind::Authentication { .. } => access_problem(),
            ErrorKind::BsonDeserialization(_) => bson_problem(),
            ErrorKind::BsonSerialization(_) => bson_problem(),
            ErrorKind::DnsResolve { .. } => access_problem(),
            ErrorKind::Io(_) => mongodb_problem()
                .detail("An IO error occurred. Submitted data might not be properly stored."),
            ErrorKind::ServerSelection { .. } => access_problem(),
            ErrorKind::InvalidTlsConfig { .. } => access_problem(),
            ErrorKind::Write(_) => mongodb_problem()
                .detail("A write error occurred. Submitted data might not be properly stored."),
            ErrorKind::Transaction { .. } => {
                mongodb_problem().detail("The transaction was aborted. No data was changed.")
            }
            ErrorKind::IncompatibleServer { .. } => access_problem(),
            _ => mongodb_problem(),
        }
    }
}

impl From<bson::de::Error> for Problem {
    fn from(e: bson::de::Error) -> Self {
        tracing::error!("BSON deserialization error: {}", e);
        Problem::new(
            Status::InternalServerError,
            "An error occurred while processing BSON data.",
        )
    }
}

impl From<serde_json::Error> for Problem {
    fn from(e: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {}", e);
        Problem::new(
            Status::InternalServerError,
            "An error occurred while processing JSON data.",
        )
    }
}

impl From<jsonwebtoken::errors::Error> for Problem {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match e.into_kind() {
            ErrorKind::ExpiredSignature => {
                Problem::new(Status::Unauthorized, "Expired JWT signature.")
            }
            _ => Problem::new(Status::Unauthorized, "Error while handling JWT."),
        }
    }
}

impl From<std::io::Error> for Problem {
    fn from(e: std::io::Error) -> Self {
        tracing::error!("IO error while processing request: {}", e);
        Problem::new(Status::InternalServerError, "Server IO error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_failure_envelope() {
        let problem = Problem::bad_request("Bad username.")
            .detail("Username must be at least 5 characters long.");

        assert_eq!(
            problem.to_json(),
            json!({
                "success": false,
                "message": "Bad username.",
                "detail": "Username must be at least 5 characters long.",
            })
        );
    }

    #[test]
    fn detail_is_omitted_when_absent() {
        let problem = Problem::forbidden("Nope.");
        assert_eq!(problem.to_json(), json!({ "success": false, "message": "Nope." }));
        assert_eq!(problem.status, Status::Forbidden);
    }

    #[test]
    fn other_write_errors_are_not_duplicates() {
        let e = mongodb::error::Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(!is_duplicate_key(&e));
        assert_eq!(Problem::from(e).status, Status::InternalServerError);
    }

    #[test]
    fn invalid_input_joins_issues() {
        let problem = problems::invalid_input(&[
            "Class name must be at least 2 characters long".to_string(),
            "Semester must be no more than 50 characters".to_string(),
        ]);
        assert_eq!(problem.status, Status::BadRequest);
        assert_eq!(
            problem.message,
            "Invalid input: Class name must be at least 2 characters long, \
             Semester must be no more than 50 characters"
        );
    }

    #[test]
    fn expired_jwt_is_unauthorized() {
        let e = jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::ExpiredSignature,
        );
        let problem = Problem::from(e);
        assert_eq!(problem.status, Status::Unauthorized);
        assert_eq!(problem.message, "Expired JWT signature.");
    }
}
