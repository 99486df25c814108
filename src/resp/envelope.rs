use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::response::Responder;
use rocket::{response, Request, Response};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::resp::problem::Problem;

/// Success envelope: `{ "success": true, "message": ..., <key>: <payload> }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub status: Status,
    pub message: String,
    pub body: Map<String, Value>,
}

impl Envelope {
    pub fn new(status: Status, message: impl ToString) -> Envelope {
        Envelope {
            status,
            message: message.to_string(),
            body: Map::new(),
        }
    }

    pub fn ok(message: impl ToString) -> Envelope {
        Envelope::new(Status::Ok, message)
    }

    pub fn created(message: impl ToString) -> Envelope {
        Envelope::new(Status::Created, message)
    }

    /// Attaches `value` under `key`.
    pub fn with<V: Serialize>(mut self, key: impl ToString, value: V) -> Result<Envelope, Problem> {
        self.body.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn to_json(&self) -> Value {
        let mut body = self.body.clone();
        body.insert(String::from("success"), Value::Bool(true));
        body.insert(
            String::from("message"),
            Value::String(self.message.clone()),
        );
        Value::Object(body)
    }
}

impl<'r> Responder<'r, 'static> for Envelope {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body_string = self.to_json().to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body_string.len(), Cursor::new(body_string))
            .ok()
    }
}
