pub mod class;
pub mod link;
pub mod submission;
pub mod user;
pub mod validate;

/// Document identifier, stored as BSON binary subtype 4 (UUID).
pub type Id = bson::Uuid;

/// Parses a path segment into an [`Id`], answering 400 for malformed input.
pub fn parse_id(raw: &str, what: &str) -> Result<Id, crate::resp::problem::Problem> {
    uuid::Uuid::parse_str(raw)
        .map(Id::from_uuid_1)
        .map_err(|_| crate::resp::problem::problems::invalid_id(what))
}
