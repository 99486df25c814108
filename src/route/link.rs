use mongodb::Database;
use rocket::serde::json::{self, Json};
use rocket::State;

use super::json_body;
use crate::config::Config;
use crate::data::class::db::ClassDbExt;
use crate::data::link::db::LinkDbExt;
use crate::data::link::problem as link_problem;
use crate::data::link::{FeedbackLink, LinkResponse, LinkUpdateData, PublicLinkResponse};
use crate::data::submission::db::SubmissionDbExt;
use crate::data::submission::SubmissionResponse;
use crate::data::{parse_id, Id};
use crate::db::Db;
use crate::resp::envelope::Envelope;
use crate::resp::jwt::SessionToken;
use crate::resp::problem::Problem;

/// Loads a link and checks that the session owns it.
async fn owned_link(db: &Database, id: Id, auth: &SessionToken) -> Result<FeedbackLink, Problem> {
    let link = db
        .find_link(id)
        .await?
        .ok_or_else(link_problem::not_found)?;
    link.check_owner(auth.user_id())?;
    Ok(link)
}

#[utoipa::path(
    params(("id", description = "feedback link ID")),
    responses(
        (status = 200, description = "Feedback link", body = LinkResponse),
        (status = 400, description = "Malformed feedback link ID", body = Problem),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 403, description = "Caller doesn't own the link", body = Problem),
        (status = 404, description = "Feedback link doesn't exist", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/feedback-links/<id>")]
#[tracing::instrument(skip(auth, db, c), fields(user = %auth.user))]
pub async fn link_get(
    id: &str,
    auth: SessionToken,
    db: &State<Db>,
    c: &State<Config>,
) -> Result<Envelope, Problem> {
    let id = parse_id(id, "feedback link")?;

    let db = db.get().await?;
    let link = owned_link(db, id, &auth).await?;

    let shareable = c.shareable_link(&link.token);
    Envelope::ok("Feedback link found").with("link", LinkResponse::new(link, shareable))
}

#[utoipa::path(
    params(("id", description = "feedback link ID")),
    request_body = LinkUpdateData,
    responses(
        (status = 200, description = "Updated feedback link", body = LinkResponse),
        (status = 400, description = "Malformed ID, invalid title or unknown status", body = Problem),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 403, description = "Caller doesn't own the link", body = Problem),
        (status = 404, description = "Feedback link doesn't exist", body = Problem),
    ),
    security(("session" = []))
)]
#[put("/feedback-links/<id>", data = "<data>")]
#[tracing::instrument(skip(data, auth, db, c), fields(user = %auth.user))]
pub async fn link_update(
    id: &str,
    data: Result<Json<LinkUpdateData>, json::Error<'_>>,
    auth: SessionToken,
    db: &State<Db>,
    c: &State<Config>,
) -> Result<Envelope, Problem> {
    let id = parse_id(id, "feedback link")?;
    let data = json_body(data)?;
    let status = data.validate()?;

    let db = db.get().await?;
    let mut link = owned_link(db, id, &auth).await?;
    data.apply(status, &mut link);
    db.update_link(&link).await?;
    tracing::info!("Updated feedback link {} ({})", link.id, link.status);

    let shareable = c.shareable_link(&link.token);
    Envelope::ok("Feedback link updated successfully")
        .with("link", LinkResponse::new(link, shareable))
}

#[utoipa::path(
    params(("id", description = "feedback link ID")),
    responses(
        (status = 200, description = "Feedback link and its submissions deleted"),
        (status = 400, description = "Malformed feedback link ID", body = Problem),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 403, description = "Caller doesn't own the link", body = Problem),
        (status = 404, description = "Feedback link doesn't exist", body = Problem),
        (status = 500, description = "Deletion was rolled back", body = Problem),
    ),
    security(("session" = []))
)]
#[delete("/feedback-links/<id>")]
#[tracing::instrument(skip(auth, db), fields(user = %auth.user))]
pub async fn link_delete(id: &str, auth: SessionToken, db: &State<Db>) -> Result<Envelope, Problem> {
    let id = parse_id(id, "feedback link")?;

    let client = db.client().await?;
    let db = db.get().await?;
    let link = owned_link(db, id, &auth).await?;

    if !db.delete_link_cascade(client, &link).await? {
        return Err(link_problem::not_found());
    }

    Ok(Envelope::ok("Feedback link deleted successfully"))
}

#[utoipa::path(
    params(("id", description = "feedback link ID")),
    responses(
        (status = 200, description = "Submissions, newest first", body = Vec<SubmissionResponse>),
        (status = 400, description = "Malformed feedback link ID", body = Problem),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 403, description = "Caller doesn't own the link", body = Problem),
        (status = 404, description = "Feedback link doesn't exist", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/feedback-links/<id>/submissions", rank = 2)]
#[tracing::instrument(skip(auth, db), fields(user = %auth.user))]
pub async fn link_submissions(
    id: &str,
    auth: SessionToken,
    db: &State<Db>,
) -> Result<Envelope, Problem> {
    let id = parse_id(id, "feedback link")?;

    let db = db.get().await?;
    let link = owned_link(db, id, &auth).await?;

    let submissions: Vec<SubmissionResponse> = db
        .list_submissions(link.id)
        .await?
        .into_iter()
        .map(SubmissionResponse::from)
        .collect();

    Envelope::ok("Submissions found").with("submissions", submissions)
}

#[utoipa::path(
    params(("token", description = "public feedback link token")),
    responses(
        (status = 200, description = "Public view of the feedback link", body = PublicLinkResponse),
        (status = 404, description = "Unknown token", body = Problem),
    )
)]
#[get("/feedback-links/public/<token>", rank = 1)]
#[tracing::instrument(skip(db))]
pub async fn link_public(token: &str, db: &State<Db>) -> Result<Envelope, Problem> {
    let db = db.get().await?;
    let link = db
        .find_link_by_token(token)
        .await?
        .ok_or_else(link_problem::not_found)?;
    let class = db.find_class(link.class).await?;

    Envelope::ok("Feedback link found").with("link", PublicLinkResponse::new(link, class))
}
