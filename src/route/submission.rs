use rocket::serde::json::{self, Json};
use rocket::State;

use super::json_body;
use crate::config::Config;
use crate::data::link::db::LinkDbExt;
use crate::data::link::problem as link_problem;
use crate::data::submission::db::SubmissionDbExt;
use crate::data::submission::{FeedbackSubmission, SubmissionCreateData};
use crate::db::Db;
use crate::resp::envelope::Envelope;
use crate::resp::jwt::SessionToken;
use crate::resp::problem::Problem;

#[utoipa::path(
    request_body = SubmissionCreateData,
    responses(
        (status = 201, description = "Feedback recorded anonymously"),
        (status = 400, description = "Invalid input", body = Problem),
        (status = 401, description = "Submitter must be signed in", body = Problem),
        (status = 403, description = "Feedback link is closed", body = Problem),
        (status = 404, description = "Unknown token", body = Problem),
    )
)]
#[post("/feedback-submissions", data = "<data>")]
#[tracing::instrument(skip_all)]
pub async fn submission_create(
    data: Result<Json<SubmissionCreateData>, json::Error<'_>>,
    auth: Result<SessionToken, Problem>,
    db: &State<Db>,
    c: &State<Config>,
) -> Result<Envelope, Problem> {
    // Only gates the request; the submitter is never recorded.
    if c.require_submitter_session {
        auth?;
    }

    let data = json_body(data)?;
    data.validate()?;

    let db = db.get().await?;
    let link = db
        .find_link_by_token(data.token.trim())
        .await?
        .ok_or_else(link_problem::not_found)?;
    link.check_open()?;

    let submission = FeedbackSubmission::new(&data.content, &link);
    db.create_submission(&submission).await?;
    tracing::info!("Recorded feedback for link {}", link.id);

    Ok(Envelope::created("Feedback submitted successfully"))
}
