use bson::doc;
use mongodb::options::FindOptions;
use mongodb::Database;
use rocket::futures::TryStreamExt;

use super::{FeedbackSubmission, SUBMISSION_COLLECTION_NAME};
use crate::data::link::LINK_COLLECTION_NAME;
use crate::data::Id;
use crate::db::filter;

pub trait SubmissionDbExt {
    /// Inserts `submission` and records it on its feedback link.
    async fn create_submission(
        &self,
        submission: &FeedbackSubmission,
    ) -> Result<(), mongodb::error::Error>;
    /// Submissions of `link`, newest first.
    async fn list_submissions(
        &self,
        link: Id,
    ) -> Result<Vec<FeedbackSubmission>, mongodb::error::Error>;
}

impl SubmissionDbExt for Database {
    async fn create_submission(
        &self,
        submission: &FeedbackSubmission,
    ) -> Result<(), mongodb::error::Error> {
        self.collection::<FeedbackSubmission>(SUBMISSION_COLLECTION_NAME)
            .insert_one(submission, None)
            .await?;
        self.collection::<bson::Document>(LINK_COLLECTION_NAME)
            .update_one(
                filter::by_id(submission.feedback_link),
                doc! { "$push": { "submissions": submission.id } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn list_submissions(
        &self,
        link: Id,
    ) -> Result<Vec<FeedbackSubmission>, mongodb::error::Error> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        self.collection::<FeedbackSubmission>(SUBMISSION_COLLECTION_NAME)
            .find(doc! { "feedback_link": link }, options)
            .await?
            .try_collect()
            .await
    }
}
