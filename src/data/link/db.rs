use bson::{doc, Document};
use mongodb::options::FindOptions;
use mongodb::{Client, ClientSession, Database};
use rocket::futures::TryStreamExt;

use super::{FeedbackLink, LINK_COLLECTION_NAME};
use crate::data::class::db::ClassDbExt;
use crate::data::class::CLASS_COLLECTION_NAME;
use crate::data::submission::SUBMISSION_COLLECTION_NAME;
use crate::data::Id;
use crate::db::filter;

pub trait LinkDbExt {
    async fn find_link(&self, id: Id) -> Result<Option<FeedbackLink>, mongodb::error::Error>;
    async fn find_link_by_token(
        &self,
        token: impl AsRef<str>,
    ) -> Result<Option<FeedbackLink>, mongodb::error::Error>;
    /// Links of `class`, newest first.
    async fn list_class_links(&self, class: Id)
        -> Result<Vec<FeedbackLink>, mongodb::error::Error>;

    /// Inserts `link` and records it on its class.
    async fn create_link(&self, link: &FeedbackLink) -> Result<(), mongodb::error::Error>;
    /// Writes the editable fields of `link`; `submissions` is left untouched.
    async fn update_link(&self, link: &FeedbackLink) -> Result<(), mongodb::error::Error>;

    /// Removes the link, its submissions and its entry on the class in one
    /// transaction started on `client`. Returns `false` when the link was
    /// already gone.
    async fn delete_link_cascade(
        &self,
        client: &Client,
        link: &FeedbackLink,
    ) -> Result<bool, mongodb::error::Error>;
}

impl LinkDbExt for Database {
    async fn find_link(&self, id: Id) -> Result<Option<FeedbackLink>, mongodb::error::Error> {
        self.collection::<FeedbackLink>(LINK_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
    }

    async fn find_link_by_token(
        &self,
        token: impl AsRef<str>,
    ) -> Result<Option<FeedbackLink>, mongodb::error::Error> {
        self.collection::<FeedbackLink>(LINK_COLLECTION_NAME)
            .find_one(doc! { "token": token.as_ref() }, None)
            .await
    }

    async fn list_class_links(
        &self,
        class: Id,
    ) -> Result<Vec<FeedbackLink>, mongodb::error::Error> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        self.collection::<FeedbackLink>(LINK_COLLECTION_NAME)
            .find(doc! { "class": class }, options)
            .await?
            .try_collect()
            .await
    }

    async fn create_link(&self, link: &FeedbackLink) -> Result<(), mongodb::error::Error> {
        self.collection::<FeedbackLink>(LINK_COLLECTION_NAME)
            .insert_one(link, None)
            .await?;
        self.push_class_link(link.class, link.id).await
    }

    async fn update_link(&self, link: &FeedbackLink) -> Result<(), mongodb::error::Error> {
        self.collection::<FeedbackLink>(LINK_COLLECTION_NAME)
            .update_one(filter::by_id(link.id), link.update_document(), None)
            .await?;
        Ok(())
    }

    async fn delete_link_cascade(
        &self,
        client: &Client,
        link: &FeedbackLink,
    ) -> Result<bool, mongodb::error::Error> {
        let mut session = client.start_session(None).await?;
        session.start_transaction(None).await?;

        match cascade(self, &mut session, link).await {
            Ok(true) => {
                session.commit_transaction().await?;
                tracing::info!("Deleted feedback link {} with its submissions", link.id);
                Ok(true)
            }
            Ok(false) => {
                session.abort_transaction().await?;
                Ok(false)
            }
            Err(e) => {
                if let Err(abort) = session.abort_transaction().await {
                    tracing::warn!("Unable to abort link deletion: {}", abort);
                }
                Err(e)
            }
        }
    }
}

async fn cascade(
    db: &Database,
    session: &mut ClientSession,
    link: &FeedbackLink,
) -> Result<bool, mongodb::error::Error> {
    db.collection::<Document>(SUBMISSION_COLLECTION_NAME)
        .delete_many_with_session(doc! { "feedback_link": link.id }, None, session)
        .await?;

    db.collection::<Document>(CLASS_COLLECTION_NAME)
        .update_one_with_session(
            filter::by_id(link.class),
            doc! { "$pull": { "feedback_links": link.id } },
            None,
            session,
        )
        .await?;

    let deleted = db
        .collection::<Document>(LINK_COLLECTION_NAME)
        .delete_one_with_session(filter::by_id(link.id), None, session)
        .await?;

    Ok(deleted.deleted_count == 1)
}
