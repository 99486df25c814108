use bson::doc;
use mongodb::options::FindOptions;
use mongodb::Database;
use rocket::futures::TryStreamExt;

use super::{Class, CLASS_COLLECTION_NAME};
use crate::data::user::USER_COLLECTION_NAME;
use crate::data::Id;
use crate::db::filter;

pub trait ClassDbExt {
    /// Classes owned by `professor`, newest first.
    async fn list_classes(&self, professor: Id) -> Result<Vec<Class>, mongodb::error::Error>;
    async fn find_class(&self, id: Id) -> Result<Option<Class>, mongodb::error::Error>;
    /// Inserts `class` and records it on its professor.
    async fn create_class(&self, class: &Class) -> Result<(), mongodb::error::Error>;
    async fn push_class_link(&self, class: Id, link: Id) -> Result<(), mongodb::error::Error>;
}

impl ClassDbExt for Database {
    async fn list_classes(&self, professor: Id) -> Result<Vec<Class>, mongodb::error::Error> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        self.collection::<Class>(CLASS_COLLECTION_NAME)
            .find(doc! { "professor": professor }, options)
            .await?
            .try_collect()
            .await
    }

    async fn find_class(&self, id: Id) -> Result<Option<Class>, mongodb::error::Error> {
        self.collection::<Class>(CLASS_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
    }

    async fn create_class(&self, class: &Class) -> Result<(), mongodb::error::Error> {
        self.collection::<Class>(CLASS_COLLECTION_NAME)
            .insert_one(class, None)
            .await?;
        self.collection::<bson::Document>(USER_COLLECTION_NAME)
            .update_one(
                filter::by_id(class.professor),
                doc! { "$push": { "classes": class.id } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn push_class_link(&self, class: Id, link: Id) -> Result<(), mongodb::error::Error> {
        self.collection::<Class>(CLASS_COLLECTION_NAME)
            .update_one(
                filter::by_id(class),
                doc! { "$push": { "feedback_links": link } },
                None,
            )
            .await?;
        Ok(())
    }
}
