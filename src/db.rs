//! Process-wide MongoDB connection.
//!
//! The connection is established on first use and cached for every later
//! request. Concurrent first callers wait on the same initialisation; a
//! failed attempt leaves the cell empty so that the next request retries.

use bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use tokio::sync::OnceCell;

use crate::data::link::LINK_COLLECTION_NAME;
use crate::data::user::USER_COLLECTION_NAME;

pub struct Db {
    uri: String,
    name: String,
    connection: OnceCell<(Client, Database)>,
}

impl Db {
    pub fn new(uri: impl ToString, name: impl ToString) -> Db {
        Db {
            uri: uri.to_string(),
            name: name.to_string(),
            connection: OnceCell::new(),
        }
    }

    /// Returns the cached database handle, connecting first if needed.
    pub async fn get(&self) -> Result<&Database, mongodb::error::Error> {
        let (_, database) = self.connection.get_or_try_init(|| self.connect()).await?;
        Ok(database)
    }

    /// The client behind [`Db::get`]; sessions and transactions start here.
    pub async fn client(&self) -> Result<&Client, mongodb::error::Error> {
        let (client, _) = self.connection.get_or_try_init(|| self.connect()).await?;
        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connect(&self) -> Result<(Client, Database), mongodb::error::Error> {
        tracing::info!("Connecting to MongoDB database '{}'...", self.name);
        let client = Client::with_uri_str(self.uri.as_str()).await?;
        let db = client.database(self.name.as_str());

        db.run_command(doc! { "ping": 1 }, None).await?;
        ensure_indexes(&db).await?;

        tracing::info!("New database connection established.");
        Ok((client, db))
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn unique_index(field: &str) -> IndexModel {
    IndexModel::builder()
        .keys(doc! { field: 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let users = db.collection::<bson::Document>(USER_COLLECTION_NAME);
    users.create_index(unique_index("username"), None).await?;
    users.create_index(unique_index("email"), None).await?;

    db.collection::<bson::Document>(LINK_COLLECTION_NAME)
        .create_index(unique_index("token"), None)
        .await?;

    Ok(())
}

/// Common query documents.
pub mod filter {
    use bson::{doc, Document};

    use crate::data::Id;

    #[inline]
    pub fn by_id(id: Id) -> Document {
        doc! { "_id": id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let db = Db::new("mongodb://localhost:27017", "course_feedback_test");
        assert!(!db.is_connected());
        assert_eq!(
            format!("{:?}", db),
            "Db { name: \"course_feedback_test\", connected: false }"
        );
    }

    #[rocket::async_test]
    async fn failed_connection_is_retried() {
        // Not a valid connection string; every attempt fails without I/O.
        let db = Db::new("not-a-mongodb-uri", "course_feedback_test");
        assert!(db.get().await.is_err());
        assert!(!db.is_connected());
        assert!(db.get().await.is_err());
        assert!(db.client().await.is_err());
        assert!(!db.is_connected());
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB replica set"]
    async fn client_and_database_share_one_connection() {
        let config = crate::config::Config::default();
        let db = Db::new(&config.mongodb_uri, "course_feedback_test");

        let client = db.client().await.expect("mongodb reachable");
        assert!(db.is_connected());
        let mut session = client.start_session(None).await.expect("session");
        session.start_transaction(None).await.expect("transaction");
        session.abort_transaction().await.expect("abort");

        assert_eq!(db.get().await.expect("cached").name(), "course_feedback_test");
    }
}
