use std::path::PathBuf;

use rocket::fs::NamedFile;
use rocket::State;

use crate::config::Config;

async fn app_index_file(c: &Config) -> Option<NamedFile> {
    let index = c.public_content.join("index.html");
    match NamedFile::open(&index).await {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!("unable to open '{}': {}", index.display(), e);
            None
        }
    }
}

#[utoipa::path(
    responses(
        (status = 200, description = "Front-end bundle"),
        (status = 404, description = "No bundle is installed"),
    )
)]
#[get("/")]
pub async fn app(c: &State<Config>) -> Option<NamedFile> {
    app_index_file(c).await
}

#[get("/<path..>", rank = 10)]
pub async fn app_path(path: PathBuf, c: &State<Config>) -> Option<NamedFile> {
    match NamedFile::open(c.public_content.join(path)).await {
        Ok(file) => Some(file),
        Err(_) => app_index_file(c).await,
    }
}

#[cfg(test)]
mod file_endpoints {
    use rocket::http::Status;

    use crate::config::Config;
    use crate::route::testing::client_with;

    #[rocket::async_test]
    async fn serves_bundle_with_index_fallback() {
        let dir = tempfile::tempdir().expect("unable to create temp dir");
        std::fs::write(dir.path().join("index.html"), "<html>app</html>").expect("write index");
        std::fs::write(dir.path().join("app.js"), "console.log(1)").expect("write script");

        let mut config = Config::default();
        config.public_content = dir.path().to_path_buf();
        let client = client_with(config).await;

        let response = client.get("/app.js").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.as_deref(), Some("console.log(1)"));

        let response = client.get("/feedback/some-token").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.as_deref(), Some("<html>app</html>"));
    }

    #[rocket::async_test]
    async fn missing_bundle_is_not_found() {
        let dir = tempfile::tempdir().expect("unable to create temp dir");
        let mut config = Config::default();
        config.public_content = dir.path().to_path_buf();
        let client = client_with(config).await;

        let response = client.get("/").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }
}
