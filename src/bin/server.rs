use course_feedback_backend::db::Db;
use tracing::Level;

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(debug_assertions)]
    let level = Some(Level::DEBUG);
    #[cfg(not(debug_assertions))]
    let level = Some(Level::INFO);

    let r = course_feedback_backend::create(level).await?;

    // Requests retry the connection on their own; this only surfaces a bad
    // URI early.
    if let Some(db) = r.state::<Db>() {
        if let Err(e) = db.get().await {
            tracing::warn!("MongoDB isn't reachable yet: {}", e);
        }
    }

    if let Err(e) = r.launch().await {
        let message = e.to_string();
        tracing::error!("Error launching server: {}", message);
        anyhow::bail!(message);
    }

    Ok(())
}
