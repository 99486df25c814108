use rocket::serde::json::{self, Json};
use rocket::State;

use super::json_body;
use crate::config::Config;
use crate::data::class::db::ClassDbExt;
use crate::data::class::problem as class_problem;
use crate::data::class::{Class, ClassCreateData, ClassDetailResponse, ClassResponse};
use crate::data::link::db::LinkDbExt;
use crate::data::link::{FeedbackLink, LinkCreateData, LinkResponse};
use crate::data::parse_id;
use crate::data::user::db::problem as user_problem;
use crate::data::user::db::UserDbExt;
use crate::db::Db;
use crate::resp::envelope::Envelope;
use crate::resp::jwt::SessionToken;
use crate::resp::problem::Problem;

#[utoipa::path(
    responses(
        (status = 200, description = "Classes owned by the signed in professor", body = Vec<ClassResponse>),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 404, description = "Professor no longer exists", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/classes")]
#[tracing::instrument(skip_all, fields(user = %auth.user))]
pub async fn class_list(auth: SessionToken, db: &State<Db>) -> Result<Envelope, Problem> {
    let db = db.get().await?;
    let professor = db
        .find_user(auth.user_id())
        .await?
        .ok_or_else(user_problem::not_found)?;

    let classes: Vec<ClassResponse> = db
        .list_classes(professor.id)
        .await?
        .into_iter()
        .map(ClassResponse::from)
        .collect();

    Envelope::ok("Classes found").with("classes", classes)
}

#[utoipa::path(
    request_body = ClassCreateData,
    responses(
        (status = 201, description = "Class created", body = ClassResponse),
        (status = 400, description = "Invalid input", body = Problem),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 404, description = "Professor no longer exists", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/classes", data = "<data>")]
#[tracing::instrument(skip_all, fields(user = %auth.user))]
pub async fn class_create(
    data: Result<Json<ClassCreateData>, json::Error<'_>>,
    auth: SessionToken,
    db: &State<Db>,
) -> Result<Envelope, Problem> {
    let data = json_body(data)?;
    data.validate()?;

    let db = db.get().await?;
    let professor = db
        .find_user(auth.user_id())
        .await?
        .ok_or_else(user_problem::not_found)?;

    let class = Class::new(data, professor.id);
    db.create_class(&class).await?;
    tracing::info!("Created class {}", class.id);

    Envelope::created("Class created successfully").with("class", ClassResponse::from(class))
}

#[utoipa::path(
    params(("id", description = "class ID")),
    responses(
        (status = 200, description = "Class with its feedback links", body = ClassDetailResponse),
        (status = 400, description = "Malformed class ID", body = Problem),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 404, description = "Class doesn't exist or isn't owned by the caller", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/classes/<id>")]
#[tracing::instrument(skip(auth, db, c), fields(user = %auth.user))]
pub async fn class_detail(
    id: &str,
    auth: SessionToken,
    db: &State<Db>,
    c: &State<Config>,
) -> Result<Envelope, Problem> {
    let id = parse_id(id, "class")?;

    let db = db.get().await?;
    let class = db
        .find_class(id)
        .await?
        .filter(|class| auth.owns(class.professor))
        .ok_or_else(class_problem::not_found_or_not_owner)?;

    let links = db
        .list_class_links(class.id)
        .await?
        .into_iter()
        .map(|link| {
            let shareable = c.shareable_link(&link.token);
            LinkResponse::new(link, shareable)
        })
        .collect();

    Envelope::ok("Class found").with("class", ClassDetailResponse::new(class, links))
}

#[utoipa::path(
    params(("id", description = "class ID")),
    request_body = LinkCreateData,
    responses(
        (status = 201, description = "Feedback link created", body = LinkResponse),
        (status = 400, description = "Malformed class ID or invalid title", body = Problem),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 403, description = "Caller doesn't own the class", body = Problem),
        (status = 404, description = "Class doesn't exist", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/classes/<id>/feedback-links", data = "<data>")]
#[tracing::instrument(skip(data, auth, db, c), fields(user = %auth.user))]
pub async fn link_create(
    id: &str,
    data: Result<Json<LinkCreateData>, json::Error<'_>>,
    auth: SessionToken,
    db: &State<Db>,
    c: &State<Config>,
) -> Result<Envelope, Problem> {
    let id = parse_id(id, "class")?;
    let data = json_body(data)?;
    data.validate()?;

    let db = db.get().await?;
    let class = db
        .find_class(id)
        .await?
        .ok_or_else(class_problem::not_found)?;
    class.check_owner(auth.user_id())?;

    let link = FeedbackLink::new(&data.title, &class);
    db.create_link(&link).await?;
    tracing::info!("Created feedback link {} for class {}", link.id, class.id);

    let shareable = c.shareable_link(&link.token);
    Envelope::created("Feedback link created successfully")
        .with("link", LinkResponse::new(link, shareable))
}

#[cfg(test)]
mod class_endpoints {
    use rocket::http::{ContentType, Status};
    use serde_json::{json, Value};

    use crate::data::class::db::ClassDbExt;
    use crate::data::user::db::UserDbExt;
    use crate::db::Db;
    use crate::route::testing::{client, professor, remove_professor, session_cookie};

    #[rocket::async_test]
    async fn class_list_requires_session() {
        let client = client().await;
        let response = client.get("/api/v1/classes").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn class_create_validates_name() {
        let client = client().await;
        let response = client
            .post("/api/v1/classes")
            .cookie(session_cookie(&professor()))
            .header(ContentType::JSON)
            .body(json!({ "className": " x " }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(
            body["message"],
            "Invalid input: Class name must be at least 2 characters long"
        );
    }

    #[rocket::async_test]
    async fn class_detail_rejects_malformed_id() {
        let client = client().await;
        let response = client
            .get("/api/v1/classes/64f1c0ffee")
            .cookie(session_cookie(&professor()))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["message"], "Invalid class ID");
    }

    #[rocket::async_test]
    async fn link_create_validates_title() {
        let client = client().await;
        let response = client
            .post(format!(
                "/api/v1/classes/{}/feedback-links",
                uuid::Uuid::new_v4()
            ))
            .cookie(session_cookie(&professor()))
            .header(ContentType::JSON)
            .body(json!({ "title": "   " }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB replica set"]
    async fn only_the_owner_sees_a_class() {
        let client = client().await;
        let db = client
            .rocket()
            .state::<Db>()
            .expect("db managed")
            .get()
            .await
            .expect("mongodb reachable");

        let mut owner = professor();
        owner.username = format!("o{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        owner.email = format!("{}@university.edu", owner.username);
        db.insert_user(&owner).await.expect("insert owner");

        let response = client
            .post("/api/v1/classes")
            .cookie(session_cookie(&owner))
            .header(ContentType::JSON)
            .body(json!({ "className": "Compilers", "semester": "Fall 2024" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        let body: Value = response.into_json().await.expect("json body");
        let class_id = body["class"]["id"].as_str().expect("class id").to_string();

        let stranger = professor();
        let response = client
            .get(format!("/api/v1/classes/{}", class_id))
            .cookie(session_cookie(&stranger))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let response = client
            .post(format!("/api/v1/classes/{}/feedback-links", class_id))
            .cookie(session_cookie(&stranger))
            .header(ContentType::JSON)
            .body(json!({ "title": "Week 1" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .get(format!("/api/v1/classes/{}", class_id))
            .cookie(session_cookie(&owner))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["class"]["className"], "Compilers");

        let stored = db
            .find_user(owner.id)
            .await
            .expect("query")
            .expect("owner stored");
        assert_eq!(stored.classes.len(), 1);
        assert!(db
            .find_class(stored.classes[0])
            .await
            .expect("query")
            .is_some());

        remove_professor(db, owner.id).await;
    }
}
