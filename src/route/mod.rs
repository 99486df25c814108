use std::collections::BTreeMap;

use rocket::http::Status;
use rocket::serde::json::{self, Json};
use rocket::{Build, Catcher, Request, Rocket, Route};

pub mod class;
pub mod files;
pub mod link;
pub mod submission;
pub mod users;

use class::*;
use files::*;
use link::*;
use submission::*;
use users::*;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    data::{
        class::{ClassCreateData, ClassDetailResponse, ClassResponse},
        link::{LinkCreateData, LinkResponse, LinkUpdateData, PublicClassInfo, PublicLinkResponse},
        submission::{SubmissionCreateData, SubmissionResponse},
        user::db::{
            ChangePasswordData, ProviderSignInData, SignInData, SignUpData, UpdateProfileData,
            VerifyCodeData,
        },
        user::UserResponse,
    },
    resp::{
        jwt::{doc::SessionAuth, session_failure},
        problem::{problems, Problem},
    },
    status::LinkStatus,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        sign_up,
        check_username_unique,
        verify_code,
        sign_in,
        provider_sign_in,
        sign_out,
        user_get,
        update_profile,
        change_password,
        class_list,
        class_create,
        class_detail,
        link_create,
        link_get,
        link_update,
        link_delete,
        link_submissions,
        link_public,
        submission_create,
        app
    ),
    components(schemas(
        LinkStatus,
        UserResponse,
        SignUpData,
        SignInData,
        VerifyCodeData,
        ProviderSignInData,
        UpdateProfileData,
        ChangePasswordData,
        ClassCreateData,
        ClassResponse,
        ClassDetailResponse,
        LinkCreateData,
        LinkUpdateData,
        LinkResponse,
        PublicClassInfo,
        PublicLinkResponse,
        SubmissionCreateData,
        SubmissionResponse,
        Problem
    )),
    modifiers(&SessionAuth, &V1_PREFIX)
)]
pub struct ApiDocV1;

pub struct PathPrefix(pub &'static str);
static V1_PREFIX: PathPrefix = PathPrefix("/api/v1");

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            // The static bundle is served from the root.
            let path = if path == "/" {
                path
            } else {
                self.0.to_string() + path.as_ref()
            };
            new_paths.insert(path, item);
        }

        openapi.paths.paths = new_paths;
    }
}

/// Unwraps a JSON request body, answering 400 when it couldn't be read.
pub fn json_body<T>(data: Result<Json<T>, json::Error<'_>>) -> Result<T, Problem> {
    match data {
        Ok(data) => Ok(data.into_inner()),
        Err(json::Error::Io(e)) => {
            tracing::debug!("unable to read request body: {}", e);
            Err(problems::parse_problem("Unable to read request body."))
        }
        Err(json::Error::Parse(_, e)) => Err(problems::parse_problem(e)),
    }
}

pub fn api_v1() -> Vec<Route> {
    routes![
        sign_up,
        check_username_unique,
        verify_code,
        sign_in,
        provider_sign_in,
        sign_out,
        user_get,
        update_profile,
        change_password,
        class_list,
        class_create,
        class_detail,
        link_create,
        link_get,
        link_update,
        link_delete,
        link_submissions,
        link_public,
        submission_create
    ]
}

#[catch(400)]
fn bad_request() -> Problem {
    Problem::bad_request("The request could not be understood.")
}

#[catch(401)]
fn unauthorized(req: &Request) -> Problem {
    session_failure(req).unwrap_or_else(|| Problem::new(Status::Unauthorized, "Not authenticated"))
}

#[catch(403)]
fn forbidden() -> Problem {
    Problem::forbidden("Access to this resource is forbidden.")
}

#[catch(404)]
fn not_found() -> Problem {
    Problem::not_found("Resource not found.")
}

#[catch(422)]
fn unprocessable() -> Problem {
    Problem::new(
        Status::UnprocessableEntity,
        "The request was well-formed but contained invalid data.",
    )
}

#[catch(500)]
fn internal_error() -> Problem {
    Problem::default()
}

#[catch(default)]
fn any_status(status: Status, _: &Request) -> Problem {
    Problem::new(status, status.reason().unwrap_or("Unexpected error."))
}

pub fn catchers() -> Vec<Catcher> {
    catchers![
        bad_request,
        unauthorized,
        forbidden,
        not_found,
        unprocessable,
        internal_error,
        any_status
    ]
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/api/v1", api_v1())
        .mount(
            "/",
            SwaggerUi::new("/swagger/<_..>").url("/api/v1/openapi.json", ApiDocV1::openapi()),
        )
        .mount("/", routes![app, app_path])
        .register("/", catchers())
}
