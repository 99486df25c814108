use chrono::Utc;
use mongodb::Database;
use rocket::http::{CookieJar, Status};
use rocket::serde::json::{self, Json};
use rocket::State;

use super::json_body;
use crate::config::{domain_allowed, Config};
use crate::data::user::db::problem as user_problem;
use crate::data::user::db::{
    plan_sign_up, provider_usernames, username_blocked, ChangePasswordData, ProviderSignInData, SignInData, SignUpData, SignUpPlan,
    UpdateProfileData, UserDbExt, VerifyCodeData,
};
use crate::data::user::{provider_account_problem, PasswordHash, User, UserResponse};
use crate::data::validate;
use crate::db::Db;
use crate::notify;
use crate::resp::envelope::Envelope;
use crate::resp::jwt::{removal_cookie, verify_provider_token, SessionToken};
use crate::resp::problem::{is_duplicate_key, Problem};
use crate::security::Security;
use crate::util::non_empty_trimmed;

const PROVIDER_USERNAME_ATTEMPTS: usize = 5;

/// Signs a fresh session for `user` and stores it in the response cookies.
fn start_session(cookies: &CookieJar<'_>, user: &User, security: &Security) -> Result<(), Problem> {
    let cookie = SessionToken::new(user)
        .cookie(&security.jwt_keys.private)
        .map_err(|e| {
            tracing::error!("unable to sign session token: {}", e);
            Problem::new(Status::InternalServerError, "Unable to start session.")
        })?;
    cookies.add(cookie);
    Ok(())
}

/// Inserts a provider account under the first free username derived from
/// `email`. A username taken between lookup and insert moves on to the next
/// candidate.
async fn create_provider_user(db: &Database, email: &str) -> Result<User, Problem> {
    for username in provider_usernames(email, PROVIDER_USERNAME_ATTEMPTS) {
        if db.find_user_by_username(&username).await?.is_some() {
            continue;
        }

        let user = User::from_provider(username, email);
        match db.insert_user(&user).await {
            Ok(()) => return Ok(user),
            Err(e) if is_duplicate_key(&e) => {
                tracing::debug!("username '{}' was taken concurrently", user.username);
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::warn!("No free username left for a new identity provider account");
    Err(user_problem::no_provider_username())
}

#[utoipa::path(
    request_body = SignUpData,
    responses(
        (status = 201, description = "Account created and verification code sent"),
        (status = 400, description = "Invalid input, or username or email already taken", body = Problem),
        (status = 403, description = "Email domain may not register", body = Problem),
    )
)]
#[post("/sign-up", data = "<data>")]
#[tracing::instrument(skip_all)]
pub async fn sign_up(
    data: Result<Json<SignUpData>, json::Error<'_>>,
    db: &State<Db>,
    c: &State<Config>,
) -> Result<Envelope, Problem> {
    let data = json_body(data)?;
    data.validate()?;
    if !domain_allowed(&c.registration_domains, &data.email) {
        return Err(user_problem::domain_not_allowed());
    }

    let db = db.get().await?;
    let now = Utc::now();
    let by_username = db.find_user_by_username(&data.username).await?;
    let by_email = db.find_user_by_email(&data.email).await?;

    let plan = plan_sign_up(by_username.as_ref(), by_email.as_ref(), &data.email, now)?;
    if let Some(stale) = plan.stale() {
        tracing::info!("Removing stale unverified account {}", stale);
        db.delete_user(stale).await?;
    }

    let (user, code) = match (plan, by_email) {
        (SignUpPlan::Refresh { .. }, Some(mut user)) => {
            user.username = data.username;
            user.password = Some(PasswordHash::new(&data.password));
            let code = user.issue_verify_code(now);
            db.update_user(&user).await?;
            (user, code)
        }
        _ => {
            let mut user = User::new(data.username, data.email, &data.password);
            let code = user.issue_verify_code(now);
            db.insert_user(&user).await?;
            (user, code)
        }
    };

    notify::send_verify_code(&user, &code);

    Ok(Envelope::created(
        "User registered successfully. Please verify your account.",
    ))
}

#[utoipa::path(
    params(("username", Query, description = "username to check")),
    responses(
        (status = 200, description = "Username is free"),
        (status = 400, description = "Invalid or taken username", body = Problem),
    )
)]
#[get("/check-username-unique?<username>")]
#[tracing::instrument(skip(db))]
pub async fn check_username_unique(
    username: Option<&str>,
    db: &State<Db>,
) -> Result<Envelope, Problem> {
    let username = username.unwrap_or_default();
    let mut issues = vec![];
    validate::username(username, &mut issues);
    validate::finish(issues)?;

    let db = db.get().await?;
    let holder = db.find_user_by_username(username).await?;
    if username_blocked(holder.as_ref(), Utc::now()) {
        return Err(user_problem::username_taken());
    }

    Ok(Envelope::ok("Username is unique"))
}

#[utoipa::path(
    request_body = VerifyCodeData,
    responses(
        (status = 200, description = "Account verified"),
        (status = 400, description = "Wrong or expired code, or account already verified", body = Problem),
        (status = 404, description = "Unknown username", body = Problem),
    )
)]
#[post("/verify-code", data = "<data>")]
#[tracing::instrument(skip_all)]
pub async fn verify_code(
    data: Result<Json<VerifyCodeData>, json::Error<'_>>,
    db: &State<Db>,
) -> Result<Envelope, Problem> {
    let data = json_body(data)?;
    data.validate()?;

    let db = db.get().await?;
    let mut user = db
        .find_user_by_username(&data.username)
        .await?
        .ok_or_else(user_problem::not_found)?;

    user.check_verify_code(&data.code, Utc::now())?;
    let email_change = user.pending_email.is_some();
    user.mark_verified();
    db.update_user(&user).await.map_err(|e| {
        if is_duplicate_key(&e) {
            user_problem::email_taken()
        } else {
            Problem::from(e)
        }
    })?;

    if email_change {
        tracing::info!("Confirmed new email address of account {}", user.id);
        Ok(Envelope::ok("Email address updated successfully"))
    } else {
        tracing::info!("Verified account {}", user.id);
        Ok(Envelope::ok("Account verified successfully"))
    }
}

#[utoipa::path(
    request_body = SignInData,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = UserResponse),
        (status = 400, description = "Invalid input or identity provider account", body = Problem),
        (status = 401, description = "Incorrect password", body = Problem),
        (status = 403, description = "Account isn't verified", body = Problem),
        (status = 404, description = "No such user", body = Problem),
    )
)]
#[post("/sign-in", data = "<data>")]
#[tracing::instrument(skip_all)]
pub async fn sign_in(
    data: Result<Json<SignInData>, json::Error<'_>>,
    cookies: &CookieJar<'_>,
    db: &State<Db>,
    security: &State<Security>,
) -> Result<Envelope, Problem> {
    let data = json_body(data)?;
    data.validate()?;

    // VULN: no rate limiting of password attempts
    let db = db.get().await?;
    let user = db
        .find_user_by_identifier(&data.identifier)
        .await?
        .ok_or_else(user_problem::not_found)?;
    user.check_sign_in(&data.password)?;

    start_session(cookies, &user, security)?;
    tracing::info!("User {} signed in", user.id);

    Envelope::ok("Signed in successfully").with("user", UserResponse::from(user))
}

#[utoipa::path(
    request_body = ProviderSignInData,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = UserResponse),
        (status = 400, description = "Identity provider isn't configured", body = Problem),
        (status = 401, description = "ID token was rejected", body = Problem),
        (status = 403, description = "Email domain isn't allowed", body = Problem),
    )
)]
#[post("/auth/provider", data = "<data>")]
#[tracing::instrument(skip_all)]
pub async fn provider_sign_in(
    data: Result<Json<ProviderSignInData>, json::Error<'_>>,
    cookies: &CookieJar<'_>,
    db: &State<Db>,
    c: &State<Config>,
    security: &State<Security>,
) -> Result<Envelope, Problem> {
    let data = json_body(data)?;
    let provider = c
        .identity_provider
        .as_ref()
        .ok_or_else(|| Problem::bad_request("Identity provider sign-in isn't configured."))?;

    let public_key = rocket::tokio::fs::read(&provider.public_key)
        .await
        .map_err(|e| {
            tracing::error!(
                "unable to read identity provider key '{}': {}",
                provider.public_key.display(),
                e
            );
            Problem::new(Status::InternalServerError, "Identity provider is misconfigured.")
        })?;
    let claims = verify_provider_token(&data.id_token, provider, public_key)?;

    if !domain_allowed(&provider.allowed_domains, &claims.email) {
        return Err(user_problem::domain_not_allowed());
    }

    let db = db.get().await?;
    let user = match db.find_user_by_email(&claims.email).await? {
        Some(mut user) => {
            if !user.is_verified {
                user.verify_through_provider();
                db.update_user(&user).await?;
                tracing::info!("Account {} verified through the identity provider", user.id);
            }
            user
        }
        None => create_provider_user(db, &claims.email).await?,
    };

    start_session(cookies, &user, security)?;
    tracing::info!("User {} signed in through the identity provider", user.id);

    Envelope::ok("Signed in successfully").with("user", UserResponse::from(user))
}

#[utoipa::path(responses((status = 200, description = "Session cookie removed")))]
#[post("/sign-out")]
#[tracing::instrument(skip_all)]
pub async fn sign_out(cookies: &CookieJar<'_>) -> Envelope {
    cookies.remove(removal_cookie());
    Envelope::ok("Signed out successfully")
}

#[utoipa::path(
    responses(
        (status = 200, description = "Signed in user", body = UserResponse),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 404, description = "User no longer exists", body = Problem),
    ),
    security(("session" = []))
)]
#[get("/user")]
#[tracing::instrument(skip_all, fields(user = %auth.user))]
pub async fn user_get(auth: SessionToken, db: &State<Db>) -> Result<Envelope, Problem> {
    let db = db.get().await?;
    let user = db
        .find_user(auth.user_id())
        .await?
        .ok_or_else(user_problem::not_found)?;

    Envelope::ok("User found").with("user", UserResponse::from(user))
}

#[utoipa::path(
    request_body = UpdateProfileData,
    responses(
        (status = 200, description = "Profile updated; session cookie re-issued. A new email waits for its verification code", body = UserResponse),
        (status = 400, description = "Invalid input, or name or email used by another account", body = Problem),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 404, description = "User no longer exists", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/user/update-profile", data = "<data>")]
#[tracing::instrument(skip_all, fields(user = %auth.user))]
pub async fn update_profile(
    data: Result<Json<UpdateProfileData>, json::Error<'_>>,
    auth: SessionToken,
    cookies: &CookieJar<'_>,
    db: &State<Db>,
    security: &State<Security>,
) -> Result<Envelope, Problem> {
    let data = json_body(data)?;
    data.validate()?;

    let db = db.get().await?;
    let mut user = db
        .find_user(auth.user_id())
        .await?
        .ok_or_else(user_problem::not_found)?;

    if let Some(other) = db.find_user_conflict(user.id, &data.name, &data.email).await? {
        return Err(if other.username == data.name {
            user_problem::username_taken()
        } else {
            user_problem::email_taken()
        });
    }

    user.username = data.name;
    user.department = non_empty_trimmed(data.department.as_deref());
    let code = user.request_email_change(&data.email, Utc::now());
    db.update_user(&user).await?;

    start_session(cookies, &user, security)?;

    let message = match &code {
        Some(code) => {
            notify::send_verify_code(&user, code);
            "Profile updated. Enter the code sent to your new email address to confirm it."
        }
        None => "Profile updated successfully",
    };
    Envelope::ok(message).with("user", UserResponse::from(user))
}

#[utoipa::path(
    request_body = ChangePasswordData,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Invalid input or identity provider account", body = Problem),
        (status = 401, description = "Missing or expired session", body = Problem),
        (status = 403, description = "Current password is incorrect", body = Problem),
        (status = 404, description = "User no longer exists", body = Problem),
    ),
    security(("session" = []))
)]
#[post("/user/change-password", data = "<data>")]
#[tracing::instrument(skip_all, fields(user = %auth.user))]
pub async fn change_password(
    data: Result<Json<ChangePasswordData>, json::Error<'_>>,
    auth: SessionToken,
    db: &State<Db>,
) -> Result<Envelope, Problem> {
    let data = json_body(data)?;
    data.validate()?;

    let db = db.get().await?;
    let mut user = db
        .find_user(auth.user_id())
        .await?
        .ok_or_else(user_problem::not_found)?;

    let current = user.password.as_ref().ok_or_else(provider_account_problem)?;
    if !current.verify(&data.current_password) {
        return Err(Problem::forbidden("Current password is incorrect"));
    }

    user.password = Some(PasswordHash::new(&data.new_password));
    db.update_user(&user).await?;
    tracing::info!("Password changed");

    Ok(Envelope::ok("Password changed successfully"))
}

#[cfg(test)]
mod user_endpoints {
    use rocket::http::{ContentType, Status};
    use serde_json::{json, Value};

    use chrono::{Duration, Utc};
    use mongodb::Database;
    use rocket::local::asynchronous::Client;

    use crate::config::Config;
    use crate::data::user::db::{provider_username_base, UserDbExt};
    use crate::data::user::User;
    use crate::db::Db;
    use crate::resp::jwt::tests::{fixture_provider, fixture_security, provider_token};
    use crate::resp::jwt::HasAuthCookie;
    use crate::route::testing::{client, client_with, professor, session_cookie};

    fn unique_username() -> String {
        format!("t{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
    }

    async fn provider_client() -> Client {
        let mut config = Config::default();
        config.identity_provider = Some(fixture_provider());
        client_with(config).await
    }

    async fn database(client: &Client) -> &Database {
        client
            .rocket()
            .state::<Db>()
            .expect("db managed")
            .get()
            .await
            .expect("mongodb reachable")
    }

    fn id_token(email: &str) -> String {
        let provider = fixture_provider();
        provider_token(json!({
            "iss": provider.issuer,
            "aud": provider.audience,
            "exp": (Utc::now() + Duration::minutes(5)).timestamp(),
            "email": email,
            "email_verified": true,
        }))
    }

    #[rocket::async_test]
    async fn sign_up_rejects_invalid_input() {
        let client = client().await;
        let response = client
            .post("/api/v1/sign-up")
            .header(ContentType::JSON)
            .body(json!({ "username": "ab", "email": "nope", "password": "1" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["success"], false);
        let message = body["message"].as_str().expect("message");
        assert!(message.starts_with("Invalid input: "), "{}", message);
    }

    #[rocket::async_test]
    async fn sign_up_rejects_malformed_json() {
        let client = client().await;
        let response = client
            .post("/api/v1/sign-up")
            .header(ContentType::JSON)
            .body("{ not json")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(
            body["message"],
            "There was a problem parsing part of the request."
        );
    }

    #[rocket::async_test]
    async fn sign_up_enforces_registration_domains() {
        let mut config = Config::default();
        config.registration_domains = vec!["university.edu".to_string()];
        let client = client_with(config).await;

        let response = client
            .post("/api/v1/sign-up")
            .header(ContentType::JSON)
            .body(
                json!({ "username": "prof_eve", "email": "eve@gmail.com", "password": "secret" })
                    .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn check_username_rejects_invalid_format() {
        let client = client().await;
        let response = client
            .get("/api/v1/check-username-unique?username=a-b")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn verify_code_requires_six_digits() {
        let client = client().await;
        let response = client
            .post("/api/v1/verify-code")
            .header(ContentType::JSON)
            .body(json!({ "username": "prof_ada", "code": "12ab" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn provider_sign_in_needs_configuration() {
        let client = client().await;
        let response = client
            .post("/api/v1/auth/provider")
            .header(ContentType::JSON)
            .body(json!({ "idToken": "a.b.c" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn sign_out_clears_cookie() {
        let client = client().await;
        let response = client
            .post("/api/v1/sign-out")
            .cookie(session_cookie(&professor()))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert!(response
            .get_auth_cookie(&fixture_security().jwt_keys.public)
            .is_none());
    }

    #[rocket::async_test]
    async fn profile_requires_session() {
        let client = client().await;
        let response = client.get("/api/v1/user").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn change_password_validates_before_lookup() {
        let client = client().await;
        let response = client
            .post("/api/v1/user/change-password")
            .cookie(session_cookie(&professor()))
            .header(ContentType::JSON)
            .body(
                json!({
                    "currentPassword": "old",
                    "newPassword": "newpass",
                    "confirmPassword": "different",
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB replica set"]
    async fn sign_up_verify_and_sign_in() {
        let client = client().await;
        let db = database(&client).await;

        let username = unique_username();
        let email = format!("{}@university.edu", username);

        let response = client
            .post("/api/v1/sign-up")
            .header(ContentType::JSON)
            .body(json!({ "username": username, "email": email, "password": "secret" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let duplicate = client
            .post("/api/v1/sign-up")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "email": format!("other_{}", email),
                    "password": "secret",
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(duplicate.status(), Status::BadRequest);

        let unverified = client
            .post("/api/v1/sign-in")
            .header(ContentType::JSON)
            .body(json!({ "identifier": username, "password": "secret" }).to_string())
            .dispatch()
            .await;
        assert_eq!(unverified.status(), Status::Forbidden);

        let stored: User = db
            .find_user_by_username(&username)
            .await
            .expect("query")
            .expect("user stored");
        let code = stored.verify_code.clone().expect("code issued");

        let response = client
            .post("/api/v1/verify-code")
            .header(ContentType::JSON)
            .body(json!({ "username": username, "code": code }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let wrong = client
            .post("/api/v1/sign-in")
            .header(ContentType::JSON)
            .body(json!({ "identifier": email, "password": "wrong!" }).to_string())
            .dispatch()
            .await;
        assert_eq!(wrong.status(), Status::Unauthorized);

        let response = client
            .post("/api/v1/sign-in")
            .header(ContentType::JSON)
            .body(json!({ "identifier": email, "password": "secret" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert!(response
            .get_auth_cookie(&fixture_security().jwt_keys.public)
            .is_some());

        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["user"]["username"], username.as_str());
        assert!(body["user"].get("password").is_none());

        db.delete_user(stored.id).await.expect("cleanup");
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB replica set"]
    async fn provider_sign_in_discards_password_of_unverified_account() {
        let client = provider_client().await;
        let db = database(&client).await;

        let squatter = unique_username();
        let email = format!("{}@university.edu", unique_username());
        let response = client
            .post("/api/v1/sign-up")
            .header(ContentType::JSON)
            .body(
                json!({ "username": squatter, "email": email, "password": "not-theirs" })
                    .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let response = client
            .post("/api/v1/auth/provider")
            .header(ContentType::JSON)
            .body(json!({ "idToken": id_token(&email) }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .post("/api/v1/sign-in")
            .header(ContentType::JSON)
            .body(json!({ "identifier": email, "password": "not-theirs" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let stored = db
            .find_user_by_email(&email)
            .await
            .expect("query")
            .expect("account kept");
        assert!(stored.is_verified);
        assert!(stored.password.is_none());

        db.delete_user(stored.id).await.expect("cleanup");
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB replica set"]
    async fn provider_sign_in_skips_taken_username() {
        let client = provider_client().await;
        let db = database(&client).await;

        let email = format!("{}@university.edu", unique_username());
        let base = provider_username_base(&email);
        let holder = User::from_provider(&base, format!("other_{}", email));
        db.insert_user(&holder).await.expect("insert holder");

        let response = client
            .post("/api/v1/auth/provider")
            .header(ContentType::JSON)
            .body(json!({ "idToken": id_token(&email) }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().await.expect("json body");
        let username = body["user"]["username"].as_str().expect("username");
        assert_ne!(username, base);
        assert!(username.starts_with(&base), "{}", username);

        let created = db
            .find_user_by_email(&email)
            .await
            .expect("query")
            .expect("account created");
        db.delete_user(created.id).await.expect("cleanup");
        db.delete_user(holder.id).await.expect("cleanup");
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB replica set"]
    async fn email_change_waits_for_verification_code() {
        let client = client().await;
        let db = database(&client).await;

        let username = unique_username();
        let user = User::from_provider(&username, format!("{}@university.edu", username));
        db.insert_user(&user).await.expect("insert user");
        let new_email = format!("{}@university.edu", unique_username());

        let response = client
            .post("/api/v1/user/update-profile")
            .cookie(session_cookie(&user))
            .header(ContentType::JSON)
            .body(json!({ "name": username, "email": new_email }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.expect("json body");
        assert_eq!(body["user"]["email"], user.email.as_str());
        assert_eq!(body["user"]["pendingEmail"], new_email.as_str());
        assert!(db
            .find_user_by_email(&new_email)
            .await
            .expect("query")
            .is_none());

        let stored = db.find_user(user.id).await.expect("query").expect("stored");
        let code = stored.verify_code.clone().expect("code issued");
        let response = client
            .post("/api/v1/verify-code")
            .header(ContentType::JSON)
            .body(json!({ "username": username, "code": code }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let stored = db.find_user(user.id).await.expect("query").expect("stored");
        assert_eq!(stored.email, new_email);
        assert!(stored.pending_email.is_none());
        assert!(stored.is_verified);

        db.delete_user(user.id).await.expect("cleanup");
    }
}
