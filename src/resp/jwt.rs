use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest, Request};
use rocket::time::OffsetDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::util::date_time_as_unix_seconds;
use crate::config::IdentityProvider;
use crate::data::user::User;
use crate::data::Id;
use crate::resp::problem::Problem;
use crate::security::Security;

pub static AUTH_COOKIE_NAME: &str = "jwt_auth";

/// Claims of the signed session cookie issued on sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    #[serde(with = "date_time_as_unix_seconds")]
    iat: DateTime<Utc>,
    #[serde(with = "date_time_as_unix_seconds")]
    exp: DateTime<Utc>,
    pub user: Uuid,
    pub username: String,
}

impl SessionToken {
    pub fn new(user: &User) -> SessionToken {
        let now = Utc::now();
        SessionToken {
            iat: now,
            exp: now + Duration::weeks(1),
            user: user.id.to_uuid_1(),
            username: user.username.clone(),
        }
    }

    pub fn user_id(&self) -> Id {
        Id::from_uuid_1(self.user)
    }

    /// Whether the signed-in user is the professor owning a record.
    pub fn owns(&self, owner: Id) -> bool {
        self.user_id() == owner
    }

    pub fn encode_jwt(
        &self,
        private_key: impl AsRef<[u8]>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let header = Header::new(Algorithm::PS256);
        let key = EncodingKey::from_rsa_pem(private_key.as_ref())?;

        encode(&header, &self, &key)
    }

    pub fn cookie(
        &self,
        private_key: impl AsRef<[u8]>,
    ) -> Result<Cookie<'static>, jsonwebtoken::errors::Error> {
        Ok(
            Cookie::build((AUTH_COOKIE_NAME, self.encode_jwt(private_key)?))
                .secure(true)
                .expires(OffsetDateTime::from_unix_timestamp(self.exp.timestamp()).ok())
                .path("/")
                .same_site(SameSite::Lax)
                .http_only(true)
                .build(),
        )
    }
}

/// Cookie that clears the session on the client.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(AUTH_COOKIE_NAME).path("/").build()
}

pub fn auth_problem(detail: impl ToString) -> Problem {
    Problem::new(Status::Unauthorized, "Not authenticated").detail(detail)
}

pub fn extract_claims(
    cookies: &CookieJar,
    public_key: impl AsRef<[u8]>,
) -> Result<SessionToken, Problem> {
    let token = match cookies.get(AUTH_COOKIE_NAME) {
        Some(jwt) => jwt.value().to_owned(),
        None => return Err(auth_problem("No session cookie.")),
    };
    tracing::trace!("extracted session token from cookie");

    decode_claims(&token, public_key)
}

pub fn decode_claims(token: &str, public_key: impl AsRef<[u8]>) -> Result<SessionToken, Problem> {
    let key = DecodingKey::from_rsa_pem(public_key.as_ref()).map_err(|e| {
        tracing::error!("session public key isn't valid: {}", e);
        Problem::new(Status::InternalServerError, "Unable to check session.")
    })?;

    match decode::<SessionToken>(token, &key, &Validation::new(Algorithm::PS256)) {
        Ok(data) => {
            tracing::debug!("decoded session token for user: {}", data.claims.user);
            Ok(data.claims)
        }
        Err(e) => match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                Err(auth_problem("Session has expired."))
            }
            _ => Err(auth_problem("Session cookie was malformed.")),
        },
    }
}

/// Request-local slot keeping the reason a session guard failed, so the
/// 401 catcher can answer with it.
struct SessionFailure(Option<Problem>);

pub fn session_failure(req: &Request<'_>) -> Option<Problem> {
    req.local_cache(|| SessionFailure(None)).0.clone()
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionToken {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let security = match req.rocket().state::<Security>() {
            Some(it) => it,
            None => {
                tracing::error!("security keys aren't managed by rocket");
                let problem = Problem::new(Status::InternalServerError, "Unable to check session.");
                return Outcome::Error((Status::InternalServerError, problem));
            }
        };

        tracing::trace!("extracting session token from request cookies");
        match extract_claims(req.cookies(), &security.jwt_keys.public) {
            Ok(claims) => Outcome::Success(claims),
            Err(e) => {
                tracing::debug!("unable to extract session from cookies: {}", e);
                req.local_cache(|| SessionFailure(Some(e.clone())));
                Outcome::Error((Status::Unauthorized, e))
            }
        }
    }
}

/// Claims read from an identity provider's ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderClaims {
    pub email: String,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

/// Checks an RS256 ID token issued by `provider` and returns its claims.
pub fn verify_provider_token(
    token: &str,
    provider: &IdentityProvider,
    public_key: impl AsRef<[u8]>,
) -> Result<ProviderClaims, Problem> {
    let key = DecodingKey::from_rsa_pem(public_key.as_ref()).map_err(|e| {
        tracing::error!("identity provider public key isn't valid: {}", e);
        Problem::new(Status::InternalServerError, "Identity provider is misconfigured.")
    })?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[&provider.issuer]);
    validation.set_audience(&[&provider.audience]);

    let claims = decode::<ProviderClaims>(token, &key, &validation)
        .map_err(|e| {
            tracing::debug!("rejected identity provider token: {}", e);
            Problem::new(Status::Unauthorized, "Identity provider token was rejected.")
        })?
        .claims;

    if claims.email_verified == Some(false) {
        return Err(Problem::new(
            Status::Unauthorized,
            "Identity provider hasn't verified this email address.",
        ));
    }

    Ok(claims)
}

pub mod doc {
    use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};

    use super::AUTH_COOKIE_NAME;

    #[derive(Clone, Copy)]
    pub struct SessionAuth;

    impl From<SessionAuth> for SecurityScheme {
        fn from(_: SessionAuth) -> Self {
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(AUTH_COOKIE_NAME)))
        }
    }

    impl utoipa::Modify for SessionAuth {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            if let Some(c) = openapi.components.as_mut() {
                c.add_security_scheme("session", *self)
            }
        }
    }
}

#[cfg(test)]
pub trait HasAuthCookie {
    fn get_auth_cookie(&self, public_key: impl AsRef<[u8]>) -> Option<SessionToken>;
}

#[cfg(test)]
impl HasAuthCookie for rocket::local::asynchronous::LocalResponse<'_> {
    fn get_auth_cookie(&self, public_key: impl AsRef<[u8]>) -> Option<SessionToken> {
        extract_claims(self.cookies(), public_key).ok()
    }
}
