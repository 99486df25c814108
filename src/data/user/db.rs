use bson::doc;
use chrono::{DateTime, Utc};
use mongodb::Database;
use rand::Rng;
use utoipa::ToSchema;

use super::{User, USER_COLLECTION_NAME};
use crate::data::validate;
use crate::data::Id;
use crate::db::filter;
use crate::resp::problem::Problem;

pub mod problem {
    use crate::resp::problem::Problem;
    use rocket::http::Status;

    #[inline]
    pub fn not_found() -> Problem {
        Problem::new(Status::NotFound, "User not found")
    }

    #[inline]
    pub fn username_taken() -> Problem {
        Problem::bad_request("Username is already taken")
    }

    #[inline]
    pub fn email_taken() -> Problem {
        Problem::bad_request("User already exists with this email")
    }

    #[inline]
    pub fn no_provider_username() -> Problem {
        Problem::bad_request(
            "Unable to pick a free username for this account. Please try again.",
        )
    }

    #[inline]
    pub fn domain_not_allowed() -> Problem {
        Problem::forbidden(
            "Registration failed. Only professors with a valid university email are allowed to register.",
        )
    }
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct SignUpData {
    pub username: String,
    #[schema(format = "email")]
    pub email: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for SignUpData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignUpData:{}", self.username)
    }
}

impl SignUpData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut issues = vec![];
        validate::username(&self.username, &mut issues);
        validate::email(&self.email, &mut issues);
        validate::new_password(&self.password, &mut issues);
        validate::finish(issues)
    }
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct SignInData {
    /// Email address or username.
    #[serde(alias = "email")]
    pub identifier: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for SignInData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignInData:{}", self.identifier)
    }
}

impl SignInData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut issues = vec![];
        validate::required(self.identifier.trim(), "Email or username", &mut issues);
        validate::required(&self.password, "Password", &mut issues);
        validate::finish(issues)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyCodeData {
    pub username: String,
    pub code: String,
}

impl VerifyCodeData {
    pub fn validate(&self) -> Result<(), Problem> {
        let code = self.code.trim();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(Problem::bad_request("Verification code must be 6 digits"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSignInData {
    pub id_token: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateProfileData {
    /// New username.
    pub name: String,
    #[schema(format = "email")]
    pub email: String,
    #[serde(default)]
    pub department: Option<String>,
}

impl UpdateProfileData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut issues = vec![];
        validate::username(&self.name, &mut issues);
        validate::email(&self.email, &mut issues);
        if let Some(department) = &self.department {
            validate::length(department.trim(), "Department", 0, 100, &mut issues);
        }
        validate::finish(issues)
    }
}

#[derive(Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordData {
    #[schema(format = "password")]
    pub current_password: String,
    #[schema(format = "password")]
    pub new_password: String,
    #[schema(format = "password")]
    pub confirm_password: String,
}

impl std::fmt::Debug for ChangePasswordData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChangePasswordData")
    }
}

impl ChangePasswordData {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut issues = vec![];
        validate::required(&self.current_password, "Current password", &mut issues);
        validate::new_password(&self.new_password, &mut issues);
        if self.new_password != self.confirm_password {
            issues.push("Passwords don't match".to_string());
        }
        validate::finish(issues)
    }
}

/// What a sign-up request does to stored accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpPlan {
    /// Insert a new unverified account.
    Create { stale: Option<Id> },
    /// Refresh credentials and code of an unverified account with this email.
    Refresh { user: Id, stale: Option<Id> },
}

impl SignUpPlan {
    /// Unverified account with an expired code that must be removed to free
    /// the requested username.
    pub fn stale(&self) -> Option<Id> {
        match self {
            SignUpPlan::Create { stale } | SignUpPlan::Refresh { stale, .. } => *stale,
        }
    }
}

/// Whether `holder` (the current owner of a username, if any) blocks a new
/// registration under a different email.
pub fn username_blocked(holder: Option<&User>, now: DateTime<Utc>) -> bool {
    match holder {
        Some(user) => user.is_verified || !user.verify_code_expired(now),
        None => false,
    }
}

pub fn plan_sign_up(
    by_username: Option<&User>,
    by_email: Option<&User>,
    email: &str,
    now: DateTime<Utc>,
) -> Result<SignUpPlan, Problem> {
    if by_username.map(|u| u.is_verified).unwrap_or(false) {
        return Err(problem::username_taken());
    }
    if by_email.map(|u| u.is_verified).unwrap_or(false) {
        return Err(problem::email_taken());
    }

    let stale = match by_username {
        Some(holder) if holder.email != email => {
            if username_blocked(Some(holder), now) {
                return Err(problem::username_taken());
            }
            Some(holder.id)
        }
        _ => None,
    };

    Ok(match by_email {
        Some(existing) => SignUpPlan::Refresh {
            user: existing.id,
            stale,
        },
        None => SignUpPlan::Create { stale },
    })
}

/// Username derived from an identity provider email: the local part reduced
/// to `[A-Za-z0-9_]`, cut and padded to the username bounds.
pub fn provider_username_base(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut base: String = local
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(validate::USERNAME_MAX)
        .collect();
    while base.chars().count() < validate::USERNAME_MIN {
        base.push('_');
    }
    base
}

/// `base` with a random four digit suffix, kept within the username bounds.
pub fn provider_username_candidate(base: &str) -> String {
    let keep = validate::USERNAME_MAX - 5;
    let prefix: String = base.chars().take(keep).collect();
    format!("{}_{:04}", prefix, rand::thread_rng().gen_range(0..10_000))
}

/// Usernames to try, in order, for a new identity provider account.
pub fn provider_usernames(email: &str, attempts: usize) -> impl Iterator<Item = String> {
    let base = provider_username_base(email);
    let first = base.clone();
    std::iter::once(first)
        .chain(std::iter::repeat_with(move || provider_username_candidate(&base)))
        .take(attempts)
}

pub trait UserDbExt {
    async fn find_user(&self, id: Id) -> Result<Option<User>, mongodb::error::Error>;
    async fn find_user_by_email(
        &self,
        email: impl AsRef<str>,
    ) -> Result<Option<User>, mongodb::error::Error>;
    async fn find_user_by_username(
        &self,
        username: impl AsRef<str>,
    ) -> Result<Option<User>, mongodb::error::Error>;
    /// Matches either the email address or the username.
    async fn find_user_by_identifier(
        &self,
        identifier: impl AsRef<str>,
    ) -> Result<Option<User>, mongodb::error::Error>;
    /// Another account holding `username` or `email`.
    async fn find_user_conflict(
        &self,
        id: Id,
        username: impl AsRef<str>,
        email: impl AsRef<str>,
    ) -> Result<Option<User>, mongodb::error::Error>;

    async fn insert_user(&self, user: &User) -> Result<(), mongodb::error::Error>;
    /// Writes the account fields of `user`; `classes` is left untouched.
    async fn update_user(&self, user: &User) -> Result<(), mongodb::error::Error>;
    async fn delete_user(&self, id: Id) -> Result<Option<User>, mongodb::error::Error>;
}

impl UserDbExt for Database {
    async fn find_user(&self, id: Id) -> Result<Option<User>, mongodb::error::Error> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
    }

    async fn find_user_by_email(
        &self,
        email: impl AsRef<str>,
    ) -> Result<Option<User>, mongodb::error::Error> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one(doc! { "email": email.as_ref() }, None)
            .await
    }

    async fn find_user_by_username(
        &self,
        username: impl AsRef<str>,
    ) -> Result<Option<User>, mongodb::error::Error> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one(doc! { "username": username.as_ref() }, None)
            .await
    }

    async fn find_user_by_identifier(
        &self,
        identifier: impl AsRef<str>,
    ) -> Result<Option<User>, mongodb::error::Error> {
        let identifier = identifier.as_ref().trim();
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one(
                doc! { "$or": [{ "email": identifier }, { "username": identifier }] },
                None,
            )
            .await
    }

    async fn find_user_conflict(
        &self,
        id: Id,
        username: impl AsRef<str>,
        email: impl AsRef<str>,
    ) -> Result<Option<User>, mongodb::error::Error> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one(
                doc! {
                    "_id": { "$ne": id },
                    "$or": [{ "email": email.as_ref() }, { "username": username.as_ref() }],
                },
                None,
            )
            .await
    }

    async fn insert_user(&self, user: &User) -> Result<(), mongodb::error::Error> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .insert_one(user, None)
            .await?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), mongodb::error::Error> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .update_one(filter::by_id(user.id), user.update_document(), None)
            .await?;
        Ok(())
    }

    async fn delete_user(&self, id: Id) -> Result<Option<User>, mongodb::error::Error> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one_and_delete(filter::by_id(id), None)
            .await
    }
}
