use base64::Engine;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Duration, Utc};
use crypto::bcrypt::bcrypt;
use rand::Rng;
use rocket::http::Status;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Id;
use crate::resp::problem::Problem;
use crate::util::base64_engine;

pub mod db;

pub static USER_COLLECTION_NAME: &str = "users";

pub const PASSWORD_COST: u32 = 10;
const HASH_SCHEME: &str = "sha256-bcrypt";

/// Salted bcrypt digest of a SHA-256 pre-hashed password.
///
/// Stored as `$sha256-bcrypt$<cost>$<salt>$<hash>` with URL safe base64 parts.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PasswordHash {
    cost: u32,
    salt: [u8; 16],
    hash: [u8; 24],
}

impl PasswordHash {
    pub fn new(password: impl AsRef<str>) -> PasswordHash {
        PasswordHash::with_salt(password, rand::random(), PASSWORD_COST)
    }

    fn with_salt(password: impl AsRef<str>, salt: [u8; 16], cost: u32) -> PasswordHash {
        PasswordHash {
            cost,
            salt,
            hash: digest(cost, &salt, password.as_ref()),
        }
    }

    pub fn verify(&self, password: impl AsRef<str>) -> bool {
        let candidate = digest(self.cost, &self.salt, password.as_ref());
        crypto::util::fixed_time_eq(&candidate, &self.hash)
    }
}

fn digest(cost: u32, salt: &[u8; 16], password: &str) -> [u8; 24] {
    let mut pw_hash: [u8; 24] = [0; 24];

    let mut sha = Sha256::new();
    sha2::Digest::update(&mut sha, password.as_bytes());

    bcrypt(cost, salt, sha.finalize().as_slice(), &mut pw_hash);

    pw_hash
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PasswordHash(cost: {})", self.cost)
    }
}

impl From<PasswordHash> for String {
    fn from(pw_hash: PasswordHash) -> Self {
        let engine = base64_engine();
        format!(
            "${}${}${}${}",
            HASH_SCHEME,
            pw_hash.cost,
            engine.encode(pw_hash.salt),
            engine.encode(pw_hash.hash)
        )
    }
}

impl TryFrom<String> for PasswordHash {
    type Error = String;

    fn try_from(encoded: String) -> Result<Self, Self::Error> {
        let lost = || "stored password hash is unreadable".to_string();
        let engine = base64_engine();

        let mut parts = encoded.split('$');
        match (parts.next(), parts.next()) {
            (Some(""), Some(HASH_SCHEME)) => {}
            _ => return Err(lost()),
        }

        let cost: u32 = parts.next().and_then(|c| c.parse().ok()).ok_or_else(lost)?;
        let salt: [u8; 16] = parts
            .next()
            .and_then(|s| engine.decode(s).ok())
            .and_then(|s| s.try_into().ok())
            .ok_or_else(lost)?;
        let hash: [u8; 24] = parts
            .next()
            .and_then(|h| engine.decode(h).ok())
            .and_then(|h| h.try_into().ok())
            .ok_or_else(lost)?;

        if parts.next().is_some() || !(4..=31).contains(&cost) {
            return Err(lost());
        }

        Ok(PasswordHash { cost, salt, hash })
    }
}

/// Fresh six digit email verification code.
pub fn generate_verify_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

pub fn verify_code_lifetime() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    pub username: String,
    pub email: String,
    /// Absent for accounts created through the identity provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_code_expiry: Option<bson::DateTime>,
    /// New address waiting for the code in `verify_code`; `email` stays in
    /// effect until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_email: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default)]
    pub classes: Vec<Id>,
}

impl User {
    /// Creates an unverified password account. It has no code until
    /// [`User::issue_verify_code`] is called.
    pub fn new(username: impl ToString, email: impl ToString, password: impl AsRef<str>) -> User {
        let user = User {
            id: Id::new(),
            username: username.to_string(),
            email: email.to_string(),
            password: Some(PasswordHash::new(password)),
            verify_code: None,
            verify_code_expiry: None,
            pending_email: None,
            is_verified: false,
            department: None,
            classes: vec![],
        };

        tracing::info!("Creating a new user with id: {}", user.id);
        user
    }

    /// Creates a verified, passwordless account vouched for by the identity provider.
    pub fn from_provider(username: impl ToString, email: impl ToString) -> User {
        let user = User {
            id: Id::new(),
            username: username.to_string(),
            email: email.to_string(),
            password: None,
            verify_code: None,
            verify_code_expiry: None,
            pending_email: None,
            is_verified: true,
            department: None,
            classes: vec![],
        };

        tracing::info!("Creating a new identity provider user with id: {}", user.id);
        user
    }

    pub fn issue_verify_code(&mut self, now: DateTime<Utc>) -> String {
        let code = generate_verify_code();
        self.verify_code = Some(code.clone());
        self.verify_code_expiry = Some(bson::DateTime::from_chrono(now + verify_code_lifetime()));
        code
    }

    pub fn verify_code_expired(&self, now: DateTime<Utc>) -> bool {
        match self.verify_code_expiry {
            Some(expiry) => expiry.to_chrono() <= now,
            None => true,
        }
    }

    /// Checks a code against the pending email change, or against account
    /// verification when no change is pending.
    pub fn check_verify_code(&self, code: &str, now: DateTime<Utc>) -> Result<(), Problem> {
        if self.is_verified && self.pending_email.is_none() {
            return Err(Problem::bad_request("Account is already verified"));
        }
        if self.verify_code.as_deref() != Some(code.trim()) {
            return Err(Problem::bad_request("Incorrect verification code"));
        }
        if self.verify_code_expired(now) {
            return Err(Problem::bad_request(if self.pending_email.is_some() {
                "Verification code has expired. Please update your profile again to get a new code"
            } else {
                "Verification code has expired. Please sign up again to get a new code"
            }));
        }
        Ok(())
    }

    /// Consumes a checked code. A pending address replaces `email`.
    pub fn mark_verified(&mut self) {
        if let Some(email) = self.pending_email.take() {
            self.email = email;
        }
        self.is_verified = true;
        self.verify_code = None;
        self.verify_code_expiry = None;
    }

    /// Verifies the account on the identity provider's word. A password set
    /// before anyone proved the address is dropped, leaving a provider
    /// account.
    pub fn verify_through_provider(&mut self) {
        if self.is_verified {
            return;
        }
        self.password = None;
        self.pending_email = None;
        self.mark_verified();
    }

    /// Holds `email` as pending and returns the code that confirms it.
    /// Returns `None` when `email` is already the account's address, which
    /// also drops a change that was still pending.
    pub fn request_email_change(&mut self, email: &str, now: DateTime<Utc>) -> Option<String> {
        if email == self.email {
            if self.pending_email.take().is_some() {
                self.verify_code = None;
                self.verify_code_expiry = None;
            }
            return None;
        }
        self.pending_email = Some(email.to_string());
        Some(self.issue_verify_code(now))
    }

    /// Where a freshly issued code is delivered.
    pub fn code_recipient(&self) -> &str {
        self.pending_email.as_deref().unwrap_or(&self.email)
    }

    /// `$set`/`$unset` update for everything but the id and the `classes`
    /// list, which only changes through `$push`.
    pub fn update_document(&self) -> Document {
        let mut set = doc! {
            "username": self.username.as_str(),
            "email": self.email.as_str(),
            "is_verified": self.is_verified,
        };
        let mut unset = Document::new();

        let optional = [
            ("password", self.password.clone().map(|pw| Bson::String(pw.into()))),
            ("verify_code", self.verify_code.clone().map(Bson::String)),
            ("verify_code_expiry", self.verify_code_expiry.map(Bson::DateTime)),
            ("pending_email", self.pending_email.clone().map(Bson::String)),
            ("department", self.department.clone().map(Bson::String)),
        ];
        for (key, value) in optional {
            match value {
                Some(value) => set.insert(key, value),
                None => unset.insert(key, ""),
            };
        }

        let mut update = doc! { "$set": set };
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }
        update
    }

    pub fn check_sign_in(&self, password: &str) -> Result<(), Problem> {
        if !self.is_verified {
            return Err(Problem::forbidden(
                "Please verify your account before signing in",
            ));
        }
        let pw_hash = self.password.as_ref().ok_or_else(provider_account_problem)?;
        if !pw_hash.verify(password) {
            return Err(Problem::new(Status::Unauthorized, "Incorrect password"));
        }
        Ok(())
    }
}

pub fn provider_account_problem() -> Problem {
    Problem::bad_request("This account signs in through the identity provider.")
}

/// User as shown to its owner; never includes password or verification data.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_verified: bool,
    /// Address waiting for confirmation, if an email change is in progress.
    pub pending_email: Option<String>,
    pub department: Option<String>,
    pub classes: Vec<Uuid>,
}

impl From<User> for UserResponse {
    fn from(value: User) -> Self {
        UserResponse {
            id: value.id.to_uuid_1(),
            username: value.username,
            email: value.email,
            is_verified: value.is_verified,
            pending_email: value.pending_email,
            department: value.department,
            classes: value.classes.into_iter().map(|it| it.to_uuid_1()).collect(),
        }
    }
}
