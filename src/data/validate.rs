//! Field constraints shared by request payloads.
//!
//! Checks push human readable issues; [`finish`] turns a non-empty list into
//! a single 400 answer.

use crate::resp::problem::{problems, Problem};

pub const USERNAME_MIN: usize = 5;
pub const USERNAME_MAX: usize = 20;
pub const PASSWORD_MIN: usize = 6;

pub fn username(value: &str, issues: &mut Vec<String>) {
    let len = value.chars().count();
    if len < USERNAME_MIN {
        issues.push(format!(
            "Username must be at least {} characters long",
            USERNAME_MIN
        ));
    }
    if len > USERNAME_MAX {
        issues.push(format!(
            "Username must be no more than {} characters long",
            USERNAME_MAX
        ));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        issues.push("Username must not contain special characters".to_string());
    }
}

/// Accepts `local@domain.tld`: one `@`, no whitespace, a dot inside the domain.
pub fn is_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let (local, domain) = match value.split_once('@') {
        Some(parts) => parts,
        None => return false,
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((name, tld)) => !name.is_empty() && !tld.is_empty() && !name.ends_with('.'),
        None => false,
    }
}

pub fn email(value: &str, issues: &mut Vec<String>) {
    if !is_email(value) {
        issues.push("Invalid email address".to_string());
    }
}

pub fn new_password(value: &str, issues: &mut Vec<String>) {
    if value.chars().count() < PASSWORD_MIN {
        issues.push(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN
        ));
    }
}

pub fn required(value: &str, what: &str, issues: &mut Vec<String>) {
    if value.is_empty() {
        issues.push(format!("{} is required", what));
    }
}

/// Character-count bounds for free text; `what` starts the issue message.
pub fn length(value: &str, what: &str, min: usize, max: usize, issues: &mut Vec<String>) {
    let len = value.chars().count();
    if len < min {
        issues.push(format!(
            "{} must be at least {} characters long",
            what, min
        ));
    }
    if len > max {
        issues.push(format!(
            "{} must be no more than {} characters long",
            what, max
        ));
    }
}

pub fn finish(issues: Vec<String>) -> Result<(), Problem> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(problems::invalid_input(&issues))
    }
}
