use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::password::MIN_PASSWORD_LEN;
use crate::forms::MultipartForm;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Sign-up form. Values are echoed back into the page when validation fails,
/// passwords excepted.
#[derive(Debug, Default, Serialize)]
pub struct RegisterForm {
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(skip)]
    pub confirm_password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub second_last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl RegisterForm {
    pub fn from_multipart(form: &MultipartForm) -> Self {
        Self {
            username: form.get("username"),
            password: form.raw("password"),
            confirm_password: form.raw("confirm_password"),
            first_name: form.get("first_name"),
            last_name: form.get("last_name"),
            second_last_name: form.get("second_last_name"),
            phone: form.get("phone"),
            email: form.get("email").map(|e| e.to_lowercase()),
        }
    }

    /// Checks that need no database, in the order they are reported.
    pub fn validate_shape(&self) -> Result<ValidRegistration<'_>, &'static str> {
        let (
            Some(username),
            Some(password),
            Some(confirm),
            Some(first_name),
            Some(last_name),
            Some(phone),
        ) = (
            self.username.as_deref(),
            self.password.as_deref(),
            self.confirm_password.as_deref(),
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            self.phone.as_deref(),
        )
        else {
            return Err("Please fill in all required fields.");
        };
        if password != confirm {
            return Err("Passwords do not match.");
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err("Password must be at least 6 characters long.");
        }
        Ok(ValidRegistration {
            username,
            password,
            first_name,
            last_name,
            phone,
        })
    }
}

/// Required registration fields after the shape checks passed.
#[derive(Debug)]
pub struct ValidRegistration<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub phone: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username_or_email: String,
    #[serde(default)]
    pub password: String,
    pub remember_me: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RequestResetForm {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}
