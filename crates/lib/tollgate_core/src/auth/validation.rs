//! Field validation for sign-up input.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

static E164_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9][0-9]{1,14}$").expect("valid E.164 regex"));

/// One failed field rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Rule that failed (`email`, `min`, `max`, `e164`).
    pub tag: &'static str,
    /// Field path, e.g. `email` or `metadata.first_name`.
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(tag: &'static str, field: &str, message: impl Into<String>) -> Self {
        Self {
            tag,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Collects field errors for one input.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if !EMAIL_RE.is_match(value) {
            self.errors
                .push(FieldError::new("email", field, "must be a valid email address"));
        }
        self
    }

    pub fn e164(&mut self, field: &str, value: &str) -> &mut Self {
        if !E164_RE.is_match(value) {
            self.errors.push(FieldError::new(
                "e164",
                field,
                "must be a phone number in E.164 format",
            ));
        }
        self
    }

    /// Length in characters must lie within `min..=max`.
    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) -> &mut Self {
        let len = value.chars().count();
        if len < min {
            self.errors.push(FieldError::new(
                "min",
                field,
                format!("must be at least {min} characters"),
            ));
        } else if len > max {
            self.errors.push(FieldError::new(
                "max",
                field,
                format!("must be at most {max} characters"),
            ));
        }
        self
    }

    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
