//! Field-level validation run before any cache or network activity.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@.]+(\.[^\s@.]+)+$").expect("email pattern compiles"));

/// One rejected field and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Request field name.
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of [`validate`]; `Invalid` always carries at least one error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Every rule passed.
    Valid,
    /// Failed rules in the order they were checked.
    Invalid(Vec<FieldError>),
}

impl ValidationResult {
    /// True when no rule failed.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Failed rules; empty when valid.
    pub fn errors(&self) -> &[FieldError] {
        match self {
            Self::Valid => &[],
            Self::Invalid(errors) => errors,
        }
    }

    /// Converts to a `Result`, handing back the ordered errors on failure.
    pub fn into_result(self) -> Result<(), Vec<FieldError>> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid(errors) => Err(errors),
        }
    }
}

/// Request types that can be checked client-side.
pub trait Validate {
    /// Pure check of the request's invariants.
    fn validate(&self) -> ValidationResult;
}

/// Runs `request`'s rules.
pub fn validate<R: Validate + ?Sized>(request: &R) -> ValidationResult {
    request.validate()
}

/// Collects rule failures in call order.
///
/// ```
/// use optiq::validate::Validator;
///
/// let result = Validator::new()
///     .required("name", "")
///     .email("email", "bob@example.com")
///     .finish();
/// assert_eq!(result.errors().len(), 1);
/// assert_eq!(result.errors()[0].field, "name");
/// ```
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    /// Starts with no errors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reason` for `field` unless `ok`.
    pub fn check(mut self, field: &str, ok: bool, reason: &str) -> Self {
        if !ok {
            self.errors.push(FieldError::new(field, reason));
        }
        self
    }

    /// Rejects blank values.
    pub fn required(self, field: &str, value: &str) -> Self {
        self.check(field, !value.trim().is_empty(), "is required")
    }

    /// Rejects blank values and anything not shaped like `local@domain.tld`.
    pub fn email(self, field: &str, value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return self.check(field, false, "is required");
        }
        self.check(field, EMAIL_RE.is_match(value), "must be a valid email address")
    }

    /// Rejects passwords shorter than [`MIN_PASSWORD_LEN`].
    pub fn password(self, field: &str, value: &str) -> Self {
        self.check(
            field,
            value.chars().count() >= MIN_PASSWORD_LEN,
            "must be at least 6 characters",
        )
    }

    /// Rejects `confirm` when it differs from `value`.
    pub fn matches(self, field: &str, value: &str, confirm: &str) -> Self {
        self.check(field, value == confirm, "does not match")
    }

    /// Rejects ranges whose start lies after their end.
    pub fn range(self, field: &str, start: u32, end: u32) -> Self {
        self.check(field, start <= end, "must not exceed end_index")
    }

    /// Collects the checks into a result.
    pub fn finish(self) -> ValidationResult {
        if self.errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(self.errors)
        }
    }
}
