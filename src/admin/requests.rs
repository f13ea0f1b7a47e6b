//! Form payloads sent to the admin API and their client-side rules.

use serde::{Deserialize, Serialize};

use crate::validate::{Validate, ValidationResult, Validator};

use super::model::{Role, UserId};

/// Credentials for sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Account email.
    pub email: String,
    /// Plain-text password.
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> ValidationResult {
        Validator::new()
            .email("email", &self.email)
            .required("password", &self.password)
            .finish()
    }
}

/// Starts a password reset by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    /// Account email.
    pub email: String,
}

impl Validate for ForgotPasswordRequest {
    fn validate(&self) -> ValidationResult {
        Validator::new().email("email", &self.email).finish()
    }
}

/// Completes a reset with the emailed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    /// Token from the reset email.
    pub token: String,
    /// Replacement password.
    pub new_password: String,
    /// Must equal `new_password`.
    pub confirm_password: String,
}

impl Validate for ResetPasswordRequest {
    fn validate(&self) -> ValidationResult {
        Validator::new()
            .required("token", &self.token)
            .password("new_password", &self.new_password)
            .matches("confirm_password", &self.new_password, &self.confirm_password)
            .finish()
    }
}

/// Edits the signed-in user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    /// Display name.
    pub name: String,
    /// Sign-in email.
    pub email: String,
}

impl Validate for UpdateProfileRequest {
    fn validate(&self) -> ValidationResult {
        Validator::new()
            .required("name", &self.name)
            .email("email", &self.email)
            .finish()
    }
}

/// Changes the signed-in user's password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    /// Password in use today.
    pub current_password: String,
    /// Replacement password.
    pub new_password: String,
    /// Must equal `new_password`.
    pub confirm_password: String,
}

impl Validate for ChangePasswordRequest {
    fn validate(&self) -> ValidationResult {
        Validator::new()
            .required("current_password", &self.current_password)
            .password("new_password", &self.new_password)
            .matches("confirm_password", &self.new_password, &self.confirm_password)
            .finish()
    }
}

/// Creates a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    /// Display name.
    pub name: String,
    /// Sign-in email.
    pub email: String,
    /// Role of the new account.
    pub role: Role,
    /// Initial password.
    pub password: String,
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> ValidationResult {
        Validator::new()
            .required("name", &self.name)
            .email("email", &self.email)
            .password("password", &self.password)
            .finish()
    }
}

/// Edits an existing user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    /// Target user; carried in the endpoint, not the body.
    #[serde(skip)]
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Sign-in email.
    pub email: String,
    /// Assigned role.
    pub role: Role,
    /// False disables sign-in.
    pub is_active: bool,
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> ValidationResult {
        Validator::new()
            .required("name", &self.name)
            .email("email", &self.email)
            .finish()
    }
}

/// Body of formatter create and update calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatterRequest {
    /// First replaced position.
    pub start_index: u32,
    /// Last replaced position, inclusive.
    pub end_index: u32,
    /// Replacement text.
    pub prefix: String,
}

impl Validate for FormatterRequest {
    fn validate(&self) -> ValidationResult {
        Validator::new()
            .range("start_index", self.start_index, self.end_index)
            .required("prefix", &self.prefix)
            .finish()
    }
}
