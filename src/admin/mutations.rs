use serde::de::IgnoredAny;

use crate::{
    mutation::Mutation,
    remote::{Method, RemoteRequest},
    types::QueryKey,
    validate::{Validate, ValidationResult, Validator},
};

use super::{
    keys,
    model::{Ack, FormatterId, PasswordFormatter, User, UserId, UserProfile},
    requests::{ChangePasswordRequest, CreateUserRequest, FormatterRequest, UpdateUserRequest},
};

/// Placeholder id of rows created optimistically, replaced on commit.
pub const PENDING_ID: u64 = 0;

fn post(endpoint: String, body: &impl serde::Serialize) -> Result<RemoteRequest, serde_json::Error> {
    Ok(RemoteRequest::new(Method::Post, endpoint).with_payload(serde_json::to_value(body)?))
}

fn put(endpoint: String, body: &impl serde::Serialize) -> Result<RemoteRequest, serde_json::Error> {
    Ok(RemoteRequest::new(Method::Put, endpoint).with_payload(serde_json::to_value(body)?))
}

/// Password change; the cached profile is left as is.
#[derive(Debug, Clone)]
pub struct ChangePassword {
    /// Account whose password changes.
    pub user_id: UserId,
    /// Current, new and confirmation passwords.
    pub request: ChangePasswordRequest,
}

impl Mutation for ChangePassword {
    type Value = UserProfile;
    type Response = Ack;

    fn key(&self) -> QueryKey {
        keys::profile(self.user_id)
    }

    fn request(&self) -> Result<RemoteRequest, serde_json::Error> {
        post(format!("profile/{}/change-password", self.user_id), &self.request)
    }

    fn validate(&self) -> ValidationResult {
        self.request.validate()
    }

    fn optimistic(&self, previous: Option<UserProfile>) -> Option<UserProfile> {
        previous
    }

    fn confirm(&self, previous: Option<UserProfile>, _response: Ack) -> Option<UserProfile> {
        previous
    }
}

/// Adds a user; the row shows with a placeholder id until confirmed.
#[derive(Debug, Clone)]
pub struct CreateUser(pub CreateUserRequest);

impl Mutation for CreateUser {
    type Value = Vec<User>;
    type Response = User;

    fn key(&self) -> QueryKey {
        keys::users()
    }

    fn request(&self) -> Result<RemoteRequest, serde_json::Error> {
        post("users".to_string(), &self.0)
    }

    fn validate(&self) -> ValidationResult {
        self.0.validate()
    }

    fn optimistic(&self, previous: Option<Vec<User>>) -> Option<Vec<User>> {
        let mut users = previous.unwrap_or_default();
        users.push(User {
            id: PENDING_ID,
            name: self.0.name.clone(),
            email: self.0.email.clone(),
            role: self.0.role,
            is_active: true,
        });
        Some(users)
    }

    fn confirm(&self, previous: Option<Vec<User>>, created: User) -> Option<Vec<User>> {
        let mut users = previous.unwrap_or_default();
        users.push(created);
        Some(users)
    }
}

/// Edits one user row in place.
#[derive(Debug, Clone)]
pub struct UpdateUser(pub UpdateUserRequest);

impl UpdateUser {
    fn apply(&self, previous: Option<Vec<User>>, replacement: User) -> Option<Vec<User>> {
        let mut users = previous?;
        if let Some(slot) = users.iter_mut().find(|u| u.id == replacement.id) {
            *slot = replacement;
        }
        Some(users)
    }
}

impl Mutation for UpdateUser {
    type Value = Vec<User>;
    type Response = User;

    fn key(&self) -> QueryKey {
        keys::users()
    }

    fn request(&self) -> Result<RemoteRequest, serde_json::Error> {
        put(format!("users/{}", self.0.id), &self.0)
    }

    fn validate(&self) -> ValidationResult {
        self.0.validate()
    }

    fn optimistic(&self, previous: Option<Vec<User>>) -> Option<Vec<User>> {
        let req = &self.0;
        self.apply(
            previous,
            User {
                id: req.id,
                name: req.name.clone(),
                email: req.email.clone(),
                role: req.role,
                is_active: req.is_active,
            },
        )
    }

    fn confirm(&self, previous: Option<Vec<User>>, updated: User) -> Option<Vec<User>> {
        self.apply(previous, updated)
    }
}

/// Removes a user row by id.
#[derive(Debug, Clone, Copy)]
pub struct DeleteUser(pub UserId);

impl Mutation for DeleteUser {
    type Value = Vec<User>;
    type Response = IgnoredAny;

    fn key(&self) -> QueryKey {
        keys::users()
    }

    fn request(&self) -> Result<RemoteRequest, serde_json::Error> {
        Ok(RemoteRequest::delete(format!("users/{}", self.0)))
    }

    fn optimistic(&self, previous: Option<Vec<User>>) -> Option<Vec<User>> {
        previous.map(|users| users.into_iter().filter(|u| u.id != self.0).collect())
    }

    fn confirm(&self, previous: Option<Vec<User>>, _response: IgnoredAny) -> Option<Vec<User>> {
        self.optimistic(previous)
    }
}

/// Adds a formatter rule to the cached list.
#[derive(Debug, Clone)]
pub struct CreateFormatter(pub FormatterRequest);

impl Mutation for CreateFormatter {
    type Value = Vec<PasswordFormatter>;
    type Response = PasswordFormatter;

    fn key(&self) -> QueryKey {
        keys::formatters()
    }

    fn request(&self) -> Result<RemoteRequest, serde_json::Error> {
        post("password-formatters".to_string(), &self.0)
    }

    fn validate(&self) -> ValidationResult {
        self.0.validate()
    }

    fn optimistic(&self, previous: Option<Vec<PasswordFormatter>>) -> Option<Vec<PasswordFormatter>> {
        let mut rules = previous.unwrap_or_default();
        rules.push(PasswordFormatter {
            id: PENDING_ID,
            start_index: self.0.start_index,
            end_index: self.0.end_index,
            prefix: self.0.prefix.clone(),
            is_in_use: false,
        });
        Some(rules)
    }

    fn confirm(
        &self,
        previous: Option<Vec<PasswordFormatter>>,
        created: PasswordFormatter,
    ) -> Option<Vec<PasswordFormatter>> {
        let mut rules = previous.unwrap_or_default();
        rules.push(created);
        Some(rules)
    }
}

/// Edits one formatter rule in place.
#[derive(Debug, Clone)]
pub struct UpdateFormatter {
    /// Rule being edited.
    pub id: FormatterId,
    /// New range and prefix.
    pub request: FormatterRequest,
}

impl Mutation for UpdateFormatter {
    type Value = Vec<PasswordFormatter>;
    type Response = PasswordFormatter;

    fn key(&self) -> QueryKey {
        keys::formatters()
    }

    fn request(&self) -> Result<RemoteRequest, serde_json::Error> {
        put(format!("password-formatters/{}", self.id), &self.request)
    }

    fn validate(&self) -> ValidationResult {
        self.request.validate()
    }

    fn optimistic(&self, previous: Option<Vec<PasswordFormatter>>) -> Option<Vec<PasswordFormatter>> {
        let mut rules = previous?;
        if let Some(rule) = rules.iter_mut().find(|r| r.id == self.id) {
            rule.start_index = self.request.start_index;
            rule.end_index = self.request.end_index;
            rule.prefix = self.request.prefix.clone();
        }
        Some(rules)
    }

    fn confirm(
        &self,
        previous: Option<Vec<PasswordFormatter>>,
        updated: PasswordFormatter,
    ) -> Option<Vec<PasswordFormatter>> {
        let mut rules = previous?;
        if let Some(rule) = rules.iter_mut().find(|r| r.id == updated.id) {
            *rule = updated;
        }
        Some(rules)
    }
}

/// Deletion of a formatter rule; `in_use` is the server-computed flag last seen.
#[derive(Debug, Clone, Copy)]
pub struct DeleteFormatter {
    /// Rule to delete.
    pub id: FormatterId,
    /// Last `is_in_use` flag seen in the cache.
    pub in_use: bool,
}

impl Mutation for DeleteFormatter {
    type Value = Vec<PasswordFormatter>;
    type Response = IgnoredAny;

    fn key(&self) -> QueryKey {
        keys::formatters()
    }

    fn request(&self) -> Result<RemoteRequest, serde_json::Error> {
        Ok(RemoteRequest::delete(format!("password-formatters/{}", self.id)))
    }

    fn validate(&self) -> ValidationResult {
        Validator::new()
            .check("id", !self.in_use, "formatter is in use")
            .finish()
    }

    fn optimistic(&self, previous: Option<Vec<PasswordFormatter>>) -> Option<Vec<PasswordFormatter>> {
        previous.map(|rules| rules.into_iter().filter(|r| r.id != self.id).collect())
    }

    fn confirm(
        &self,
        previous: Option<Vec<PasswordFormatter>>,
        _response: IgnoredAny,
    ) -> Option<Vec<PasswordFormatter>> {
        self.optimistic(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::model::Role;

    fn user(id: UserId, name: &str) -> User {
        User {
            id,
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            role: Role::Member,
            is_active: true,
        }
    }

    #[test]
    fn create_user_shows_placeholder_then_server_row() {
        let m = CreateUser(CreateUserRequest {
            name: "Dana".to_string(),
            email: "dana@example.com".to_string(),
            role: Role::Client,
            password: "secret1".to_string(),
        });
        let before = vec![user(1, "Alice")];
        let optimistic = m.optimistic(Some(before.clone())).unwrap();
        assert_eq!(optimistic.last().unwrap().id, PENDING_ID);

        let confirmed = m.confirm(Some(before), user(4, "Dana")).unwrap();
        assert_eq!(confirmed.iter().map(|u| u.id).collect::<Vec<_>>(), [1, 4]);
    }

    #[test]
    fn delete_formatter_in_use_fails_validation() {
        let m = DeleteFormatter { id: 1, in_use: true };
        assert_eq!(m.validate().errors()[0].reason, "formatter is in use");
        assert!(DeleteFormatter { id: 1, in_use: false }.validate().is_valid());
    }

    #[test]
    fn delete_user_without_cached_list_stays_absent() {
        assert_eq!(DeleteUser(3).optimistic(None), None);
    }
}
