use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    config::ConsoleConfig,
    core::store::CacheStore,
    mutation::{ControllerFault, MutationController, MutationError, MutationOutcome, MutationRequest},
    persist::OpSink,
    query::{QueryClient, QueryError},
    remote::{Method, RemoteClient, RemoteError, RemoteRequest, http::HttpClient},
    runtime::handle::{CacheHandle, RuntimeError, spawn_cache},
    types::QueryKey,
    validate::{Validate, ValidationResult},
};

use super::{
    keys,
    model::{Ack, DashboardSummary, FormatterId, PasswordFormatter, Role, Session, User, UserId, UserProfile},
    mutations::{
        ChangePassword, CreateFormatter, CreateUser, DeleteFormatter, DeleteUser, UpdateFormatter, UpdateUser,
    },
    requests::{
        ChangePasswordRequest, CreateUserRequest, ForgotPasswordRequest, FormatterRequest, LoginRequest,
        ResetPasswordRequest, UpdateProfileRequest, UpdateUserRequest,
    },
};

/// Unrecoverable failure of a console operation.
///
/// Expected failures (validation, network, server rejections) are returned
/// as [`MutationOutcome::Failed`] instead.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// The controller hit a contract violation.
    #[error(transparent)]
    Fault(#[from] ControllerFault),
    /// A cached read or fetch failed.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// The cache runtime failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Result of a console mutation.
pub type ConsoleResult<T> = Result<MutationOutcome<T>, ConsoleError>;

/// Session-scoped facade over the controller and the query cache.
///
/// An `Unauthorized` answer from any call ends the session: the session key
/// is dropped and the client credential cleared.
pub struct AdminConsole<C> {
    controller: MutationController<C>,
    queries: QueryClient<C>,
    notice_ttl: Duration,
}

impl<C> Clone for AdminConsole<C> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            queries: self.queries.clone(),
            notice_ttl: self.notice_ttl,
        }
    }
}

impl AdminConsole<HttpClient> {
    /// Console over the configured HTTP API, caching in `store`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: &ConsoleConfig, store: CacheStore, sink: Option<Box<dyn OpSink>>) -> Self {
        let client = Arc::new(HttpClient::new(config.api_base_url.clone(), config.request_timeout()));
        let cache = spawn_cache(store, sink, config.runtime.clone());
        tracing::info!(api = %config.api_base_url, "admin console connected");
        Self::new(client, cache, config.notice_ttl())
    }
}

impl<C: RemoteClient> AdminConsole<C> {
    /// Console over `client`, caching through `cache`.
    pub fn new(client: Arc<C>, cache: CacheHandle, notice_ttl: Duration) -> Self {
        Self {
            queries: QueryClient::new(Arc::clone(&client), cache.clone()),
            controller: MutationController::new(client, cache),
            notice_ttl,
        }
    }

    /// Underlying mutation controller.
    pub fn controller(&self) -> &MutationController<C> {
        &self.controller
    }

    /// Underlying query client.
    pub fn queries(&self) -> &QueryClient<C> {
        &self.queries
    }

    /// How long form notices stay visible.
    pub fn notice_ttl(&self) -> Duration {
        self.notice_ttl
    }

    /// Current session, if signed in.
    pub async fn session(&self) -> Result<Option<Session>, ConsoleError> {
        Ok(self.queries.peek(&keys::session()).await?)
    }

    /// Signs in and stores the session under [`keys::session`].
    pub async fn login(&self, email: &str, password: &str) -> ConsoleResult<Session> {
        let request = MutationRequest::new(
            Method::Post,
            "auth/login",
            LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            },
        );
        let outcome = self
            .controller
            .execute(keys::session(), request, |previous: Option<Session>, _| previous)
            .await?;
        match &outcome {
            MutationOutcome::Succeeded(session) => {
                self.controller.client().authorize(Some(&session.token));
                tracing::info!(user = session.user.id, role = %session.user.role, "signed in");
            }
            MutationOutcome::Failed(err) => {
                tracing::debug!(error = %err, "sign-in failed");
            }
        }
        Ok(outcome)
    }

    /// Signs out and drops the session.
    pub async fn logout(&self) -> Result<(), ConsoleError> {
        self.end_session().await?;
        tracing::info!("signed out");
        Ok(())
    }

    /// Requests a password reset email.
    pub async fn forgot_password(&self, email: &str) -> ConsoleResult<Ack> {
        let request = MutationRequest::new(
            Method::Post,
            "auth/forgot-password",
            ForgotPasswordRequest {
                email: email.to_string(),
            },
        );
        self.submit(request).await
    }

    /// Sets a new password with a reset token.
    pub async fn reset_password(&self, token: &str, new_password: &str, confirm_password: &str) -> ConsoleResult<Ack> {
        let request = MutationRequest::new(
            Method::Post,
            "auth/reset-password",
            ResetPasswordRequest {
                token: token.to_string(),
                new_password: new_password.to_string(),
                confirm_password: confirm_password.to_string(),
            },
        );
        self.submit(request).await
    }

    /// Profile of user `id`, cached.
    pub async fn profile(&self, id: UserId) -> Result<UserProfile, ConsoleError> {
        self.read(keys::profile(id), RemoteRequest::get(format!("profile/{id}"))).await
    }

    /// User list, cached.
    pub async fn users(&self) -> Result<Vec<User>, ConsoleError> {
        self.read(keys::users(), RemoteRequest::get("users")).await
    }

    /// Formatter rules, cached.
    pub async fn formatters(&self) -> Result<Vec<PasswordFormatter>, ConsoleError> {
        self.read(keys::formatters(), RemoteRequest::get("password-formatters")).await
    }

    /// Dashboard counters for `role`, cached.
    pub async fn dashboard(&self, role: Role) -> Result<DashboardSummary, ConsoleError> {
        self.read(keys::dashboard(role), RemoteRequest::get(format!("dashboard/{role}")))
            .await
    }

    /// Saves name and email; the cache shows them until the server answers.
    pub async fn update_profile(&self, id: UserId, request: UpdateProfileRequest) -> ConsoleResult<UserProfile> {
        let request = MutationRequest::new(Method::Put, format!("profile/{id}"), request);
        let outcome = self
            .controller
            .execute(keys::profile(id), request, |previous: Option<UserProfile>, req| {
                previous.map(|profile| UserProfile {
                    name: req.name.clone(),
                    email: req.email.clone(),
                    ..profile
                })
            })
            .await?;
        self.observe(outcome).await
    }

    /// Changes a password; the cached profile stays untouched.
    pub async fn change_password(&self, user_id: UserId, request: ChangePasswordRequest) -> ConsoleResult<()> {
        let outcome = self.controller.run(ChangePassword { user_id, request }).await?;
        self.observe(outcome.map(|_| ())).await
    }

    /// Creates a user and returns the confirmed list.
    pub async fn create_user(&self, request: CreateUserRequest) -> ConsoleResult<Vec<User>> {
        let outcome = self.controller.run(CreateUser(request)).await?;
        self.observe(outcome.map(Option::unwrap_or_default)).await
    }

    /// Updates a user and returns the confirmed list.
    pub async fn update_user(&self, request: UpdateUserRequest) -> ConsoleResult<Vec<User>> {
        let outcome = self.controller.run(UpdateUser(request)).await?;
        self.observe(outcome.map(Option::unwrap_or_default)).await
    }

    /// Deletes a user and returns the confirmed list.
    pub async fn delete_user(&self, id: UserId) -> ConsoleResult<Vec<User>> {
        let outcome = self.controller.run(DeleteUser(id)).await?;
        self.observe(outcome.map(Option::unwrap_or_default)).await
    }

    /// Creates a formatter rule and returns the confirmed list.
    pub async fn create_formatter(&self, request: FormatterRequest) -> ConsoleResult<Vec<PasswordFormatter>> {
        let outcome = self.controller.run(CreateFormatter(request)).await?;
        self.observe(outcome.map(Option::unwrap_or_default)).await
    }

    /// Updates a formatter rule and returns the confirmed list.
    pub async fn update_formatter(
        &self,
        id: FormatterId,
        request: FormatterRequest,
    ) -> ConsoleResult<Vec<PasswordFormatter>> {
        let outcome = self.controller.run(UpdateFormatter { id, request }).await?;
        self.observe(outcome.map(Option::unwrap_or_default)).await
    }

    /// Deletes a rule unless the cached list reports it in use.
    pub async fn delete_formatter(&self, id: FormatterId) -> ConsoleResult<Vec<PasswordFormatter>> {
        let cached: Option<Vec<PasswordFormatter>> = self.queries.peek(&keys::formatters()).await?;
        let in_use = cached
            .iter()
            .flatten()
            .any(|rule| rule.id == id && rule.is_in_use);
        let outcome = self.controller.run(DeleteFormatter { id, in_use }).await?;
        self.observe(outcome.map(Option::unwrap_or_default)).await
    }

    /// Validated call that does not touch the cache.
    async fn submit<R, T>(&self, request: MutationRequest<R>) -> ConsoleResult<T>
    where
        R: Serialize + Validate,
        T: DeserializeOwned,
    {
        if let ValidationResult::Invalid(errors) = request.validate() {
            return Ok(MutationOutcome::Failed(MutationError::ValidationFailed(errors)));
        }
        let remote = request.to_remote().map_err(ControllerFault::Encode)?;
        let outcome = match self.controller.client().call(remote).await {
            Ok(value) => match serde_json::from_value(value) {
                Ok(body) => MutationOutcome::Succeeded(body),
                Err(err) => MutationOutcome::Failed(MutationError::ServerRejected(format!(
                    "unexpected response: {err}"
                ))),
            },
            Err(err) => MutationOutcome::Failed(err.into()),
        };
        self.observe(outcome).await
    }

    async fn read<T: DeserializeOwned>(&self, key: QueryKey, request: RemoteRequest) -> Result<T, ConsoleError> {
        match self.queries.get_or_fetch(key, request).await {
            Err(QueryError::Remote(RemoteError::Unauthorized)) => {
                self.end_session().await?;
                Err(QueryError::Remote(RemoteError::Unauthorized).into())
            }
            other => Ok(other?),
        }
    }

    async fn observe<T>(&self, outcome: MutationOutcome<T>) -> ConsoleResult<T> {
        if matches!(outcome, MutationOutcome::Failed(MutationError::Unauthorized)) {
            tracing::warn!("session rejected by server");
            self.end_session().await?;
        }
        Ok(outcome)
    }

    async fn end_session(&self) -> Result<(), RuntimeError> {
        self.controller.client().authorize(None);
        match self.controller.cache().remove(keys::session()).await {
            Ok(_) => Ok(()),
            // A sign-in is racing on the session key; its own outcome wins.
            Err(RuntimeError::Store(err)) => {
                tracing::debug!(error = %err, "session key busy");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
