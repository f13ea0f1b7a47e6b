use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

use hashbrown::HashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::admin::{
    model::{DashboardSummary, FormatterId, PasswordFormatter, Role, Session, User, UserId, UserProfile},
    requests::{
        ChangePasswordRequest, CreateUserRequest, ForgotPasswordRequest, FormatterRequest, LoginRequest,
        ResetPasswordRequest, UpdateProfileRequest, UpdateUserRequest,
    },
};

use super::{Method, RemoteClient, RemoteError, RemoteRequest};

const CLOCK_START_MS: u64 = 1_700_000_000_000;
const CLOCK_STEP_MS: u64 = 1_000;

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password: String,
    updated_at: u64,
}

impl Account {
    fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.user.id,
            name: self.user.name.clone(),
            email: self.user.email.clone(),
            role: self.user.role,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Default)]
struct BackendState {
    accounts: BTreeMap<UserId, Account>,
    formatters: BTreeMap<FormatterId, PasswordFormatter>,
    reset_tokens: HashMap<String, UserId>,
    failures: VecDeque<RemoteError>,
    calls: Vec<RemoteRequest>,
    token: Option<String>,
    offline: bool,
    session_expired: bool,
    next_user_id: UserId,
    next_formatter_id: FormatterId,
    next_token: u64,
    clock_ms: u64,
}

impl BackendState {
    fn tick(&mut self) -> u64 {
        self.clock_ms += CLOCK_STEP_MS;
        self.clock_ms
    }

    fn account(&self, id: UserId) -> Result<&Account, RemoteError> {
        self.accounts.get(&id).ok_or_else(|| rejected("user not found"))
    }

    fn account_mut(&mut self, id: UserId) -> Result<&mut Account, RemoteError> {
        self.accounts.get_mut(&id).ok_or_else(|| rejected("user not found"))
    }

    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.accounts
            .values()
            .any(|a| a.user.email.eq_ignore_ascii_case(email) && Some(a.user.id) != except)
    }
}

/// In-process admin API used by tests and offline demos.
///
/// Responses are deterministic: ids are sequential and `updated_at` comes
/// from a logical clock. Faults can be injected per call.
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    gate: watch::Sender<bool>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Empty backend with no accounts.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(BackendState {
                next_user_id: 1,
                next_formatter_id: 1,
                next_token: 1,
                clock_ms: CLOCK_START_MS,
                ..BackendState::default()
            }),
            gate,
        }
    }

    /// Backend holding one account per role and two formatter rules.
    ///
    /// | id | name  | email             | role       | password |
    /// |----|-------|-------------------|------------|----------|
    /// | 1  | Alice | alice@example.com | superadmin | secret1  |
    /// | 2  | Bob   | bob@example.com   | member     | secret2  |
    /// | 3  | Carol | carol@example.com | client     | secret3  |
    ///
    /// Formatter 1 (`0..=3`, `PA-`) is in use; formatter 2 (`4..=8`, `X`) is not.
    pub fn seeded() -> Self {
        let backend = Self::new();
        {
            let mut state = backend.lock();
            for (name, role, password) in [
                ("Alice", Role::Superadmin, "secret1"),
                ("Bob", Role::Member, "secret2"),
                ("Carol", Role::Client, "secret3"),
            ] {
                insert_account(&mut state, name, &format!("{}@example.com", name.to_lowercase()), role, password);
            }
            for (start, end, prefix, in_use) in [(0, 3, "PA-", true), (4, 8, "X", false)] {
                let id = state.next_formatter_id;
                state.next_formatter_id += 1;
                state.formatters.insert(
                    id,
                    PasswordFormatter {
                        id,
                        start_index: start,
                        end_index: end,
                        prefix: prefix.to_string(),
                        is_in_use: in_use,
                    },
                );
            }
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every later call fails with [`RemoteError::NetworkUnavailable`] while set.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Queues `error` as the result of the next call, ahead of routing.
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().failures.push_back(error);
    }

    /// Rejects every non-auth call with [`RemoteError::Unauthorized`] until the next login.
    pub fn expire_session(&self) {
        self.lock().session_expired = true;
    }

    /// Holds calls after they are recorded until [`InMemoryBackend::resume`].
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Releases held and future calls.
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.lock().calls.clone()
    }

    /// Number of requests received.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Token last installed through [`RemoteClient::authorize`].
    pub fn current_token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    /// Outstanding reset token for `email`, as if read from the reset mail.
    pub fn reset_token_for(&self, email: &str) -> Option<String> {
        let state = self.lock();
        let id = state
            .accounts
            .values()
            .find(|a| a.user.email.eq_ignore_ascii_case(email))?
            .user
            .id;
        state
            .reset_tokens
            .iter()
            .find(|(_, owner)| **owner == id)
            .map(|(token, _)| token.clone())
    }

    /// Flips the server-computed usage flag of a formatter rule.
    pub fn mark_formatter_in_use(&self, id: FormatterId, in_use: bool) {
        if let Some(rule) = self.lock().formatters.get_mut(&id) {
            rule.is_in_use = in_use;
        }
    }

    /// Current password of `id`; lets tests observe side effects.
    pub fn password_of(&self, id: UserId) -> Option<String> {
        self.lock().accounts.get(&id).map(|a| a.password.clone())
    }

    fn dispatch(&self, request: &RemoteRequest) -> Result<Value, RemoteError> {
        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::NetworkUnavailable("backend offline".to_string()));
        }
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let segments: Vec<&str> = request
            .endpoint
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if state.session_expired && segments.first() != Some(&"auth") {
            return Err(RemoteError::Unauthorized);
        }

        let payload = request.payload.as_ref();
        match (request.method, segments.as_slice()) {
            (Method::Post, ["auth", "login"]) => login(&mut state, body(payload)?),
            (Method::Post, ["auth", "forgot-password"]) => forgot_password(&mut state, body(payload)?),
            (Method::Post, ["auth", "reset-password"]) => reset_password(&mut state, body(payload)?),
            (Method::Get, ["profile", id]) => reply(state.account(parse_id(id)?)?.profile()),
            (Method::Put, ["profile", id]) => update_profile(&mut state, parse_id(id)?, body(payload)?),
            (Method::Post, ["profile", id, "change-password"]) => {
                change_password(&mut state, parse_id(id)?, body(payload)?)
            }
            (Method::Get, ["users"]) => reply(state.accounts.values().map(|a| a.user.clone()).collect::<Vec<_>>()),
            (Method::Post, ["users"]) => create_user(&mut state, body(payload)?),
            (Method::Put, ["users", id]) => update_user(&mut state, parse_id(id)?, body(payload)?),
            (Method::Delete, ["users", id]) => {
                let id = parse_id(id)?;
                state.accounts.remove(&id).ok_or_else(|| rejected("user not found"))?;
                state.reset_tokens.retain(|_, owner| *owner != id);
                Ok(json!({ "message": "user deleted" }))
            }
            (Method::Get, ["password-formatters"]) => {
                reply(state.formatters.values().cloned().collect::<Vec<_>>())
            }
            (Method::Post, ["password-formatters"]) => create_formatter(&mut state, body(payload)?),
            (Method::Put, ["password-formatters", id]) => update_formatter(&mut state, parse_id(id)?, body(payload)?),
            (Method::Delete, ["password-formatters", id]) => {
                let id = parse_id(id)?;
                match state.formatters.get(&id) {
                    None => Err(rejected("password formatter not found")),
                    Some(rule) if rule.is_in_use => Err(rejected("password formatter is in use")),
                    Some(_) => {
                        state.formatters.remove(&id);
                        Ok(json!({ "message": "password formatter deleted" }))
                    }
                }
            }
            (Method::Get, ["dashboard", role]) => dashboard(&state, role),
            (method, _) => Err(rejected(format!("no route for {method} {}", request.endpoint))),
        }
    }
}

impl RemoteClient for InMemoryBackend {
    async fn call(&self, request: RemoteRequest) -> Result<Value, RemoteError> {
        self.lock().calls.push(request.clone());

        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the wait only ends by reopening.
        let _ = gate.wait_for(|open| *open).await;

        let result = self.dispatch(&request);
        tracing::trace!(method = %request.method, endpoint = %request.endpoint, ok = result.is_ok(), "in-memory call");
        result
    }

    fn authorize(&self, token: Option<&str>) {
        self.lock().token = token.map(str::to_string);
    }
}

fn rejected(message: impl Into<String>) -> RemoteError {
    RemoteError::ServerRejected(message.into())
}

fn body<T: DeserializeOwned>(payload: Option<&Value>) -> Result<T, RemoteError> {
    let payload = payload.ok_or_else(|| rejected("missing request body"))?;
    serde_json::from_value(payload.clone()).map_err(|e| rejected(format!("invalid request body: {e}")))
}

fn reply<T: Serialize>(value: T) -> Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(|e| rejected(format!("encoding failed: {e}")))
}

fn parse_id(raw: &str) -> Result<u64, RemoteError> {
    raw.parse().map_err(|_| rejected(format!("invalid id: {raw}")))
}

fn insert_account(state: &mut BackendState, name: &str, email: &str, role: Role, password: &str) -> UserId {
    let id = state.next_user_id;
    state.next_user_id += 1;
    let updated_at = state.tick();
    state.accounts.insert(
        id,
        Account {
            user: User {
                id,
                name: name.to_string(),
                email: email.to_string(),
                role,
                is_active: true,
            },
            password: password.to_string(),
            updated_at,
        },
    );
    id
}

fn login(state: &mut BackendState, req: LoginRequest) -> Result<Value, RemoteError> {
    let account = state
        .accounts
        .values()
        .find(|a| a.user.email.eq_ignore_ascii_case(&req.email) && a.password == req.password)
        .ok_or_else(|| rejected("invalid email or password"))?;
    if !account.user.is_active {
        return Err(rejected("account is deactivated"));
    }
    let user = account.profile();
    let token = format!("token-{}", state.next_token);
    state.next_token += 1;
    state.session_expired = false;
    reply(Session { token, user })
}

fn forgot_password(state: &mut BackendState, req: ForgotPasswordRequest) -> Result<Value, RemoteError> {
    let owner = state
        .accounts
        .values()
        .find(|a| a.user.email.eq_ignore_ascii_case(&req.email))
        .map(|a| a.user.id);
    if let Some(id) = owner {
        let token = format!("reset-{}", state.next_token);
        state.next_token += 1;
        state.reset_tokens.retain(|_, o| *o != id);
        state.reset_tokens.insert(token, id);
    }
    Ok(json!({ "message": "if the account exists, a reset link has been sent" }))
}

fn reset_password(state: &mut BackendState, req: ResetPasswordRequest) -> Result<Value, RemoteError> {
    let id = state
        .reset_tokens
        .remove(&req.token)
        .ok_or_else(|| rejected("invalid or expired reset token"))?;
    let stamp = state.tick();
    let account = state.account_mut(id)?;
    account.password = req.new_password;
    account.updated_at = stamp;
    Ok(json!({ "message": "password has been reset" }))
}

fn update_profile(state: &mut BackendState, id: UserId, req: UpdateProfileRequest) -> Result<Value, RemoteError> {
    if state.email_taken(&req.email, Some(id)) {
        return Err(rejected("email already registered"));
    }
    let stamp = state.tick();
    let account = state.account_mut(id)?;
    account.user.name = req.name;
    account.user.email = req.email;
    account.updated_at = stamp;
    reply(account.profile())
}

fn change_password(state: &mut BackendState, id: UserId, req: ChangePasswordRequest) -> Result<Value, RemoteError> {
    let stamp = state.tick();
    let account = state.account_mut(id)?;
    if account.password != req.current_password {
        return Err(rejected("incorrect current password"));
    }
    account.password = req.new_password;
    account.updated_at = stamp;
    Ok(json!({ "message": "password updated" }))
}

fn create_user(state: &mut BackendState, req: CreateUserRequest) -> Result<Value, RemoteError> {
    if state.email_taken(&req.email, None) {
        return Err(rejected("email already registered"));
    }
    let id = insert_account(state, &req.name, &req.email, req.role, &req.password);
    reply(state.account(id)?.user.clone())
}

fn update_user(state: &mut BackendState, id: UserId, req: UpdateUserRequest) -> Result<Value, RemoteError> {
    if state.email_taken(&req.email, Some(id)) {
        return Err(rejected("email already registered"));
    }
    let stamp = state.tick();
    let account = state.account_mut(id)?;
    account.user.name = req.name;
    account.user.email = req.email;
    account.user.role = req.role;
    account.user.is_active = req.is_active;
    account.updated_at = stamp;
    reply(account.user.clone())
}

fn check_range(req: &FormatterRequest) -> Result<(), RemoteError> {
    if req.start_index > req.end_index {
        return Err(rejected("start index must not exceed end index"));
    }
    Ok(())
}

fn create_formatter(state: &mut BackendState, req: FormatterRequest) -> Result<Value, RemoteError> {
    check_range(&req)?;
    let id = state.next_formatter_id;
    state.next_formatter_id += 1;
    let rule = PasswordFormatter {
        id,
        start_index: req.start_index,
        end_index: req.end_index,
        prefix: req.prefix,
        is_in_use: false,
    };
    state.formatters.insert(id, rule.clone());
    reply(rule)
}

fn update_formatter(state: &mut BackendState, id: FormatterId, req: FormatterRequest) -> Result<Value, RemoteError> {
    check_range(&req)?;
    let rule = state
        .formatters
        .get_mut(&id)
        .ok_or_else(|| rejected("password formatter not found"))?;
    rule.start_index = req.start_index;
    rule.end_index = req.end_index;
    rule.prefix = req.prefix;
    reply(rule.clone())
}

fn dashboard(state: &BackendState, role: &str) -> Result<Value, RemoteError> {
    let role: Role = serde_json::from_value(Value::String(role.to_string()))
        .map_err(|_| rejected(format!("unknown role: {role}")))?;
    let count = |n: usize| n as u64;
    reply(DashboardSummary {
        role,
        total_users: count(state.accounts.len()),
        active_users: count(state.accounts.values().filter(|a| a.user.is_active).count()),
        total_formatters: count(state.formatters.len()),
        formatters_in_use: count(state.formatters.values().filter(|r| r.is_in_use).count()),
    })
}
