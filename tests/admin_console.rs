use std::{sync::Arc, time::Duration};

use optiq::{
    admin::{
        form::{FormState, NoticeKind},
        keys,
        model::Role,
        requests::{ChangePasswordRequest, CreateUserRequest, FormatterRequest, UpdateProfileRequest, UpdateUserRequest},
        service::{AdminConsole, ConsoleError},
    },
    config::ConsoleConfig,
    core::store::CacheStore,
    mutation::MutationError,
    query::QueryError,
    remote::{RemoteError, memory::InMemoryBackend},
    runtime::handle::{CacheHandle, RuntimeConfig, spawn_cache},
};

fn console() -> (Arc<InMemoryBackend>, CacheHandle, AdminConsole<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::seeded());
    let cache = spawn_cache(CacheStore::new(), None, RuntimeConfig::default());
    let console = AdminConsole::new(Arc::clone(&backend), cache.clone(), Duration::from_secs(6));
    (backend, cache, console)
}

#[tokio::test]
async fn login_stores_session_and_installs_token() {
    let (backend, _cache, console) = console();
    let session = console
        .login("alice@example.com", "secret1")
        .await
        .expect("login")
        .into_result()
        .expect("accepted");

    assert_eq!(session.user.role, Role::Superadmin);
    assert_eq!(console.session().await.expect("session"), Some(session.clone()));
    assert_eq!(backend.current_token(), Some(session.token));
}

#[tokio::test]
async fn login_rejections() {
    let (backend, _cache, console) = console();

    let invalid = console.login("not-an-email", "").await.expect("login");
    let fields: Vec<&str> = invalid
        .error()
        .expect("failed")
        .field_errors()
        .iter()
        .map(|e| e.field.as_str())
        .collect();
    assert_eq!(fields, ["email", "password"]);
    assert_eq!(backend.call_count(), 0);

    let wrong = console.login("alice@example.com", "nope").await.expect("login");
    assert_eq!(
        wrong.error(),
        Some(&MutationError::ServerRejected("invalid email or password".to_string()))
    );
    assert_eq!(console.session().await.expect("session"), None);
    assert_eq!(backend.current_token(), None);
}

#[tokio::test]
async fn profile_rename_shows_server_payload() {
    let (_backend, cache, console) = console();
    let before = console.profile(1).await.expect("profile");
    let mut form = FormState::new(UpdateProfileRequest {
        name: before.name.clone(),
        email: before.email.clone(),
    });
    form.begin_edit();
    form.values.name = "Bob".to_string();

    let outcome = console
        .update_profile(1, form.values.clone())
        .await
        .expect("update");
    form.apply_outcome(&outcome, "Profile updated", None);

    let saved = outcome.into_result().expect("saved");
    assert_eq!(saved.name, "Bob");
    assert!(saved.updated_at > before.updated_at);
    assert!(!form.editing);
    assert_eq!(form.notice.as_ref().map(|n| n.kind), Some(NoticeKind::Success));

    let cached = cache.read(keys::profile(1)).await.expect("read").expect("entry");
    assert_eq!(cached.value, serde_json::to_value(&saved).expect("encode"));
}

#[tokio::test]
async fn wrong_current_password_keeps_input_and_cache() {
    let (backend, cache, console) = console();
    console.profile(1).await.expect("profile");
    let before = cache.read(keys::profile(1)).await.expect("read").expect("entry");

    let mut form = FormState::new(ChangePasswordRequest {
        current_password: "wrong-one".to_string(),
        new_password: "brand-new".to_string(),
        confirm_password: "brand-new".to_string(),
    });
    form.begin_edit();
    let outcome = console
        .change_password(1, form.values.clone())
        .await
        .expect("change password");
    form.apply_outcome(&outcome, "Password changed", None);

    assert_eq!(
        outcome.error(),
        Some(&MutationError::ServerRejected("incorrect current password".to_string()))
    );
    assert_eq!(form.values.current_password, "wrong-one");
    assert!(form.editing);
    assert_eq!(
        form.notice.as_ref().map(|n| n.message.as_str()),
        Some("incorrect current password")
    );

    let after = cache.read(keys::profile(1)).await.expect("read").expect("entry");
    assert_eq!(after.value, before.value);
    assert_eq!(backend.password_of(1).as_deref(), Some("secret1"));
}

#[tokio::test]
async fn change_password_success_updates_backend() {
    let (backend, _cache, console) = console();
    let outcome = console
        .change_password(
            2,
            ChangePasswordRequest {
                current_password: "secret2".to_string(),
                new_password: "hunter22".to_string(),
                confirm_password: "hunter22".to_string(),
            },
        )
        .await
        .expect("change password");
    assert!(outcome.is_success());
    assert_eq!(backend.password_of(2).as_deref(), Some("hunter22"));
}

#[tokio::test]
async fn inverted_formatter_range_is_rejected_before_sending() {
    let (backend, _cache, console) = console();
    let outcome = console
        .create_formatter(FormatterRequest {
            start_index: 100,
            end_index: 50,
            prefix: "PA-".to_string(),
        })
        .await
        .expect("create");

    let mut form = FormState::new(());
    form.apply_outcome(&outcome, "Formatter created", None);
    assert_eq!(form.error_for("start_index"), Some("must not exceed end_index"));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn formatter_crud_honours_in_use_flag() {
    let (backend, _cache, console) = console();
    let rules = console.formatters().await.expect("formatters");
    assert_eq!(rules.len(), 2);
    assert!(rules[0].is_in_use);
    let calls = backend.call_count();

    let blocked = console.delete_formatter(1).await.expect("delete");
    let errors = blocked.error().expect("failed").field_errors().to_vec();
    assert_eq!((errors[0].field.as_str(), errors[0].reason.as_str()), ("id", "formatter is in use"));
    assert_eq!(backend.call_count(), calls);

    let remaining = console
        .delete_formatter(2)
        .await
        .expect("delete")
        .into_result()
        .expect("deleted");
    assert_eq!(remaining.iter().map(|r| r.id).collect::<Vec<_>>(), [1]);

    let created = console
        .create_formatter(FormatterRequest {
            start_index: 2,
            end_index: 5,
            prefix: "QX".to_string(),
        })
        .await
        .expect("create")
        .into_result()
        .expect("created");
    let new_id = created.last().expect("rule").id;
    assert_eq!(new_id, 3);

    let updated = console
        .update_formatter(
            new_id,
            FormatterRequest {
                start_index: 2,
                end_index: 9,
                prefix: "QY".to_string(),
            },
        )
        .await
        .expect("update")
        .into_result()
        .expect("updated");
    let rule = updated.iter().find(|r| r.id == new_id).expect("rule");
    assert_eq!((rule.end_index, rule.prefix.as_str()), (9, "QY"));
}

#[tokio::test]
async fn user_management_round_trip() {
    let (backend, _cache, console) = console();
    assert_eq!(console.users().await.expect("users").len(), 3);

    let users = console
        .create_user(CreateUserRequest {
            name: "Dana".to_string(),
            email: "dana@example.com".to_string(),
            role: Role::Client,
            password: "secret4".to_string(),
        })
        .await
        .expect("create")
        .into_result()
        .expect("created");
    let dana = users.iter().find(|u| u.name == "Dana").expect("dana").clone();
    assert_eq!(dana.id, 4);

    let users = console
        .update_user(UpdateUserRequest {
            id: dana.id,
            name: "Dana".to_string(),
            email: dana.email.clone(),
            role: Role::Member,
            is_active: false,
        })
        .await
        .expect("update")
        .into_result()
        .expect("updated");
    let updated = users.iter().find(|u| u.id == dana.id).expect("dana");
    assert_eq!((updated.role, updated.is_active), (Role::Member, false));

    let users = console
        .delete_user(dana.id)
        .await
        .expect("delete")
        .into_result()
        .expect("deleted");
    assert!(users.iter().all(|u| u.id != dana.id));

    let calls = backend.call_count();
    let refreshed = console.users().await.expect("users");
    assert_eq!(backend.call_count(), calls + 1, "settled key must refetch");
    assert_eq!(refreshed, users);
}

#[tokio::test]
async fn dashboard_is_served_from_cache_until_invalidated() {
    let (backend, cache, console) = console();
    let summary = console.dashboard(Role::Superadmin).await.expect("dashboard");
    assert_eq!((summary.total_users, summary.formatters_in_use), (3, 1));

    console.dashboard(Role::Superadmin).await.expect("cached");
    assert_eq!(backend.call_count(), 1);

    cache.invalidate(keys::dashboard(Role::Superadmin)).await.expect("invalidate");
    console.dashboard(Role::Superadmin).await.expect("refetched");
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn unauthorized_answer_ends_the_session() {
    let (backend, _cache, console) = console();
    console
        .login("bob@example.com", "secret2")
        .await
        .expect("login")
        .into_result()
        .expect("accepted");
    backend.expire_session();

    let err = console.users().await.unwrap_err();
    assert!(matches!(err, ConsoleError::Query(QueryError::Remote(RemoteError::Unauthorized))));
    assert_eq!(console.session().await.expect("session"), None);
    assert_eq!(backend.current_token(), None);

    console
        .login("bob@example.com", "secret2")
        .await
        .expect("login")
        .into_result()
        .expect("accepted again");
    let outcome = {
        backend.expire_session();
        console
            .update_profile(
                2,
                UpdateProfileRequest {
                    name: "Robert".to_string(),
                    email: "bob@example.com".to_string(),
                },
            )
            .await
            .expect("update")
    };
    assert_eq!(outcome.error(), Some(&MutationError::Unauthorized));
    assert_eq!(console.session().await.expect("session"), None);
}

#[tokio::test]
async fn password_reset_flow() {
    let (backend, _cache, console) = console();
    let ack = console
        .forgot_password("carol@example.com")
        .await
        .expect("forgot")
        .into_result()
        .expect("accepted");
    assert!(ack.message.contains("reset link"));
    let token = backend.reset_token_for("carol@example.com").expect("token");

    let mismatch = console
        .reset_password(&token, "new-secret", "other-secret")
        .await
        .expect("reset");
    assert_eq!(mismatch.error().expect("failed").field_errors()[0].field, "confirm_password");

    let reset = console
        .reset_password(&token, "new-secret", "new-secret")
        .await
        .expect("reset");
    assert!(reset.is_success());

    let reused = console
        .reset_password(&token, "new-secret", "new-secret")
        .await
        .expect("reset");
    assert_eq!(
        reused.error(),
        Some(&MutationError::ServerRejected("invalid or expired reset token".to_string()))
    );

    let session = console
        .login("carol@example.com", "new-secret")
        .await
        .expect("login")
        .into_result()
        .expect("accepted");
    assert_eq!(session.user.role, Role::Client);
}

#[tokio::test]
async fn logout_clears_session_and_token() {
    let (backend, _cache, console) = console();
    console.login("alice@example.com", "secret1").await.expect("login");
    console.logout().await.expect("logout");
    assert_eq!(console.session().await.expect("session"), None);
    assert_eq!(backend.current_token(), None);
}

#[tokio::test]
async fn connect_applies_configuration() {
    let config = ConsoleConfig::from_lookup("PA", |name| match name {
        "PA_NOTICE_TTL_MS" => Some("2500".to_string()),
        _ => None,
    })
    .expect("config");
    let console = AdminConsole::connect(&config, CacheStore::new(), None);
    assert_eq!(console.notice_ttl(), Duration::from_millis(2500));
    assert_eq!(console.session().await.expect("session"), None);
    console.controller().cache().shutdown().await.expect("shutdown");
}
