use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};

use optiq::{
    admin::{
        keys,
        model::{PasswordFormatter, User, UserProfile},
        mutations::{CreateFormatter, CreateUser},
        requests::{CreateUserRequest, FormatterRequest, UpdateProfileRequest},
    },
    core::store::CacheStore,
    mutation::{ControllerFault, MutationController, MutationError, MutationOutcome, MutationRequest},
    query::QueryClient,
    remote::{Method, RemoteError, RemoteRequest, memory::InMemoryBackend},
    runtime::handle::{CacheHandle, RuntimeConfig, RuntimeError, spawn_cache},
};

struct Fixture {
    backend: Arc<InMemoryBackend>,
    cache: CacheHandle,
    controller: MutationController<InMemoryBackend>,
    queries: QueryClient<InMemoryBackend>,
}

async fn fixture() -> Fixture {
    let backend = Arc::new(InMemoryBackend::seeded());
    let cache = spawn_cache(CacheStore::new(), None, RuntimeConfig::default());
    let controller = MutationController::new(Arc::clone(&backend), cache.clone());
    let queries = QueryClient::new(Arc::clone(&backend), cache.clone());
    Fixture {
        backend,
        cache,
        controller,
        queries,
    }
}

async fn wait_for_calls(backend: &InMemoryBackend, n: usize) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while backend.call_count() < n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("backend call");
}

fn rename(id: u64, name: &str, email: &str) -> MutationRequest<UpdateProfileRequest> {
    MutationRequest::new(
        Method::Put,
        format!("profile/{id}"),
        UpdateProfileRequest {
            name: name.to_string(),
            email: email.to_string(),
        },
    )
}

fn apply_rename(previous: Option<UserProfile>, req: &UpdateProfileRequest) -> Option<UserProfile> {
    previous.map(|p| UserProfile {
        name: req.name.clone(),
        email: req.email.clone(),
        ..p
    })
}

async fn cached_profile(cache: &CacheHandle, id: u64) -> Option<UserProfile> {
    cache
        .read(keys::profile(id))
        .await
        .expect("read")
        .map(|e| serde_json::from_value(e.value).expect("profile"))
}

#[tokio::test]
async fn rename_commits_server_value_not_guess() {
    let fx = fixture().await;
    let before: UserProfile = fx
        .queries
        .fetch(keys::profile(1), RemoteRequest::get("profile/1"))
        .await
        .expect("fetch");
    assert_eq!(before.name, "Alice");

    fx.backend.pause();
    let controller = fx.controller.clone();
    let task = tokio::spawn(async move {
        controller
            .execute(keys::profile(1), rename(1, "Bob", "alice@example.com"), apply_rename)
            .await
    });

    wait_for_calls(&fx.backend, 2).await;
    let optimistic = cached_profile(&fx.cache, 1).await.expect("optimistic");
    assert_eq!(optimistic.name, "Bob");
    assert_eq!(optimistic.updated_at, before.updated_at);
    assert!(fx.cache.inspect(keys::profile(1)).await.expect("inspect").optimistic);

    fx.backend.resume();
    let outcome = task.await.expect("join").expect("no fault");
    let confirmed = outcome.into_result().expect("succeeded");
    assert!(confirmed.updated_at > before.updated_at);
    assert_eq!(cached_profile(&fx.cache, 1).await, Some(confirmed));
}

#[tokio::test]
async fn network_failure_restores_snapshot_and_settles_once() {
    let fx = fixture().await;
    let _: UserProfile = fx
        .queries
        .fetch(keys::profile(1), RemoteRequest::get("profile/1"))
        .await
        .expect("fetch");
    let before = fx.cache.read(keys::profile(1)).await.expect("read").expect("entry");

    fx.backend.set_offline(true);
    let outcome = fx
        .controller
        .execute(keys::profile(1), rename(1, "Bob", "alice@example.com"), apply_rename)
        .await
        .expect("no fault");

    assert!(matches!(outcome, MutationOutcome::Failed(MutationError::NetworkUnavailable(_))));
    let after = fx.cache.read(keys::profile(1)).await.expect("read").expect("entry");
    assert_eq!(after.value, before.value);
    assert!(after.version > before.version);

    let status = fx.cache.inspect(keys::profile(1)).await.expect("inspect");
    assert_eq!(status.invalidations, 1);
    assert!(!status.optimistic);
    assert!(status.entry.expect("entry").stale);
}

#[tokio::test]
async fn each_execute_schedules_exactly_one_revalidation() {
    let fx = fixture().await;
    let _: Vec<User> = fx
        .queries
        .fetch(keys::users(), RemoteRequest::get("users"))
        .await
        .expect("fetch");

    let ok = fx
        .controller
        .run(CreateUser(CreateUserRequest {
            name: "Dana".to_string(),
            email: "dana@example.com".to_string(),
            role: optiq::admin::model::Role::Member,
            password: "secret4".to_string(),
        }))
        .await
        .expect("no fault");
    assert!(ok.is_success());
    assert_eq!(fx.cache.inspect(keys::users()).await.expect("inspect").invalidations, 1);

    let duplicate = fx
        .controller
        .run(CreateUser(CreateUserRequest {
            name: "Dana".to_string(),
            email: "dana@example.com".to_string(),
            role: optiq::admin::model::Role::Member,
            password: "secret4".to_string(),
        }))
        .await
        .expect("no fault");
    assert_eq!(
        duplicate.error(),
        Some(&MutationError::ServerRejected("email already registered".to_string()))
    );
    assert_eq!(fx.cache.inspect(keys::users()).await.expect("inspect").invalidations, 2);

    let users: Vec<User> = fx.queries.peek(&keys::users()).await.expect("peek").expect("users");
    assert_eq!(users.iter().filter(|u| u.name == "Dana").count(), 1);
}

#[tokio::test]
async fn invalid_formatter_range_never_reaches_network_or_cache() {
    let fx = fixture().await;
    let outcome = fx
        .controller
        .run(CreateFormatter(FormatterRequest {
            start_index: 100,
            end_index: 50,
            prefix: "PA-".to_string(),
        }))
        .await
        .expect("no fault");

    let errors = outcome.error().expect("failed").field_errors().to_vec();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field, "start_index");
    assert_eq!(fx.backend.call_count(), 0);

    let status = fx.cache.inspect(keys::formatters()).await.expect("inspect");
    assert_eq!(status.entry, None);
    assert_eq!(status.invalidations, 0);
    assert_eq!(status.generation, 0);
}

#[tokio::test]
async fn queued_mutation_snapshots_confirmed_value_of_predecessor() {
    let fx = fixture().await;
    let _: UserProfile = fx
        .queries
        .fetch(keys::profile(1), RemoteRequest::get("profile/1"))
        .await
        .expect("fetch");

    fx.backend.pause();
    let first = {
        let controller = fx.controller.clone();
        tokio::spawn(async move {
            controller
                .execute(keys::profile(1), rename(1, "Bob", "alice@example.com"), apply_rename)
                .await
        })
    };
    wait_for_calls(&fx.backend, 2).await;

    // Carol already owns this address, so the server rejects the second edit.
    let second = {
        let controller = fx.controller.clone();
        tokio::spawn(async move {
            controller
                .execute(keys::profile(1), rename(1, "Alice", "carol@example.com"), apply_rename)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fx.backend.call_count(), 2, "second mutation must wait for the first");

    fx.backend.resume();
    let first = first.await.expect("join").expect("no fault").into_result().expect("first succeeded");
    let second = second.await.expect("join").expect("no fault");
    assert_eq!(
        second.error(),
        Some(&MutationError::ServerRejected("email already registered".to_string()))
    );

    assert_eq!(cached_profile(&fx.cache, 1).await, Some(first));
    assert_eq!(fx.cache.inspect(keys::profile(1)).await.expect("inspect").invalidations, 2);
}

#[tokio::test]
async fn fetch_overtaken_by_mutation_returns_current_value() {
    let fx = fixture().await;
    fx.cache
        .write(keys::formatters(), json!([]))
        .await
        .expect("seed");

    fx.backend.pause();
    let fetch = {
        let queries = fx.queries.clone();
        tokio::spawn(async move {
            queries
                .fetch::<Vec<PasswordFormatter>>(keys::formatters(), RemoteRequest::get("password-formatters"))
                .await
        })
    };
    wait_for_calls(&fx.backend, 1).await;

    let confirmed = json!([{ "id": 9, "startIndex": 1, "endIndex": 2, "prefix": "Z", "isInUse": false }]);
    let snapshot = fx
        .cache
        .begin_mutation(keys::formatters(), Box::new(|_: Option<&Value>| Ok(Some(json!([])))))
        .await
        .expect("begin");
    assert!(snapshot.is_some());
    fx.cache
        .commit(keys::formatters(), Some(confirmed.clone()))
        .await
        .expect("commit");

    fx.backend.resume();
    let fetched = fetch.await.expect("join").expect("fetch");
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].id, 9);

    let entry = fx.cache.read(keys::formatters()).await.expect("read").expect("entry");
    assert_eq!(entry.value, confirmed);
}

#[tokio::test]
async fn fetch_issued_during_optimistic_window_cannot_clear_settle() {
    let fx = fixture().await;
    let _: UserProfile = fx
        .queries
        .fetch(keys::profile(1), RemoteRequest::get("profile/1"))
        .await
        .expect("fetch");

    fx.backend.pause();
    let controller = fx.controller.clone();
    let mutation = tokio::spawn(async move {
        controller
            .execute(keys::profile(1), rename(1, "Bob", "alice@example.com"), apply_rename)
            .await
    });
    wait_for_calls(&fx.backend, 2).await;
    assert!(fx.cache.inspect(keys::profile(1)).await.expect("inspect").optimistic);

    let queries = fx.queries.clone();
    let refetch = tokio::spawn(async move {
        queries
            .fetch::<UserProfile>(keys::profile(1), RemoteRequest::get("profile/1"))
            .await
    });
    wait_for_calls(&fx.backend, 3).await;

    fx.backend.resume();
    let confirmed = mutation
        .await
        .expect("join")
        .expect("no fault")
        .into_result()
        .expect("succeeded");
    refetch.await.expect("join").expect("fetch");

    let status = fx.cache.inspect(keys::profile(1)).await.expect("inspect");
    let entry = status.entry.expect("entry");
    assert_eq!(entry.value, serde_json::to_value(&confirmed).expect("encode"));
    assert!(entry.stale, "late fetch must not clear the settle");
    assert_eq!(status.invalidations, 1);
}

#[tokio::test]
async fn expired_session_classifies_as_unauthorized_and_rolls_back() {
    let fx = fixture().await;
    let _: UserProfile = fx
        .queries
        .fetch(keys::profile(2), RemoteRequest::get("profile/2"))
        .await
        .expect("fetch");
    fx.backend.expire_session();

    let outcome = fx
        .controller
        .execute(keys::profile(2), rename(2, "Robert", "bob@example.com"), apply_rename)
        .await
        .expect("no fault");
    assert_eq!(outcome.error(), Some(&MutationError::Unauthorized));
    assert_eq!(cached_profile(&fx.cache, 2).await.expect("profile").name, "Bob");
}

#[tokio::test]
async fn undecodable_cached_value_is_a_fault_not_an_outcome() {
    let fx = fixture().await;
    fx.cache
        .write(keys::profile(1), json!("not a profile"))
        .await
        .expect("seed");

    let err = fx
        .controller
        .execute(keys::profile(1), rename(1, "Bob", "alice@example.com"), apply_rename)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerFault::Runtime(RuntimeError::Transform(_))));
    assert_eq!(fx.backend.call_count(), 0);
    assert!(!fx.cache.inspect(keys::profile(1)).await.expect("inspect").optimistic);
}

#[tokio::test]
async fn queued_server_failure_is_classified() {
    let fx = fixture().await;
    fx.backend
        .fail_next(RemoteError::ServerRejected("maintenance window".to_string()));
    let outcome = fx
        .controller
        .execute(keys::profile(1), rename(1, "Bob", "alice@example.com"), apply_rename)
        .await
        .expect("no fault");
    assert_eq!(outcome.error().map(|e| e.user_message()), Some("maintenance window".to_string()));
    assert_eq!(cached_profile(&fx.cache, 1).await, None);
}
