use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use primacy_application::{DistributedLockManager, LockAcquisition};
use primacy_core::{AppError, AppResult};
use primacy_domain::LockHandle;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{SidecarConfig, SidecarLockManager, request_uri};
use crate::retry::RetryPolicy;

const LEASE: Duration = Duration::from_secs(15);

#[derive(Debug, Default)]
struct FakeSidecar {
    holders: HashMap<String, String>,
    forced_status: Option<StatusCode>,
    requests: Vec<String>,
}

type SharedSidecar = Arc<Mutex<FakeSidecar>>;

fn holder_key(namespace: &str, query: &HashMap<String, String>) -> String {
    let name = query.get("name").map(String::as_str).unwrap_or_default();
    format!("{namespace}/{name}")
}

async fn acquire_lock(
    State(sidecar): State<SharedSidecar>,
    Path(namespace): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut sidecar = sidecar.lock().await;
    sidecar.requests.push(format!("acquire {namespace} {query:?}"));
    if let Some(status) = sidecar.forced_status {
        return status.into_response();
    }

    let name = holder_key(&namespace, &query);
    let owner = query.get("owner").cloned().unwrap_or_default();
    let duration = query
        .get("duration")
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or_default();

    match sidecar.holders.get(&name) {
        Some(holder) if *holder != owner => StatusCode::CONFLICT.into_response(),
        _ => {
            sidecar.holders.insert(name.clone(), owner.clone());
            let lock_id = query.get("name").cloned().unwrap_or_default();
            axum::Json(json!({ "lockId": lock_id, "owner": owner, "lockPeriod": duration }))
                .into_response()
        }
    }
}

async fn read_lock(
    State(sidecar): State<SharedSidecar>,
    Path(namespace): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut sidecar = sidecar.lock().await;
    sidecar.requests.push(format!("get {namespace} {query:?}"));
    if let Some(status) = sidecar.forced_status {
        return status.into_response();
    }

    let lock_id = query.get("name").cloned().unwrap_or_default();
    let owner = sidecar
        .holders
        .get(&holder_key(&namespace, &query))
        .cloned()
        .unwrap_or_default();
    axum::Json(json!({ "lockId": lock_id, "owner": owner })).into_response()
}

async fn release_lock(
    State(sidecar): State<SharedSidecar>,
    Path(namespace): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut sidecar = sidecar.lock().await;
    sidecar.requests.push(format!("release {namespace} {query:?}"));

    let name = holder_key(&namespace, &query);
    let owner = query.get("owner").cloned().unwrap_or_default();
    if sidecar.holders.get(&name) == Some(&owner) {
        sidecar.holders.remove(&name);
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn spawn_sidecar() -> (Url, SharedSidecar) {
    let sidecar = SharedSidecar::default();
    let routes = Router::new()
        .route("/{namespace}/lock/acquire", post(acquire_lock))
        .route("/{namespace}/lock/release", post(release_lock))
        .route("/{namespace}/lock", get(read_lock));
    let app = Router::new()
        .nest("/leader", routes)
        .with_state(sidecar.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|_| unreachable!());
    let address = listener.local_addr().unwrap_or_else(|_| unreachable!());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let endpoint =
        Url::parse(format!("http://{address}/leader/").as_str()).unwrap_or_else(|_| unreachable!());
    (endpoint, sidecar)
}

fn manager(endpoint: Url, instance_id: Option<&str>) -> SidecarLockManager {
    let mut config = SidecarConfig::new(endpoint);
    config.instance_id = instance_id.map(str::to_owned);
    config.retry = RetryPolicy::new(2, Duration::from_millis(10));
    config.request_timeout = Duration::from_secs(5);
    SidecarLockManager::new(reqwest::Client::new(), config)
}

async fn acquire(manager: &SidecarLockManager, owner: &str) -> AppResult<LockHandle> {
    manager
        .try_lock("host", "primary", owner, LEASE, &CancellationToken::new())
        .await?
        .into_handle()
        .ok_or_else(|| AppError::Conflict("primary is held".to_owned()))
}

#[test]
fn request_uri_never_doubles_slashes() -> AppResult<()> {
    let with_slash = Url::parse("http://sidecar:4040/leader/")
        .map_err(|error| AppError::Validation(error.to_string()))?;
    let without_slash = Url::parse("http://sidecar:4040/leader")
        .map_err(|error| AppError::Validation(error.to_string()))?;

    assert_eq!(
        request_uri(&with_slash, "lock?name=a")?.as_str(),
        "http://sidecar:4040/leader/lock?name=a"
    );
    assert_eq!(
        request_uri(&without_slash, "/lock?name=a")?.as_str(),
        "http://sidecar:4040/leader/lock?name=a"
    );
    assert_eq!(
        request_uri(&with_slash, "")?.as_str(),
        "http://sidecar:4040/leader"
    );
    Ok(())
}

#[tokio::test]
async fn acquire_builds_handle_from_sidecar_body() -> AppResult<()> {
    let (endpoint, sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, None);

    let handle = acquire(&manager, "instance-a").await?;

    assert_eq!(handle.owner(), "instance-a");
    assert_eq!(handle.token(), "instance-a");
    assert_eq!(handle.lease_period(), LEASE);
    let sidecar = sidecar.lock().await;
    assert_eq!(
        sidecar.holders.get("host/primary").map(String::as_str),
        Some("instance-a")
    );
    assert!(sidecar.requests[0].starts_with("acquire host "));
    assert!(sidecar.requests[0].contains("\"name\": \"primary\""));
    assert!(sidecar.requests[0].contains("\"renewDeadline\": \"10\""));
    Ok(())
}

#[tokio::test]
async fn namespaces_are_isolated_by_path_segment() -> AppResult<()> {
    let (endpoint, sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, None);
    let cancel = CancellationToken::new();
    acquire(&manager, "instance-a").await?;

    let other_namespace = manager
        .try_lock("jobs", "primary", "instance-b", LEASE, &cancel)
        .await?;
    let odd_namespace = manager
        .try_lock("team a/jobs", "primary", "instance-c", LEASE, &cancel)
        .await?;

    assert!(other_namespace.is_acquired());
    assert!(odd_namespace.is_acquired());
    assert_eq!(
        manager.get_owner("jobs", "primary", &cancel).await?.as_deref(),
        Some("instance-b")
    );
    let sidecar = sidecar.lock().await;
    assert_eq!(sidecar.holders.len(), 3);
    assert!(sidecar.holders.keys().any(|key| key.starts_with('~')));
    Ok(())
}

#[tokio::test]
async fn held_lock_is_a_conflict_for_other_owners() -> AppResult<()> {
    let (endpoint, _sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, None);
    acquire(&manager, "instance-a").await?;

    let second = manager
        .try_lock("host", "primary", "instance-b", LEASE, &CancellationToken::new())
        .await?;

    assert_eq!(second, LockAcquisition::Conflict);
    assert_eq!(
        manager
            .get_owner("host", "primary", &CancellationToken::new())
            .await?
            .as_deref(),
        Some("instance-a")
    );
    Ok(())
}

#[tokio::test]
async fn empty_owner_falls_back_to_instance_id() -> AppResult<()> {
    let (endpoint, _sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, Some("pod-7"));

    let handle = acquire(&manager, "").await?;

    assert_eq!(handle.owner(), "pod-7");
    Ok(())
}

#[tokio::test]
async fn invalid_arguments_send_no_requests() {
    let (endpoint, sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, None);
    let cancel = CancellationToken::new();

    let no_owner = manager
        .try_lock("host", "primary", "", LEASE, &cancel)
        .await;
    let no_lock = manager
        .try_lock("host", "", "instance-a", LEASE, &cancel)
        .await;
    let zero_period = manager
        .try_lock("host", "primary", "instance-a", Duration::ZERO, &cancel)
        .await;
    let no_owner_lookup = manager.get_owner("", "primary", &cancel).await;

    assert!(matches!(no_owner, Err(AppError::Validation(_))));
    assert!(matches!(no_lock, Err(AppError::Validation(_))));
    assert!(matches!(zero_period, Err(AppError::Validation(_))));
    assert!(matches!(no_owner_lookup, Err(AppError::Validation(_))));
    assert!(sidecar.lock().await.requests.is_empty());
}

#[tokio::test]
async fn renew_reports_loss_when_another_owner_took_over() -> AppResult<()> {
    let (endpoint, sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, None);
    let handle = acquire(&manager, "instance-a").await?;

    assert!(manager.renew(&handle, &CancellationToken::new()).await?);

    sidecar
        .lock()
        .await
        .holders
        .insert("host/primary".to_owned(), "instance-b".to_owned());
    assert!(!manager.renew(&handle, &CancellationToken::new()).await?);
    Ok(())
}

#[tokio::test]
async fn renew_server_errors_are_transient_after_retries() -> AppResult<()> {
    let (endpoint, sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, None);
    let handle = acquire(&manager, "instance-a").await?;
    sidecar.lock().await.forced_status = Some(StatusCode::SERVICE_UNAVAILABLE);

    let renewed = manager.renew(&handle, &CancellationToken::new()).await;

    assert!(matches!(renewed, Err(AppError::Transient(_))));
    assert_eq!(sidecar.lock().await.requests.len(), 3);
    Ok(())
}

#[tokio::test]
async fn non_success_acquire_is_not_acquired() -> AppResult<()> {
    let (endpoint, sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, None);
    sidecar.lock().await.forced_status = Some(StatusCode::BAD_GATEWAY);

    let outcome = manager
        .try_lock("host", "primary", "instance-a", LEASE, &CancellationToken::new())
        .await?;

    assert_eq!(outcome, LockAcquisition::Conflict);
    Ok(())
}

#[tokio::test]
async fn release_frees_the_lock_and_swallows_not_found() -> AppResult<()> {
    let (endpoint, _sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, None);
    let handle = acquire(&manager, "instance-a").await?;

    manager.release(&handle, &CancellationToken::new()).await?;
    manager.release(&handle, &CancellationToken::new()).await?;

    assert_eq!(
        manager
            .get_owner("host", "primary", &CancellationToken::new())
            .await?,
        None
    );
    Ok(())
}

#[tokio::test]
async fn owner_lookup_failure_is_a_transport_error() {
    let (endpoint, sidecar) = spawn_sidecar().await;
    let manager = manager(endpoint, None);
    sidecar.lock().await.forced_status = Some(StatusCode::NOT_FOUND);

    let owner = manager
        .get_owner("host", "primary", &CancellationToken::new())
        .await;

    assert!(matches!(owner, Err(AppError::Transport(_))));
}

#[tokio::test]
async fn unreachable_sidecar_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|_| unreachable!());
    let address = listener.local_addr().unwrap_or_else(|_| unreachable!());
    drop(listener);
    let endpoint =
        Url::parse(format!("http://{address}/").as_str()).unwrap_or_else(|_| unreachable!());
    let manager = manager(endpoint, None);

    let outcome = manager
        .try_lock("host", "primary", "instance-a", LEASE, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, Err(AppError::Transient(_))));
}
