//! HTTP authority clients against an in-process axum server.
//!
//! The server fronts the in-memory authorities, so the full engine can
//! run over real sockets.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use offerpack_core::{Constraint, HostOffer, ResourceVector, Task};
use offerpack_engine::{
    AuthorityError, EngineSettings, ErrorKind, HostManager, MemoryHostManager, MemoryResourceManager,
    PlacementEngine, PlacementMetrics, ResourceManager, procedures,
};
use offerpack_rpc::wire::{
    AcquireHostOffersRequest, AcquireHostOffersResponse, DequeueTasksRequest, DequeueTasksResponse,
    ReleaseHostOffersRequest, ReleaseHostOffersResponse, SetPlacementsRequest, SetPlacementsResponse,
};
use offerpack_rpc::{HttpHostManager, HttpResourceManager, WireError, WireErrorCode};

struct Backend {
    rm: Arc<MemoryResourceManager>,
    hm: Arc<MemoryHostManager>,
}

fn wire(e: AuthorityError) -> WireError {
    let code = match e.kind {
        ErrorKind::InvalidArgument => WireErrorCode::InvalidArgument,
        ErrorKind::Unavailable => WireErrorCode::Unavailable,
        _ => WireErrorCode::Failure,
    };
    WireError::new(code, e.message)
}

async fn dequeue(
    State(b): State<Arc<Backend>>,
    Json(req): Json<DequeueTasksRequest>,
) -> Json<DequeueTasksResponse> {
    let wait = Duration::from_millis(req.timeout_ms);
    Json(match b.rm.dequeue_tasks(req.limit, wait).await {
        Ok(tasks) => DequeueTasksResponse { tasks, error: None },
        Err(e) => DequeueTasksResponse {
            tasks: Vec::new(),
            error: Some(wire(e)),
        },
    })
}

async fn set_placements(
    State(b): State<Arc<Backend>>,
    Json(req): Json<SetPlacementsRequest>,
) -> Json<SetPlacementsResponse> {
    Json(SetPlacementsResponse {
        error: b.rm.set_placements(&req.placements).await.err().map(wire),
    })
}

async fn acquire(
    State(b): State<Arc<Backend>>,
    Json(req): Json<AcquireHostOffersRequest>,
) -> Json<AcquireHostOffersResponse> {
    Json(match b.hm.acquire_host_offers(&req.constraint).await {
        Ok(host_offers) => AcquireHostOffersResponse {
            host_offers,
            error: None,
        },
        Err(e) => AcquireHostOffersResponse {
            host_offers: Vec::new(),
            error: Some(wire(e)),
        },
    })
}

async fn release(
    State(b): State<Arc<Backend>>,
    Json(req): Json<ReleaseHostOffersRequest>,
) -> Json<ReleaseHostOffersResponse> {
    Json(ReleaseHostOffersResponse {
        error: b.hm.release_host_offers(&req.host_offers).await.err().map(wire),
    })
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn backend_server() -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend {
        rm: Arc::new(MemoryResourceManager::new()),
        hm: Arc::new(MemoryHostManager::new()),
    });
    let app = Router::new()
        .route(&format!("/{}", procedures::DEQUEUE_TASKS), post(dequeue))
        .route(&format!("/{}", procedures::SET_PLACEMENTS), post(set_placements))
        .route(&format!("/{}", procedures::ACQUIRE_HOST_OFFERS), post(acquire))
        .route(&format!("/{}", procedures::RELEASE_HOST_OFFERS), post(release))
        .with_state(backend.clone());
    (serve(app).await, backend)
}

fn constraint() -> Constraint {
    Constraint::new(ResourceVector::cpu_mem(1.0, 100.0), None).with_host_limit(2)
}

#[tokio::test]
async fn acquire_and_release_round_trip() {
    let (url, backend) = backend_server().await;
    backend.hm.add_host("h1", ResourceVector::cpu_mem(4.0, 400.0));
    backend.hm.add_host("h2", ResourceVector::cpu_mem(4.0, 400.0));
    let hm = HttpHostManager::new(&url, Duration::from_secs(5)).unwrap();

    let offers = hm.acquire_host_offers(&constraint()).await.unwrap();
    assert_eq!(offers.len(), 2);
    assert_eq!(backend.hm.last_constraint().unwrap().host_limit, 2);
    assert_eq!(backend.hm.leased_count(), 2);

    hm.release_host_offers(&offers).await.unwrap();
    assert_eq!(backend.hm.leased_count(), 0);
}

#[tokio::test]
async fn error_payload_keeps_its_kind() {
    let (url, backend) = backend_server().await;
    let hm = HttpHostManager::new(&url, Duration::from_secs(5)).unwrap();

    backend.hm.fail_next_acquire(1, ErrorKind::InvalidArgument);
    let err = hm.acquire_host_offers(&constraint()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert_eq!(err.procedure, procedures::ACQUIRE_HOST_OFFERS);

    let bogus = HostOffer::new("never-leased", "h9", ResourceVector::ZERO);
    let err = hm.release_host_offers(&[bogus]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);

    backend.rm.fail_next_set_placements(1, ErrorKind::Application);
    let rm = HttpResourceManager::new(&url, Duration::from_secs(5)).unwrap();
    let offer = HostOffer::new("o1", "h1", ResourceVector::cpu_mem(1.0, 1.0));
    let placement = offerpack_core::Placement::for_offer(&offer, vec!["t1".into()]);
    let err = rm.set_placements(&[placement]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Application);
    assert!(backend.rm.placements().is_empty());
}

#[tokio::test]
async fn server_error_status_is_unavailable() {
    let app = Router::new().route(
        &format!("/{}", procedures::DEQUEUE_TASKS),
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "draining") }),
    );
    let url = serve(app).await;
    let rm = HttpResourceManager::new(&url, Duration::from_secs(5)).unwrap();

    let err = rm.dequeue_tasks(10, Duration::from_millis(10)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unavailable);
    assert!(err.message.contains("draining"), "{}", err.message);
}

#[tokio::test]
async fn malformed_body_is_application_error() {
    let app = Router::new().route(
        &format!("/{}", procedures::ACQUIRE_HOST_OFFERS),
        post(|| async { "definitely not json" }),
    );
    let url = serve(app).await;
    let hm = HttpHostManager::new(&url, Duration::from_secs(5)).unwrap();

    let err = hm.acquire_host_offers(&constraint()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Application);
}

#[tokio::test]
async fn slow_server_times_out() {
    let app = Router::new().route(
        &format!("/{}", procedures::SET_PLACEMENTS),
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(SetPlacementsResponse::default())
        }),
    );
    let url = serve(app).await;
    let rm = HttpResourceManager::new(&url, Duration::from_millis(100)).unwrap();

    let offer = HostOffer::new("o1", "h1", ResourceVector::cpu_mem(1.0, 1.0));
    let placement = offerpack_core::Placement::for_offer(&offer, vec!["t1".into()]);
    let err = rm.set_placements(&[placement]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn refused_connection_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let hm = HttpHostManager::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    let err = hm.acquire_host_offers(&constraint()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unavailable);
}

#[tokio::test]
async fn dropped_reply_is_treated_like_a_timeout() {
    use tokio::io::AsyncReadExt;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        // Hang up without answering.
    });

    let rm = HttpResourceManager::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    let offer = HostOffer::new("o1", "h1", ResourceVector::cpu_mem(1.0, 1.0));
    let placement = offerpack_core::Placement::for_offer(&offer, vec!["t1".into()]);
    let err = rm.set_placements(&[placement]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(err.message.contains("interrupted"), "{}", err.message);
}

#[tokio::test]
async fn engine_places_tasks_over_http() {
    let (url, backend) = backend_server().await;
    for i in 0..3 {
        backend
            .hm
            .add_host(&format!("host-{i}"), ResourceVector::cpu_mem(4.0, 4000.0));
    }
    backend
        .rm
        .enqueue((0..10).map(|i| Task::new(format!("t{i}"), ResourceVector::cpu_mem(1.0, 100.0))));

    let settings = EngineSettings {
        task_dequeue_timeout: Duration::from_millis(100),
        backoff_interval: Duration::from_millis(50),
        rpc_timeout: Duration::from_secs(5),
        ..EngineSettings::default()
    };
    let engine = PlacementEngine::new(
        settings.clone(),
        Arc::new(HttpResourceManager::new(&url, settings.rpc_timeout).unwrap()),
        Arc::new(HttpHostManager::new(&url, settings.rpc_timeout).unwrap()),
        Arc::new(PlacementMetrics::new()),
    );

    engine.start();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while backend.rm.placed_tasks() < 10 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    engine.shutdown().await;

    assert_eq!(backend.rm.placed_tasks(), 10);
    let placements = backend.rm.placements();
    assert_eq!(placements.len(), 3);
    let stats = backend.hm.stats();
    assert_eq!(stats.acquired, placements.len() as u64 + stats.released);
    assert_eq!(backend.hm.leased_count(), placements.len());
}
