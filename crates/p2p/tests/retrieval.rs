use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use peershare_files::Fingerprint;
use peershare_p2p::{FileServer, RetrievalConfig, RetrievalError, Retriever};
use peershare_registry::{HolderId, SearchGroup, SearchPeer};
use serde::Deserialize;
use tokio::sync::{oneshot, watch};

#[derive(Clone, Copy)]
enum Behaviour {
    Serve(&'static [u8]),
    Status(StatusCode),
    /// Send headers, then stall before the body.
    Stall,
    /// Trickle the body forever.
    Trickle,
}

#[derive(Clone)]
struct MockState {
    behaviour: Behaviour,
    hits: Arc<AtomicUsize>,
    names: Arc<parking_lot::Mutex<Vec<String>>>,
}

#[derive(Deserialize)]
struct Params {
    name: String,
}

struct MockPeer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    names: Arc<parking_lot::Mutex<Vec<String>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockPeer {
    async fn start(behaviour: Behaviour) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock peer listener");
        let addr = listener.local_addr().expect("listener addr lookup");
        let hits = Arc::new(AtomicUsize::new(0));
        let names = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let app = Router::new()
            .route("/download", get(download))
            .with_state(MockState {
                behaviour,
                hits: hits.clone(),
                names: names.clone(),
            });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            let server = axum::serve(listener, app);
            let graceful = server.with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            let _ = graceful.await;
        });

        Self {
            addr,
            hits,
            names,
            shutdown: Some(shutdown_tx),
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn download(State(state): State<MockState>, Query(params): Query<Params>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.names.lock().push(params.name);

    match state.behaviour {
        Behaviour::Serve(bytes) => bytes.into_response(),
        Behaviour::Status(status) => status.into_response(),
        Behaviour::Stall => {
            let stream = futures::stream::once(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, std::io::Error>(vec![0u8; 4])
            });
            Body::from_stream(stream).into_response()
        }
        Behaviour::Trickle => {
            let stream = futures::stream::unfold((), |_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Some((Ok::<_, std::io::Error>(vec![1u8; 8]), ()))
            });
            Body::from_stream(stream).into_response()
        }
    }
}

fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("allocate ephemeral port");
    listener.local_addr().expect("extract ephemeral addr")
}

fn peer(label: &str, addr: SocketAddr, public_url: Option<String>) -> SearchPeer {
    SearchPeer {
        holder_id: HolderId(1),
        ip_address: addr.ip(),
        port: addr.port(),
        public_url,
        holder_label: label.to_string(),
        last_heartbeat: Utc::now(),
    }
}

fn group(name: &str, size: u64, peers: Vec<SearchPeer>) -> SearchGroup {
    SearchGroup {
        fingerprint: Fingerprint::from_hex(&"a".repeat(64)).expect("valid hex"),
        display_name: name.to_string(),
        size_bytes: size,
        peers,
    }
}

fn fast_config() -> RetrievalConfig {
    RetrievalConfig {
        direct_timeout: Duration::from_millis(300),
        public_timeout: Duration::from_millis(600),
    }
}

fn no_progress(_: u64) {}

#[tokio::test]
async fn end_to_end_download_from_direct_endpoint() {
    let share = tempfile::tempdir().expect("tempdir");
    std::fs::write(share.path().join("x.txt"), b"0123456789").expect("write file");
    let server = FileServer::start(share.path(), "127.0.0.1:0".parse().expect("addr"))
        .await
        .expect("file server starts");

    let dest = tempfile::tempdir().expect("tempdir");
    let target = dest.path().join("incoming");
    let retriever = Retriever::new(RetrievalConfig::default()).expect("client");
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_cb = seen.clone();
    let progress = move |bytes: u64| {
        seen_in_cb.store(bytes as usize, Ordering::SeqCst);
    };

    let path = retriever
        .retrieve(
            &group("x.txt", 10, vec![peer("alice", server.local_addr(), None)]),
            &target,
            &progress,
            None,
        )
        .await
        .expect("download succeeds");

    assert_eq!(path, target.join("x.txt"));
    assert_eq!(std::fs::read(&path).expect("read result"), b"0123456789");
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    assert!(!target.join(".x.txt.part").exists());

    server.stop().await;
}

#[tokio::test]
async fn dead_direct_falls_back_to_public_and_stops() {
    let public = MockPeer::start(Behaviour::Serve(b"from tunnel")).await;
    let second = MockPeer::start(Behaviour::Serve(b"second holder")).await;
    let dest = tempfile::tempdir().expect("tempdir");

    let peers = vec![
        peer("alice", dead_addr(), Some(format!("127.0.0.1:{}", public.addr.port()))),
        peer("bob", second.addr, None),
    ];
    let retriever = Retriever::new(fast_config()).expect("client");
    let path = retriever
        .retrieve(&group("report one.pdf", 11, peers), dest.path(), &no_progress, None)
        .await
        .expect("download succeeds");

    assert_eq!(std::fs::read(path).expect("read result"), b"from tunnel");
    assert_eq!(public.hits(), 1);
    assert_eq!(second.hits(), 0);
    assert_eq!(public.names.lock().as_slice(), ["report one.pdf".to_string()]);
}

#[tokio::test]
async fn failures_move_on_to_next_holder() {
    let broken = MockPeer::start(Behaviour::Status(StatusCode::NOT_FOUND)).await;
    let stalled = MockPeer::start(Behaviour::Stall).await;
    let good = MockPeer::start(Behaviour::Serve(b"ok")).await;
    let dest = tempfile::tempdir().expect("tempdir");

    let peers = vec![
        peer("broken", broken.addr, None),
        peer("stalled", stalled.addr, None),
        peer("good", good.addr, None),
    ];
    let retriever = Retriever::new(fast_config()).expect("client");
    let path = retriever
        .retrieve(&group("x.txt", 2, peers), dest.path(), &no_progress, None)
        .await
        .expect("download succeeds");

    assert_eq!(std::fs::read(path).expect("read result"), b"ok");
    assert_eq!(broken.hits(), 1);
    assert_eq!(stalled.hits(), 1);
    assert_eq!(good.hits(), 1);
}

#[tokio::test]
async fn all_paths_failing_reports_every_attempt() {
    let broken = MockPeer::start(Behaviour::Status(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let dest = tempfile::tempdir().expect("tempdir");

    let peers = vec![
        peer("alice", dead_addr(), Some(format!("http://{}", dead_addr()))),
        peer("bob", broken.addr, None),
    ];
    let retriever = Retriever::new(fast_config()).expect("client");
    let err = retriever
        .retrieve(&group("x.txt", 1, peers), dest.path(), &no_progress, None)
        .await
        .expect_err("every path fails");

    match err {
        RetrievalError::AllPathsFailed { attempts } => {
            assert_eq!(attempts.len(), 3);
            assert_eq!(attempts[0].holder_label, "alice");
            assert_eq!(attempts[2].holder_label, "bob");
            assert!(attempts[2].reason.contains("500"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!dest.path().join("x.txt").exists());
}

#[tokio::test]
async fn cancellation_interrupts_transfer() {
    let trickle = MockPeer::start(Behaviour::Trickle).await;
    let dest = tempfile::tempdir().expect("tempdir");
    let (cancel_tx, cancel_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = cancel_tx.send(true);
    });

    let retriever = Retriever::new(fast_config()).expect("client");
    let err = retriever
        .retrieve(
            &group("x.txt", 1_000_000, vec![peer("slow", trickle.addr, None)]),
            dest.path(),
            &no_progress,
            Some(cancel_rx),
        )
        .await
        .expect_err("cancelled");

    assert!(matches!(err, RetrievalError::Cancelled));
    assert!(!dest.path().join("x.txt").exists());
}

#[tokio::test]
async fn unsafe_display_name_is_refused() {
    let dest = tempfile::tempdir().expect("tempdir");
    let retriever = Retriever::new(fast_config()).expect("client");
    let err = retriever
        .retrieve(
            &group("../escape.txt", 1, vec![peer("alice", dead_addr(), None)]),
            dest.path(),
            &no_progress,
            None,
        )
        .await
        .expect_err("refused");
    assert!(matches!(err, RetrievalError::InvalidName(_)));
}
