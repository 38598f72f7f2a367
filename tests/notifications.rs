//! Callback delivery against a local HTTP receiver

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use commonpot::db::callbacks::CreateCallbackInput;
use commonpot::db::users::CreateUserInput;
use commonpot::services::NotifierStats;
use commonpot::{Config, Gate, LedgerDb, Notifier, Services, Thresholds};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

/// Records every requested path and answers with a fixed status
async fn start_receiver(status: StatusCode) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let recorded = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let recorded = recorded.clone();
                    async move {
                        recorded.lock().unwrap().push(req.uri().path().to_string());
                        let mut resp = Response::new(Full::new(Bytes::new()));
                        *resp.status_mut() = status;
                        Ok::<_, Infallible>(resp)
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, seen)
}

fn start_services() -> Services {
    let db = Arc::new(LedgerDb::open_in_memory().unwrap());
    let (notifier, worker) = Notifier::new(Config::default().notifier);
    worker.spawn();
    Services::new(
        db,
        Arc::new(Gate::new()),
        Arc::new(notifier),
        Thresholds::default(),
    )
}

/// Wait until the worker has attempted `attempts` deliveries
async fn settle(services: &Services, attempts: u64) -> NotifierStats {
    for _ in 0..100 {
        let stats = services.notifier_stats();
        if stats.delivered + stats.failed >= attempts {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    services.notifier_stats()
}

fn register(services: &Services, base: String) {
    services
        .callbacks
        .create(&CreateCallbackInput { base, app_id: None })
        .unwrap();
}

fn create_user(services: &Services, name: &str) -> i64 {
    services
        .users
        .create(&CreateUserInput {
            name: Some(name.to_string()),
            ..Default::default()
        })
        .unwrap()
        .value
        .id
}

#[tokio::test]
async fn test_committed_changes_reach_callbacks() {
    let (addr, seen) = start_receiver(StatusCode::OK).await;
    let services = start_services();

    let app = services.callbacks.create_application("dashboard").unwrap();
    services
        .callbacks
        .create(&CreateCallbackInput {
            base: format!("http://{}/hook/", addr),
            app_id: Some(app.value.id),
        })
        .unwrap();
    let user_id = create_user(&services, "alice");

    let stats = settle(&services, 4).await;
    assert_eq!(stats.delivered, 4);
    assert_eq!(stats.failed, 0);

    let paths = seen.lock().unwrap().clone();
    assert_eq!(
        paths,
        vec![
            "/hook/refresh".to_string(),
            "/hook/create/callback/1".to_string(),
            "/hook/refresh".to_string(),
            format!("/hook/create/user/{}", user_id),
        ]
    );
}

#[tokio::test]
async fn test_non_ok_answers_count_as_failed() {
    let (addr, seen) = start_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    let services = start_services();

    register(&services, format!("http://{}", addr));
    create_user(&services, "bob");

    let stats = settle(&services, 4).await;
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.failed, 4);
    assert_eq!(seen.lock().unwrap().len(), 4);

    // The ledger itself is unaffected
    assert_eq!(services.users.list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_callback_does_not_block_writes() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let services = start_services();

    register(&services, format!("http://{}", addr));
    create_user(&services, "carol");
    create_user(&services, "dave");

    let stats = settle(&services, 6).await;
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.failed, 6);
    assert_eq!(stats.dropped, 0);
    assert_eq!(services.users.list().unwrap().len(), 2);
}

#[tokio::test]
async fn test_deleted_callback_stops_receiving() {
    let (addr, seen) = start_receiver(StatusCode::OK).await;
    let services = start_services();

    let callback = services
        .callbacks
        .create(&CreateCallbackInput {
            base: format!("http://{}", addr),
            app_id: None,
        })
        .unwrap();
    services
        .callbacks
        .delete(
            &commonpot::Precondition::tag(&callback.etag),
            callback.value.id,
        )
        .unwrap();
    create_user(&services, "erin");

    // Only the creation announcement went out
    settle(&services, 2).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(services.notifier_stats().delivered, 2);
    assert_eq!(seen.lock().unwrap().len(), 2);
}
