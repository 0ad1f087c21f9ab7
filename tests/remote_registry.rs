//! Registration and discovery through the networked coordination service

use chorano::coordination::{Coordination, RemoteSession};
use chorano::{CoordService, MembershipTracker, Registrar, RegistryView};
use std::sync::Arc;
use std::time::Duration;

const ROOT: &str = "/chorano";
const TIMEOUT: Duration = Duration::from_secs(3);

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_remote_sessions_register_and_expire() {
    let service = CoordService::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = service.local_addr().unwrap().to_string();
    let namespace = service.namespace();
    let service_task = tokio::spawn(service.serve());

    let (server_session, _server_events) = RemoteSession::connect(&addr, TIMEOUT).await.unwrap();
    let registrar = Registrar::new(Arc::new(server_session));
    let path = registrar.register(ROOT, "localhost:8111").await.unwrap();
    assert_eq!(path, "/chorano/x_0000000000");

    let (client_session, events) = RemoteSession::connect(&addr, TIMEOUT).await.unwrap();
    let client_session = Arc::new(client_session);
    let tracker = MembershipTracker::new(Arc::clone(&client_session), ROOT, RegistryView::new());
    let report = tracker.refresh().await.unwrap();
    assert_eq!(report.added, 1);
    let view = tracker.view().clone();
    let watcher = tracker.spawn(events);
    assert_eq!(view.get(&path).as_deref(), Some("localhost:8111"));

    let (late_session, _late_events) = RemoteSession::connect(&addr, TIMEOUT).await.unwrap();
    let late = Registrar::new(Arc::new(late_session));
    late.register(ROOT, "localhost:8112").await.unwrap();
    wait_until("second server", || view.len() == 2).await;

    // closing the connection ends the session
    drop(registrar);
    wait_until("first server to expire", || view.len() == 1).await;
    assert!(!view.contains(&path));
    assert!(client_session.exists(ROOT).await.unwrap());

    drop(late);
    wait_until("registry to empty", || view.is_empty()).await;
    wait_until("server sessions to close", || namespace.session_count() == 1).await;

    watcher.abort();
    service_task.abort();
}

#[tokio::test]
async fn test_remote_errors_map_to_registry_errors() {
    let service = CoordService::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = service.local_addr().unwrap().to_string();
    let service_task = tokio::spawn(service.serve());

    let (session, _events) = RemoteSession::connect(&addr, TIMEOUT).await.unwrap();
    let tracker = MembershipTracker::new(Arc::new(session), ROOT, RegistryView::new());
    let result = tracker.refresh().await;
    assert!(matches!(result, Err(chorano::Error::RegistryRead { .. })));

    service_task.abort();
}

#[tokio::test]
async fn test_connect_to_missing_service_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    match RemoteSession::connect(&addr, TIMEOUT).await {
        Err(e) => assert!(e.is_fatal()),
        Ok(_) => panic!("connect should fail with nothing listening"),
    }
}
