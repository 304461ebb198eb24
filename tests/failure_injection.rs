//! Failure injection tests for the load balancer.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::io::AsyncWriteExt;

mod common;

use common::{client, eventually, proxy_config, start_mock_backend, start_programmable_backend, start_proxy};

async fn tally(proxy: &common::TestProxy, n: usize) -> HashMap<String, usize> {
    let client = client();
    let mut seen = HashMap::new();
    for _ in 0..n {
        let resp = client.get(proxy.url("/work")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        *seen.entry(resp.text().await.unwrap()).or_insert(0) += 1;
    }
    seen
}

#[tokio::test]
async fn test_no_alive_backend_returns_503() {
    let dead = format!("http://{}", common::unused_addr().await);
    let proxy = start_proxy(proxy_config(&[dead])).await;

    let resp = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.text().await.unwrap(), "Service unavailable");
    assert_eq!(proxy.balancer.alive_count(), 0);

    proxy.stop().await;
}

#[tokio::test]
async fn test_health_transitions_drive_rotation() {
    let a = start_mock_backend("A").await;
    let b = start_mock_backend("B").await;
    let proxy = start_proxy(proxy_config(&[a.url(), b.url()])).await;
    let balancer = proxy.balancer.clone();

    assert!(eventually(Duration::from_secs(2), || balancer.alive_count() == 2).await);
    let seen = tally(&proxy, 4).await;
    assert_eq!(seen.get("A"), Some(&2));
    assert_eq!(seen.get("B"), Some(&2));

    b.set_healthy(false);
    assert!(eventually(Duration::from_secs(2), || balancer.alive_count() == 1).await);
    let seen = tally(&proxy, 4).await;
    assert_eq!(seen.get("A"), Some(&4));
    assert_eq!(seen.get("B"), None);

    b.set_healthy(true);
    assert!(eventually(Duration::from_secs(2), || balancer.alive_count() == 2).await);
    let seen = tally(&proxy, 4).await;
    assert_eq!(seen.get("A"), Some(&2));
    assert_eq!(seen.get("B"), Some(&2));

    proxy.stop().await;
}

#[tokio::test]
async fn test_fast_failover_on_connection_refused() {
    let a = start_mock_backend("A").await;
    let b = start_mock_backend("B").await;
    let mut config = proxy_config(&[a.url(), b.url()]);
    // Probes must not be the ones to notice.
    config.balancer.health_check_interval_ms = 60_000;
    let proxy = start_proxy(config).await;
    let balancer = proxy.balancer.clone();
    assert!(eventually(Duration::from_secs(2), || balancer.alive_count() == 2).await);

    b.kill().await;

    let client = client();
    let mut statuses = Vec::new();
    for _ in 0..2 {
        let resp = client.get(proxy.url("/work")).send().await.unwrap();
        statuses.push(resp.status());
    }
    assert!(statuses.contains(&StatusCode::BAD_GATEWAY));
    assert_eq!(balancer.alive_count(), 1);
    assert!(!balancer.backends()[1].is_alive());

    let seen = tally(&proxy, 3).await;
    assert_eq!(seen.get("A"), Some(&3));

    proxy.stop().await;
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let (addr, _handle) = start_programmable_backend(|req| async move {
        if !req.is_probe() {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        (200, "late".to_string())
    })
    .await;

    let mut config = proxy_config(&[format!("http://{}", addr)]);
    config.balancer.health_check_interval_ms = 60_000;
    config.timeouts.upstream_ms = 200;
    let proxy = start_proxy(config).await;
    let balancer = proxy.balancer.clone();
    assert!(eventually(Duration::from_secs(2), || balancer.alive_count() == 1).await);

    let resp = client().get(proxy.url("/slow")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(resp.text().await.unwrap(), "Upstream timeout");
    assert_eq!(balancer.alive_count(), 0);

    proxy.stop().await;
}

#[tokio::test]
async fn test_stalled_body_is_aborted() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Some(req) = common::read_head(&mut socket).await else { return };
                if req.is_probe() {
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                    return;
                }
                // Promise 100 bytes, send 7, then go quiet.
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                    .await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });

    let mut config = proxy_config(&[format!("http://{}", addr)]);
    config.balancer.health_check_interval_ms = 60_000;
    config.timeouts.upstream_ms = 300;
    let proxy = start_proxy(config).await;
    let balancer = proxy.balancer.clone();
    assert!(eventually(Duration::from_secs(2), || balancer.alive_count() == 1).await);

    let resp = client().get(proxy.url("/stream")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = tokio::time::timeout(Duration::from_secs(3), resp.bytes())
        .await
        .expect("stalled body was never cut off");
    assert!(body.is_err());
    assert!(
        eventually(Duration::from_secs(1), || balancer.backends()[0].active_connections() == 0).await
    );

    proxy.stop().await;
}

#[tokio::test]
async fn test_backend_error_status_is_relayed() {
    let (addr, _handle) = start_programmable_backend(|req| async move {
        if req.is_probe() {
            (200, "pong".to_string())
        } else {
            (500, "boom".to_string())
        }
    })
    .await;

    let mut config = proxy_config(&[format!("http://{}", addr)]);
    config.balancer.health_check_interval_ms = 60_000;
    let proxy = start_proxy(config).await;
    let balancer = proxy.balancer.clone();
    assert!(eventually(Duration::from_secs(2), || balancer.alive_count() == 1).await);

    let resp = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.text().await.unwrap(), "boom");
    // A status from the backend is not a transport failure.
    assert_eq!(balancer.alive_count(), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn test_connection_counts_return_to_zero() {
    let a = start_mock_backend("A").await;
    let b = start_mock_backend("B").await;
    let proxy = start_proxy(proxy_config(&[a.url(), b.url()])).await;
    let balancer = proxy.balancer.clone();
    assert!(eventually(Duration::from_secs(2), || balancer.alive_count() == 2).await);

    let client = client();
    let requests = (0..20).map(|_| {
        let client = client.clone();
        let url = proxy.url("/work");
        async move { client.get(url).send().await.unwrap().text().await.unwrap() }
    });
    futures_util::future::join_all(requests).await;

    assert_eq!(a.hits() + b.hits(), 20);
    assert!(
        eventually(Duration::from_secs(1), || {
            balancer.backends().iter().all(|b| b.active_connections() == 0)
        })
        .await
    );

    proxy.stop().await;
}

#[tokio::test]
async fn test_shutdown_stops_server() {
    let a = start_mock_backend("A").await;
    let proxy = start_proxy(proxy_config(&[a.url()])).await;
    let balancer = proxy.balancer.clone();
    assert!(eventually(Duration::from_secs(2), || balancer.alive_count() == 1).await);

    let addr = proxy.addr;
    proxy.stop().await;

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
