//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use balancer_proxy::config::{BackendConfig, ProxyConfig};
use balancer_proxy::http::HttpServer;
use balancer_proxy::lifecycle::Shutdown;
use balancer_proxy::load_balancer::LoadBalancer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const HEALTH_PATH: &str = "/ping";

/// What the mock saw of an inbound request.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub path: String,
    /// Request line and headers, lowercased.
    pub head: String,
}

impl MockRequest {
    pub fn is_probe(&self) -> bool {
        self.path == HEALTH_PATH
    }

    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head
            .lines()
            .find_map(|line| line.strip_prefix(&prefix).map(|v| v.trim().to_string()))
    }
}

/// A running mock backend.
pub struct MockBackend {
    pub addr: SocketAddr,
    /// Proxied requests served, probes excluded.
    pub hits: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Make the backend answer 503 to everything, probes included.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Stop accepting connections. New connects are refused.
    pub async fn kill(&self) {
        self.handle.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Start a mock backend that answers every request with `200 <name>`.
pub async fn start_mock_backend(name: &'static str) -> MockBackend {
    let healthy = Arc::new(AtomicBool::new(true));
    let hits = Arc::new(AtomicUsize::new(0));

    let (h, c) = (healthy.clone(), hits.clone());
    let (addr, handle) = serve(move |req: MockRequest| {
        let (h, c) = (h.clone(), c.clone());
        async move {
            if !h.load(Ordering::SeqCst) {
                return (503, "down".to_string());
            }
            if !req.is_probe() {
                c.fetch_add(1, Ordering::SeqCst);
            }
            (200, name.to_string())
        }
    })
    .await;

    MockBackend {
        addr,
        hits,
        healthy,
        handle,
    }
}

/// Start a programmable mock backend with async support.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    serve(f).await
}

async fn serve<F, Fut>(f: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        handle_connection(socket, f.as_ref()).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, handle)
}

async fn handle_connection<F, Fut>(mut socket: TcpStream, f: &F)
where
    F: Fn(MockRequest) -> Fut,
    Fut: Future<Output = (u16, String)>,
{
    let Some(req) = read_head(&mut socket).await else {
        return;
    };

    let (status, body) = f(req).await;
    let response = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

pub async fn read_head(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buf).to_ascii_lowercase();
    let path = head.split_whitespace().nth(1)?.to_string();
    Some(MockRequest { path, head })
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Config pointing at `backends` with a fast probe loop.
pub fn proxy_config(backends: &[String]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.shutdown_timeout_secs = 1;
    config.backends = backends.iter().map(|u| BackendConfig::new(u.as_str())).collect();
    config.balancer.health_check_interval_ms = 50;
    config.balancer.health_check_timeout_ms = 500;
    config.timeouts.connect_ms = 500;
    config.timeouts.upstream_ms = 2000;
    config
}

/// A proxy running in the background.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub balancer: Arc<LoadBalancer>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("proxy did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

/// Start the proxy on an ephemeral port.
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, shutdown.clone()).unwrap();
    let balancer = server.balancer();
    let handle = tokio::spawn(server.run(listener));

    TestProxy {
        addr,
        balancer,
        shutdown,
        handle,
    }
}

/// HTTP client that never pools or goes through a system proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Wait until `cond` holds, polling every 10ms, for at most `limit`.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
