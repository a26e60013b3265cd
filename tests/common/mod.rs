//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use decap_gateway::config::{GatewayConfig, OAuthMode};
use decap_gateway::lifecycle::{startup, Shutdown, StartupError};
use decap_gateway::oauth::OAuthBridge;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), StartupError>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("gateway did not stop")
            .expect("gateway task panicked")
            .expect("gateway returned an error");
    }
}

/// Baseline config for tests: loopback, development cookies, external OAuth.
pub fn test_config(oauth_port: u16) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.environment = "development".to_string();
    config.listener.host = "127.0.0.1".to_string();
    config.listener.port = 0;
    config.oauth.mode = OAuthMode::External;
    config.oauth.port = oauth_port;
    config.oauth.timeout_secs = 1;
    config
}

pub async fn spawn_gateway(config: GatewayConfig, bridge: Arc<dyn OAuthBridge>) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let handle = tokio::spawn(startup::serve_with_bridge(
        config,
        listener,
        bridge,
        shutdown.clone(),
    ));

    TestGateway {
        addr,
        shutdown,
        handle,
    }
}

/// A loopback port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .unwrap()
}

/// Start a mock OAuth helper that answers every request with `status` and a
/// body echoing the request line plus forwarding headers.
pub async fn start_echo_upstream(status: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let body = echo_body(&head);
                let response = format!(
                    "HTTP/1.1 {} Echo\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\nKeep-Alive: timeout=5\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a mock helper that accepts connections and never answers.
pub async fn start_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    addr
}

/// Start a mock helper that sends a head and part of the body, then goes quiet.
pub async fn start_stalling_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut socket, _)) = listener.accept().await {
            read_head(&mut socket).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 100\r\n\r\n<html>")
                .await;
            held.push(socket);
        }
    });

    addr
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn echo_body(head: &str) -> String {
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let mut out = vec![request_line];
    for line in lines {
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("x-forwarded-")
            || lower.starts_with("x-request-id")
            || lower.starts_with("host:")
            || lower.starts_with("connection:")
        {
            out.push(lower);
        }
    }
    out.join("\n")
}

/// Create `<root>/app/{dist,public}` and `<root>/config.yml`.
pub fn asset_layout(root: &Path) -> std::path::PathBuf {
    let app = root.join("app");
    fs::create_dir_all(app.join("dist")).unwrap();
    fs::create_dir_all(app.join("public/images")).unwrap();
    fs::write(app.join("dist/decap-cms.js"), b"/* bundle */ window.CMS_MANUAL_INIT = false;\n").unwrap();
    fs::write(app.join("dist/decap-cms.js.map"), b"{\"version\":3,\"sources\":[]}").unwrap();
    fs::write(app.join("public/index.html"), b"<!doctype html><title>Content Manager</title>").unwrap();
    fs::write(app.join("public/images/logo.bin"), [0u8, 159, 146, 150, 255]).unwrap();
    fs::write(root.join("config.yml"), b"backend:\n  name: github\n  repo: acme/site\n").unwrap();
    fs::write(root.join("private.txt"), b"outside the public root").unwrap();
    app
}
