//! Minimal HTTP/1.1 server for exercising the client against canned responses
//!
//! Built for tests only, here and in downstream crates via the `test-support` feature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub struct TestServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    /// Serve `routes` (path → status, body); unknown paths answer 404
    pub async fn start(routes: Vec<(&str, u16, Vec<u8>)>) -> Self {
        let routes: Vec<(String, u16, Vec<u8>)> = routes
            .into_iter()
            .map(|(path, status, body)| (path.to_string(), status, body))
            .collect();
        Self::start_with(move |_| routes).await
    }

    /// Like [`TestServer::start`], with routes built from the server's base URL
    pub async fn start_with(
        routes: impl FnOnce(&str) -> Vec<(String, u16, Vec<u8>)>,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let routes: Arc<HashMap<String, (u16, Vec<u8>)>> = Arc::new(
            routes(&base_url)
                .into_iter()
                .map(|(path, status, body)| (path, (status, body)))
                .collect(),
        );
        let requests = Arc::new(Mutex::new(Vec::new()));

        let captured = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                let captured = captured.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        head.extend_from_slice(&chunk[..n]);
                        if head.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let head = String::from_utf8_lossy(&head).to_string();
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    captured.lock().unwrap().push(head);

                    let (status, body) = routes
                        .get(&path)
                        .cloned()
                        .unwrap_or((404, b"not found".to_vec()));
                    let response = format!(
                        "HTTP/1.1 {} {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        status,
                        reason(status),
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { base_url, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Raw request heads received so far, lowercased
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.to_lowercase())
            .collect()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
