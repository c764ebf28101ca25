//! Throwaway HTTP/1.1 backend for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opsdash::query::{QueryClient, QueryClientConfig, RetryPolicy};
use opsdash::{OpsApi, ResourceClient};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct Hit {
  pub method: String,
  /// Path including the query string
  pub target: String,
  pub cookie: Option<String>,
  /// Header names lowercased
  pub headers: Vec<(String, String)>,
  pub body: String,
}

impl Hit {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, v)| v.as_str())
  }
}

/// Canned responses for one method and path. The last response repeats.
#[derive(Debug, Clone)]
pub struct Route {
  method: &'static str,
  path: &'static str,
  responses: VecDeque<(u16, String)>,
  delay: Duration,
  truncate: bool,
}

impl Route {
  pub fn new(method: &'static str, path: &'static str) -> Self {
    Self {
      method,
      path,
      responses: VecDeque::new(),
      delay: Duration::ZERO,
      truncate: false,
    }
  }

  pub fn respond(mut self, status: u16, body: impl Into<String>) -> Self {
    self.responses.push_back((status, body.into()));
    self
  }

  pub fn delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// Announce a longer body than is sent, then close the connection.
  pub fn truncate_body(mut self) -> Self {
    self.truncate = true;
    self
  }

  fn matches(&self, method: &str, target: &str) -> bool {
    let path = if self.path.contains('?') {
      target
    } else {
      target.split('?').next().unwrap_or(target)
    };
    self.method == method && self.path == path
  }

  fn next_response(&mut self) -> (u16, String) {
    if self.responses.len() > 1 {
      self.responses.pop_front().unwrap()
    } else {
      self
        .responses
        .front()
        .cloned()
        .unwrap_or((204, String::new()))
    }
  }
}

pub struct TestServer {
  pub url: String,
  hits: Arc<Mutex<Vec<Hit>>>,
}

impl TestServer {
  pub async fn start(routes: Vec<Route>) -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/api", listener.local_addr().unwrap());
    let hits = Arc::new(Mutex::new(Vec::new()));
    let routes = Arc::new(Mutex::new(routes));

    let server_hits = hits.clone();
    tokio::spawn(async move {
      loop {
        let Ok((stream, _)) = listener.accept().await else {
          break;
        };
        let hits = server_hits.clone();
        let routes = routes.clone();
        tokio::spawn(async move {
          let _ = handle(stream, hits, routes).await;
        });
      }
    });

    Self { url, hits }
  }

  pub fn requests(&self) -> Vec<Hit> {
    self.hits.lock().unwrap().clone()
  }

  /// Number of requests whose path (without query) is `path`.
  pub fn hits(&self, method: &str, path: &str) -> usize {
    self
      .requests()
      .iter()
      .filter(|h| h.method == method && h.target.split('?').next() == Some(path))
      .count()
  }

  pub fn client(&self) -> ResourceClient {
    ResourceClient::connect(&self.url, Some("s3cr3t"), "sessionid", Duration::from_secs(5)).unwrap()
  }

  /// API over this server with fast retries and no persistence.
  pub fn api(&self) -> OpsApi {
    let config = QueryClientConfig {
      retry: RetryPolicy::new(3).with_backoff(Duration::from_millis(5), Duration::from_millis(20)),
      ..QueryClientConfig::default()
    };
    OpsApi::new(self.client(), QueryClient::new(config))
  }
}

async fn handle(
  stream: TcpStream,
  hits: Arc<Mutex<Vec<Hit>>>,
  routes: Arc<Mutex<Vec<Route>>>,
) -> std::io::Result<()> {
  let mut reader = BufReader::new(stream);

  let mut request_line = String::new();
  reader.read_line(&mut request_line).await?;
  let mut parts = request_line.split_whitespace();
  let method = parts.next().unwrap_or_default().to_string();
  let target = parts.next().unwrap_or_default().to_string();

  let mut content_length = 0usize;
  let mut cookie = None;
  let mut headers = Vec::new();
  loop {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let line = line.trim_end();
    if line.is_empty() {
      break;
    }
    if let Some((name, value)) = line.split_once(':') {
      let name = name.to_ascii_lowercase();
      let value = value.trim();
      match name.as_str() {
        "content-length" => content_length = value.parse().unwrap_or(0),
        "cookie" => cookie = Some(value.to_string()),
        _ => {}
      }
      headers.push((name, value.to_string()));
    }
  }

  let mut body = vec![0u8; content_length];
  reader.read_exact(&mut body).await?;

  hits.lock().unwrap().push(Hit {
    method: method.clone(),
    target: target.clone(),
    cookie,
    headers,
    body: String::from_utf8_lossy(&body).into_owned(),
  });

  let matched = {
    let mut routes = routes.lock().unwrap();
    routes
      .iter_mut()
      .find(|r| r.matches(&method, &target))
      .map(|r| (r.next_response(), r.delay, r.truncate))
  };
  let ((status, body), delay, truncate) = matched.unwrap_or((
    (404, r#"{"detail":"Not found."}"#.to_string()),
    Duration::ZERO,
    false,
  ));

  if !delay.is_zero() {
    tokio::time::sleep(delay).await;
  }

  let response = format!(
    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
    status,
    if truncate { body.len() + 64 } else { body.len() },
    body
  );
  let mut stream = reader.into_inner();
  stream.write_all(response.as_bytes()).await?;
  stream.shutdown().await
}
