//! REST client for the operations backend.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::multipart::Form;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::error::AppError;

use super::envelope::normalize_list;

/// Request payload.
pub enum RequestBody {
  Json(Value),
  Multipart(Form),
}

/// HTTP client that authenticates every request with the session cookie.
#[derive(Clone)]
pub struct ResourceClient {
  http: reqwest::Client,
  base_url: Url,
}

impl ResourceClient {
  pub fn new(config: &Config) -> Result<Self> {
    let session = match Config::get_session() {
      Ok(session) => Some(session),
      Err(e) => {
        warn!(error = %e, "no session cookie configured, requests are anonymous");
        None
      }
    };

    Self::connect(
      &config.backend.url,
      session.as_deref(),
      &config.backend.session_cookie,
      config.request_timeout(),
    )
  }

  /// Build a client for `base_url`, sending `cookie_name=session` when a
  /// session is given.
  pub fn connect(
    base_url: &str,
    session: Option<&str>,
    cookie_name: &str,
    timeout: Duration,
  ) -> Result<Self> {
    let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
      .map_err(|e| eyre!("Invalid backend URL {}: {}", base_url, e))?;

    let mut headers = HeaderMap::new();
    if let Some(session) = session {
      let mut cookie = HeaderValue::from_str(&format!("{}={}", cookie_name, session))
        .map_err(|e| eyre!("Invalid session cookie: {}", e))?;
      cookie.set_sensitive(true);
      headers.insert(COOKIE, cookie);
    }

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Issue a request and decode the JSON response into `T`.
  ///
  /// Non-2xx responses become an [`AppError`] carrying the status; requests
  /// that get no response at all fail with status 0.
  pub async fn request<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: Option<RequestBody>,
    headers: Option<HeaderMap>,
  ) -> Result<T, AppError> {
    self
      .send::<T, ()>(method, path, None, body, headers)
      .await
  }

  pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
    self.request(Method::GET, path, None, None).await
  }

  pub async fn get_with<T, Q>(&self, path: &str, query: &Q) -> Result<T, AppError>
  where
    T: DeserializeOwned,
    Q: Serialize + ?Sized,
  {
    self.send(Method::GET, path, Some(query), None, None).await
  }

  /// GET a list endpoint, accepting any of the known envelope shapes.
  pub async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, AppError> {
    let value: Value = self.get(path).await?;
    normalize_list(value)
  }

  pub async fn get_list_with<T, Q>(&self, path: &str, query: &Q) -> Result<Vec<T>, AppError>
  where
    T: DeserializeOwned,
    Q: Serialize + ?Sized,
  {
    let value: Value = self.get_with(path, query).await?;
    normalize_list(value)
  }

  pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, AppError>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    self
      .request(Method::POST, path, Some(json_body(body)?), None)
      .await
  }

  pub async fn post_multipart<T: DeserializeOwned>(
    &self,
    path: &str,
    form: Form,
  ) -> Result<T, AppError> {
    self
      .request(Method::POST, path, Some(RequestBody::Multipart(form)), None)
      .await
  }

  pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, AppError>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    self
      .request(Method::PATCH, path, Some(json_body(body)?), None)
      .await
  }

  pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, AppError>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    self
      .request(Method::PUT, path, Some(json_body(body)?), None)
      .await
  }

  pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
    self.request(Method::DELETE, path, None, None).await
  }

  fn url(&self, path: &str) -> Result<Url, AppError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| AppError::validation(format!("invalid request path '{}': {}", path, e)))
  }

  async fn send<T, Q>(
    &self,
    method: Method,
    path: &str,
    query: Option<&Q>,
    body: Option<RequestBody>,
    headers: Option<HeaderMap>,
  ) -> Result<T, AppError>
  where
    T: DeserializeOwned,
    Q: Serialize + ?Sized,
  {
    let url = self.url(path)?;
    let mut request = self.http.request(method.clone(), url);
    if let Some(query) = query {
      request = request.query(query);
    }
    if let Some(headers) = headers {
      request = request.headers(headers);
    }
    request = match body {
      Some(RequestBody::Json(value)) => request.json(&value),
      Some(RequestBody::Multipart(form)) => request.multipart(form),
      None => request,
    };

    debug!(method = %method, path, "sending request");
    let response = request.send().await.map_err(|e| {
      if e.is_builder() {
        AppError::validation(format!("{} {}: {}", method, path, e))
      } else {
        AppError::transport(format!("{} {}: {}", method, path, e))
      }
    })?;

    let status = response.status();
    if !status.is_success() {
      // The status is authoritative even when the body cannot be read.
      let body = match response.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
          debug!(method = %method, path, error = %e, "failed to read error body");
          Vec::new()
        }
      };
      let err = AppError::from_response(status, &body);
      warn!(method = %method, path, status = status.as_u16(), message = err.message(), "request failed");
      return Err(err);
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| AppError::transport(format!("{} {}: failed to read body: {}", method, path, e)))?;
    decode_body(&bytes)
  }
}

fn json_body<B: Serialize + ?Sized>(body: &B) -> Result<RequestBody, AppError> {
  serde_json::to_value(body)
    .map(RequestBody::Json)
    .map_err(|e| AppError::validation(format!("request body is not serializable: {}", e)))
}

/// Decode a 2xx body. An empty body (e.g. 204) decodes as JSON `null`.
fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return serde_json::from_value(Value::Null)
      .map_err(|e| AppError::decode(format!("empty response body: {}", e)));
  }
  serde_json::from_slice(bytes)
    .map_err(|e| AppError::decode(format!("unexpected response body: {}", e)))
}
