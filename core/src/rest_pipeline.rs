use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use xconn_domain::error::{AuthError, ConnectionError, CoreError, ExchangeApiError, RateLimitError, ValidationError};
use xconn_domain::exchange_id::ExchangeId;
use xconn_utils::cancellation_token::CancellationToken;

use crate::clock_sync::ClockSync;
use crate::config::RestSettings;
use crate::driver::Driver;
use crate::limiter::WeightedLimiter;
use crate::signer::Signer;

pub use crate::driver::{BookDiffEvent, DecodedEvent};

type HttpsClient = Client<HttpsConnector<HttpConnector>>;

fn build_https_client() -> HttpsClient {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_only()
        .enable_http1()
        .enable_http2()
        .build();
    Client::builder().build(https)
}

/// Exchange-reported JSON error body, e.g. `{"code": -1021, "msg": "..."}`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<i64>,
    msg: Option<String>,
}

/// Signed, rate-aware REST request/response middleware chain.
///
/// Per call: weight acquire -> signing -> dispatch -> response-header weight
/// reconcile -> typed error mapping. Does not retry internally; retry is a
/// consumer policy layered on top.
pub struct RestPipeline<D: Driver> {
    exchange: ExchangeId,
    driver: Arc<D>,
    client: HttpsClient,
    limiter: Arc<WeightedLimiter>,
    clock: Arc<ClockSync>,
    signer: Signer,
    api_key: String,
    timeout: Duration,
    closed: AtomicBool,
}

impl<D: Driver> RestPipeline<D> {
    pub fn new(exchange: ExchangeId, driver: Arc<D>, limiter: Arc<WeightedLimiter>, clock: Arc<ClockSync>, settings: &RestSettings) -> Self {
        Self {
            exchange,
            driver,
            client: build_https_client(),
            limiter,
            clock,
            signer: Signer::new(settings.api_secret.clone(), settings.recv_window_ms as i64),
            api_key: settings.api_key.clone(),
            timeout: settings.timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Idempotent. Subsequent operations fail fast with a non-retriable error.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn ping(&self, cancel: &CancellationToken) -> Result<serde_json::Value, CoreError> {
        self.request(Method::GET, "/api/v3/ping", vec![], cancel).await
    }

    pub async fn server_time(&self, cancel: &CancellationToken) -> Result<serde_json::Value, CoreError> {
        self.request(Method::GET, "/api/v3/time", vec![], cancel).await
    }

    pub async fn exchange_info(&self, cancel: &CancellationToken) -> Result<serde_json::Value, CoreError> {
        self.request(Method::GET, "/api/v3/exchangeInfo", vec![], cancel).await
    }

    pub async fn account(&self, cancel: &CancellationToken) -> Result<serde_json::Value, CoreError> {
        self.request(Method::GET, "/api/v3/account", vec![], cancel).await
    }

    /// Places an order at `path` (account-type routing, e.g. spot vs margin,
    /// is the caller's concern: it names the endpoint, the pipeline only
    /// signs, throttles, and maps the response).
    pub async fn place_order(&self, path: &str, params: Vec<(String, String)>, cancel: &CancellationToken) -> Result<serde_json::Value, CoreError> {
        self.request(Method::POST, path, params, cancel).await
    }

    pub async fn cancel_order(&self, path: &str, params: Vec<(String, String)>, cancel: &CancellationToken) -> Result<serde_json::Value, CoreError> {
        self.request(Method::DELETE, path, params, cancel).await
    }

    pub async fn query_order(&self, path: &str, params: Vec<(String, String)>, cancel: &CancellationToken) -> Result<serde_json::Value, CoreError> {
        self.request(Method::GET, path, params, cancel).await
    }

    /// Generic signed/unsigned request. `path` selects weight and auth
    /// requirement from the driver's static tables.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(String, String)>,
        cancel: &CancellationToken,
    ) -> Result<T, CoreError> {
        if self.is_closed() {
            return Err(CoreError::Connection(ConnectionError {
                exchange: self.exchange.clone(),
                endpoint: path.to_owned(),
                reason: "pipeline is closed".to_owned(),
                retriable: false,
            }));
        }

        let weight = self.driver.endpoint_weight(path);
        self.limiter.wait(weight, cancel).await.map_err(|_| {
            CoreError::Connection(ConnectionError {
                exchange: self.exchange.clone(),
                endpoint: path.to_owned(),
                reason: "request cancelled while waiting for rate limit budget".to_owned(),
                retriable: true,
            })
        })?;

        let query = if self.driver.is_public(path) {
            encode_public_query(&params)
        } else {
            let signed = self.signer.sign(params, self.clock.now_ms());
            format!("{}&signature={}", signed.canonical_query, signed.signature_hex)
        };

        let url = if query.is_empty() {
            format!("{}{}", self.driver.rest_base_url(), path)
        } else {
            format!("{}{}?{}", self.driver.rest_base_url(), path, query)
        };

        let mut builder = Request::builder().method(method).uri(&url);
        if !self.driver.is_public(path) {
            builder = builder.header("X-MBX-APIKEY", &self.api_key);
        }
        let req = builder.body(Body::empty()).map_err(|e| {
            CoreError::Connection(ConnectionError {
                exchange: self.exchange.clone(),
                endpoint: path.to_owned(),
                reason: format!("failed building request: {e}"),
                retriable: false,
            })
        })?;

        let dispatch = tokio::time::timeout(self.timeout, self.client.request(req));
        let response = match dispatch.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(CoreError::Connection(ConnectionError {
                    exchange: self.exchange.clone(),
                    endpoint: path.to_owned(),
                    reason: e.to_string(),
                    retriable: true,
                }))
            }
            Err(_) => {
                return Err(CoreError::Connection(ConnectionError {
                    exchange: self.exchange.clone(),
                    endpoint: path.to_owned(),
                    reason: format!("request timed out after {:?}", self.timeout),
                    retriable: true,
                }))
            }
        };

        let status = response.status();
        if let Some(used) = self.driver.extract_used_weight(response.headers()) {
            self.limiter.update_weight(used);
        }

        let body_bytes = hyper::body::to_bytes(response.into_body()).await.map_err(|e| {
            CoreError::Connection(ConnectionError {
                exchange: self.exchange.clone(),
                endpoint: path.to_owned(),
                reason: format!("failed reading response body: {e}"),
                retriable: true,
            })
        })?;

        self.map_response(path, status, &body_bytes)
    }

    fn map_response<T: DeserializeOwned>(&self, path: &str, status: StatusCode, body: &[u8]) -> Result<T, CoreError> {
        let error_body: Option<ApiErrorBody> = serde_json::from_slice(body).ok();
        let code = error_body.as_ref().and_then(|b| b.code);

        if status.is_success() && code.is_none() {
            return serde_json::from_slice(body).map_err(|e| {
                CoreError::Connection(ConnectionError {
                    exchange: self.exchange.clone(),
                    endpoint: path.to_owned(),
                    reason: format!("failed decoding response body: {e}"),
                    retriable: false,
                })
            });
        }

        let message = error_body.as_ref().and_then(|b| b.msg.clone()).unwrap_or_default();

        if status == StatusCode::TOO_MANY_REQUESTS || matches!(code, Some(-1015) | Some(-1016)) {
            return Err(CoreError::RateLimit(RateLimitError {
                exchange: self.exchange.clone(),
                weight: self.driver.endpoint_weight(path),
                retry_after: Duration::from_secs(1),
            }));
        }

        if status == StatusCode::UNAUTHORIZED || matches!(code, Some(-2015) | Some(-1022)) {
            return Err(CoreError::Auth(AuthError {
                exchange: self.exchange.clone(),
                reason: message,
            }));
        }

        if let Some(c) = code {
            if (-1103..=-1100).contains(&c) {
                return Err(CoreError::Validation(ValidationError {
                    exchange: self.exchange.clone(),
                    field: path.to_owned(),
                    value: String::new(),
                    reason: message,
                }));
            }
        }

        if status.is_success() {
            return serde_json::from_slice(body).map_err(|e| {
                CoreError::Connection(ConnectionError {
                    exchange: self.exchange.clone(),
                    endpoint: path.to_owned(),
                    reason: format!("failed decoding response body: {e}"),
                    retriable: false,
                })
            });
        }

        if code.is_some() {
            return Err(CoreError::Exchange(ExchangeApiError::new(self.exchange.clone(), path, message, code)));
        }

        Err(CoreError::Connection(ConnectionError {
            exchange: self.exchange.clone(),
            endpoint: path.to_owned(),
            reason: format!("unexpected status {status}"),
            retriable: status.is_server_error(),
        }))
    }
}

fn encode_public_query(params: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}
