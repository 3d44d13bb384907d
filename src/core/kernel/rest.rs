use crate::core::errors::BinanceError;
use crate::core::kernel::signer::Signer;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method, Request, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{instrument, trace};

/// Binance endpoint security types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Public endpoint, sent as-is
    None,
    /// Needs the API key header but no signature (e.g. user data streams)
    ApiKey,
    /// Needs the API key header plus `timestamp` and `signature`
    Signed,
}

/// REST client trait for making HTTP requests
///
/// This is the "fetch signed JSON over HTTP" capability; the streaming half
/// never depends on it, applications use it to obtain listen keys and
/// snapshots before subscribing.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Make a GET request and return the body as a JSON value
    async fn get(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<Value, BinanceError>;

    /// Make a GET request with strongly-typed response
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<T, BinanceError>;

    /// Make a POST request; Binance takes parameters in the query string
    async fn post(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<Value, BinanceError>;

    /// Make a POST request with strongly-typed response
    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<T, BinanceError>;

    /// Make a PUT request
    async fn put(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<Value, BinanceError>;

    /// Make a DELETE request
    async fn delete(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<Value, BinanceError>;

    /// Make a DELETE request with strongly-typed response
    async fn delete_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<T, BinanceError>;

    /// Make a signed request with a custom method
    async fn signed_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<Value, BinanceError>;
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            timeout_seconds: 30,
            user_agent: "binance-stream/0.1".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
        }
    }

    /// Set the signer for `API-KEY` and `SIGNED` requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(self) -> Result<ReqwestRest, BinanceError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()?;

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer: self.signer,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl ReqwestRest {
    fn timestamp() -> Result<u64, BinanceError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|e| BinanceError::Other(format!("Failed to get timestamp: {}", e)))
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url, endpoint)
    }

    fn signer(&self) -> Result<&Arc<dyn Signer>, BinanceError> {
        self.signer.as_ref().ok_or_else(|| {
            BinanceError::AuthError("Authentication required but no signer provided".to_string())
        })
    }

    #[instrument(skip(self, response), fields(status = %response.status()))]
    async fn handle_response(&self, response: Response) -> Result<Value, BinanceError> {
        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            BinanceError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", response_text);

        if status.is_success() {
            serde_json::from_str(&response_text).map_err(|e| {
                BinanceError::DeserializationError(format!("Failed to parse JSON response: {}", e))
            })
        } else {
            Err(api_error(status.as_u16(), &response_text))
        }
    }

    #[instrument(skip(self, query_params), fields(method = %method, endpoint = %endpoint, security = ?security))]
    async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<Value, BinanceError> {
        let url = self.build_url(endpoint);
        let mut builder = self.client.request(method, &url).query(query_params);

        if security == Security::ApiKey {
            for (key, value) in self.signer()?.api_key_headers() {
                builder = builder.header(&key, &value);
            }
        }

        let mut request = builder.build()?;
        if security == Security::Signed {
            sign_request(self.signer()?.as_ref(), endpoint, &mut request, Self::timestamp()?)?;
        }

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| BinanceError::NetworkError(format!("Request failed: {}", e)))?;

        self.handle_response(response).await
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, BinanceError> {
    serde_json::from_value(value)
        .map_err(|e| BinanceError::DeserializationError(format!("Failed to deserialize JSON: {}", e)))
}

/// Sign `request` in place. The payload is the query exactly as it goes on
/// the wire (percent-encoded), and the signer's parameters are appended after it.
pub(crate) fn sign_request(
    signer: &dyn Signer,
    endpoint: &str,
    request: &mut Request,
    timestamp: u64,
) -> Result<(), BinanceError> {
    let query_string = request.url().query().unwrap_or_default().to_string();
    let (headers, signed_params) = signer.sign_request(
        request.method().as_str(),
        endpoint,
        &query_string,
        &[],
        timestamp,
    )?;

    request
        .url_mut()
        .query_pairs_mut()
        .extend_pairs(signed_params.iter());
    for (key, value) in headers {
        let name = HeaderName::try_from(key.as_str())
            .map_err(|e| BinanceError::AuthError(format!("Invalid header name {}: {}", key, e)))?;
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|e| BinanceError::AuthError(format!("Invalid header value: {}", e)))?;
        request.headers_mut().insert(name, value);
    }
    Ok(())
}

/// Binance errors come back as `{"code": -1121, "msg": "Invalid symbol."}`
fn api_error(status: u16, body: &str) -> BinanceError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        code: i32,
        msg: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => BinanceError::ApiError {
            code: err.code,
            message: err.msg,
        },
        Err(_) => BinanceError::ApiError {
            code: i32::from(status),
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    async fn get(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<Value, BinanceError> {
        self.make_request(Method::GET, endpoint, query_params, security)
            .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<T, BinanceError> {
        self.make_request(Method::GET, endpoint, query_params, security)
            .await
            .and_then(decode)
    }

    async fn post(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<Value, BinanceError> {
        self.make_request(Method::POST, endpoint, query_params, security)
            .await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<T, BinanceError> {
        self.make_request(Method::POST, endpoint, query_params, security)
            .await
            .and_then(decode)
    }

    async fn put(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<Value, BinanceError> {
        self.make_request(Method::PUT, endpoint, query_params, security)
            .await
    }

    async fn delete(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<Value, BinanceError> {
        self.make_request(Method::DELETE, endpoint, query_params, security)
            .await
    }

    async fn delete_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        security: Security,
    ) -> Result<T, BinanceError> {
        self.make_request(Method::DELETE, endpoint, query_params, security)
            .await
            .and_then(decode)
    }

    async fn signed_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<Value, BinanceError> {
        self.make_request(method, endpoint, query_params, Security::Signed)
            .await
    }
}
