use crate::core::errors::BinanceError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;

/// Result type for signing operations: (headers, `query_params`)
pub type SignatureResult = Result<(HashMap<String, String>, Vec<(String, String)>), BinanceError>;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on `API-KEY` and `SIGNED` endpoints
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Signer trait for request authentication
///
/// Implementations produce the extra headers and query parameters a request
/// needs; the REST client appends them to what the caller supplied.
pub trait Signer: Send + Sync {
    /// Sign a request and return headers and query parameters
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `endpoint` - API endpoint path
    /// * `query_string` - Query string (without leading '?')
    /// * `body` - Raw request body bytes
    /// * `timestamp` - Request timestamp in milliseconds
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult;

    /// Headers for endpoints that only need the API key (no signature)
    fn api_key_headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// HMAC-SHA256 signer for Binance `SIGNED` endpoints
pub struct HmacSigner {
    api_key: String,
    secret_key: String,
    recv_window: Option<u64>,
}

impl HmacSigner {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key,
            recv_window: None,
        }
    }

    /// Send `recvWindow` with every signed request
    pub fn with_recv_window(mut self, recv_window: u64) -> Self {
        self.recv_window = Some(recv_window);
        self
    }

    fn signature(&self, payload: &str) -> Result<String, BinanceError> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| BinanceError::AuthError(format!("Invalid secret key: {}", e)))?;

        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl Signer for HmacSigner {
    fn sign_request(
        &self,
        _method: &str,
        _endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        let mut extra = Vec::with_capacity(3);
        if let Some(recv_window) = self.recv_window {
            extra.push(("recvWindow".to_string(), recv_window.to_string()));
        }
        extra.push(("timestamp".to_string(), timestamp.to_string()));

        let suffix = extra
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        // Binance signs the query string followed by the form body
        let mut payload = if query_string.is_empty() {
            suffix
        } else {
            format!("{}&{}", query_string, suffix)
        };
        if !body.is_empty() {
            payload.push_str(std::str::from_utf8(body).map_err(|e| {
                BinanceError::InvalidParameters(format!("Request body is not UTF-8: {}", e))
            })?);
        }

        let signature = self.signature(&payload)?;
        extra.push(("signature".to_string(), signature));

        Ok((self.api_key_headers(), extra))
    }

    fn api_key_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(API_KEY_HEADER.to_string(), self.api_key.clone());
        headers
    }
}
