//! HTTP transport to the CA
//!
//! Blocking `reqwest` client implementing [`EnrollmentTransport`]. The request
//! JSON is POSTed to the CA URL; the response body is handed back untouched
//! for [`crate::protocol`] to interpret.
//!
//! A timeout is mandatory. It bounds both connect and the whole exchange, so
//! the enrollment run can never hang on the CA.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::enrollment::EnrollmentTransport;
use crate::error::TransportError;
use crate::protocol;

const JSON: &str = "application/json";

/// Production [`EnrollmentTransport`] speaking HTTP to the CA
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport for `url` with a mandatory, non-zero `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        if timeout.is_zero() {
            return Err(TransportError::Io("CA timeout must be greater than zero".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Io(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the CA which cloud it signs for
    ///
    /// The CA answers a GET on its URL with the cloud common name, either as
    /// plain text or as a JSON string.
    pub fn cloud_common_name(&self) -> Result<String, TransportError> {
        debug!(url = %self.url, "querying CA for the cloud common name");
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let text = response.text().map_err(|e| self.classify(e))?;
        let name = serde_json::from_str::<String>(&text).unwrap_or_else(|_| text.trim().to_string());
        Ok(name)
    }

    fn classify(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if error.is_connect() {
            TransportError::Connect(error.to_string())
        } else {
            TransportError::Io(error.to_string())
        }
    }
}

impl EnrollmentTransport for HttpTransport {
    fn exchange(&self, request_body: &[u8]) -> Result<Vec<u8>, TransportError> {
        debug!(url = %self.url, bytes = request_body.len(), "POST certification request");
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, JSON)
            .body(request_body.to_vec())
            .send()
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.bytes().map_err(|e| self.classify(e))?.to_vec();

        if status.is_success() {
            return Ok(body);
        }
        // The CA reports rejections as an error payload; pass it through so the
        // protocol layer can surface its message
        if protocol::is_error_payload(&body) {
            debug!(status = status.as_u16(), "CA returned an error payload");
            return Ok(body);
        }

        warn!(status = status.as_u16(), url = %self.url, "CA answered with a non-success status");
        Err(TransportError::Status(status.as_u16()))
    }
}
