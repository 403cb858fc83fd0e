//! Protocol Module
//!
//! Defines the CA wire protocol: the signing request and response payloads,
//! their JSON serialization, and decoding of the certificate fields.
//!
//! ```text
//! request  {"encodedCertRequest": "<base64 DER PKCS#10>"}
//! response {"encodedSignedCert": "...", "intermediateCert": "...", "rootCert": "..."}
//! error    {"errorMessage": "...", "errorCode": 400, "exceptionType": "..."}
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};

use crate::error::{EnrollmentError, ProtocolError};

pub const FIELD_SIGNED_CERT: &str = "encodedSignedCert";
pub const FIELD_INTERMEDIATE_CERT: &str = "intermediateCert";
pub const FIELD_ROOT_CERT: &str = "rootCert";

const PEM_PREFIX: &str = "-----BEGIN";

/// Request sent to the CA
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSigningRequest {
    pub encoded_cert_request: String,
}

/// Response returned by the CA
///
/// Fields are optional on the wire so a missing field is reported as a
/// protocol failure naming the field instead of a generic parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSigningResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_signed_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cert: Option<String>,
}

/// Error payload returned by the CA when it rejects a request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub error_message: String,
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub exception_type: Option<String>,
}

/// The three encoded certificates of a well-formed response, in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChain<'a> {
    pub signed_cert: &'a str,
    pub intermediate_cert: &'a str,
    pub root_cert: &'a str,
}

impl CertificateSigningResponse {
    /// Return the three certificate fields positionally, or the first missing one
    pub fn encoded_chain(&self) -> Result<EncodedChain<'_>, ProtocolError> {
        Ok(EncodedChain {
            signed_cert: required(&self.encoded_signed_cert, FIELD_SIGNED_CERT)?,
            intermediate_cert: required(&self.intermediate_cert, FIELD_INTERMEDIATE_CERT)?,
            root_cert: required(&self.root_cert, FIELD_ROOT_CERT)?,
        })
    }
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, ProtocolError> {
    match field.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ProtocolError::MissingField(name)),
    }
}

/// Serialize a request to JSON bytes
pub fn serialize_request(request: &CertificateSigningRequest) -> Result<Vec<u8>, EnrollmentError> {
    serde_json::to_vec(request).map_err(|e| EnrollmentError::RequestEncoding(e.to_string()))
}

/// Deserialize a request from JSON bytes
pub fn deserialize_request(bytes: &[u8]) -> Result<CertificateSigningRequest, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &CertificateSigningResponse) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(response).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Deserialize a CA answer
///
/// An empty body, an error payload and a non-object body are all protocol
/// failures. Missing certificate fields are reported later by
/// [`CertificateSigningResponse::encoded_chain`].
pub fn deserialize_response(bytes: &[u8]) -> Result<CertificateSigningResponse, ProtocolError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ProtocolError::EmptyResponse);
    }

    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if value.is_null() {
        return Err(ProtocolError::EmptyResponse);
    }
    if !value.is_object() {
        return Err(ProtocolError::Malformed(format!(
            "expected a JSON object, got {}",
            value
        )));
    }
    if value.get("errorMessage").is_some() {
        let error: ErrorMessage =
            serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        return Err(ProtocolError::Rejected {
            message: error.error_message,
            code: error.error_code,
        });
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Whether a body parses as a CA error payload
pub fn is_error_payload(bytes: &[u8]) -> bool {
    serde_json::from_slice::<ErrorMessage>(bytes).is_ok()
}

/// Decode one certificate field
///
/// Accepts base64 DER (standard alphabet, whitespace ignored) or PEM text.
pub fn decode_certificate(field: &'static str, encoded: &str) -> Result<X509, EnrollmentError> {
    let decoding = |reason: String| EnrollmentError::Decoding { field, reason };

    let trimmed = encoded.trim();
    if trimmed.starts_with(PEM_PREFIX) {
        return X509::from_pem(trimmed.as_bytes())
            .map_err(|e| decoding(format!("invalid PEM certificate: {}", e)));
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| decoding(format!("invalid base64: {}", e)))?;
    X509::from_der(&der).map_err(|e| decoding(format!("invalid X.509 structure: {}", e)))
}

/// Encode a certificate the way the CA does: base64 of the DER
pub fn encode_certificate(certificate: &X509) -> Result<String, openssl::error::ErrorStack> {
    Ok(STANDARD.encode(certificate.to_der()?))
}
