//! Enrollment Protocol Client
//!
//! Exchanges a certification request for a certificate chain over the CA
//! boundary. The network is abstracted behind [`EnrollmentTransport`]: a
//! capability that turns encoded request bytes into response bytes. The
//! production implementation is [`crate::http_transport::HttpTransport`];
//! tests pass closures acting as a fake CA.
//!
//! One call is one attempt. Retries and backoff belong to the caller.

use openssl::x509::X509;
use tracing::{debug, info};

use crate::build_csr::CertificationRequest;
use crate::error::{EnrollmentError, TransportError};
use crate::protocol::{
    self, CertificateSigningRequest, FIELD_INTERMEDIATE_CERT, FIELD_ROOT_CERT, FIELD_SIGNED_CERT,
};

/// Request/response exchange with a CA
pub trait EnrollmentTransport {
    /// Send the encoded request body and return the raw response body
    fn exchange(&self, request_body: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<F> EnrollmentTransport for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, TransportError>,
{
    fn exchange(&self, request_body: &[u8]) -> Result<Vec<u8>, TransportError> {
        self(request_body)
    }
}

/// Certificates returned by the CA, in response order
#[derive(Clone)]
pub struct CertificateChain {
    pub leaf: X509,
    pub intermediate: X509,
    pub root: X509,
}

impl CertificateChain {
    pub fn new(leaf: X509, intermediate: X509, root: X509) -> Self {
        Self {
            leaf,
            intermediate,
            root,
        }
    }

    /// Certificates as `[leaf, intermediate, root]`
    pub fn as_array(&self) -> [&X509; 3] {
        [&self.leaf, &self.intermediate, &self.root]
    }

    /// DER encodings as `[leaf, intermediate, root]`
    pub fn to_der(&self) -> Result<[Vec<u8>; 3], openssl::error::ErrorStack> {
        Ok([
            self.leaf.to_der()?,
            self.intermediate.to_der()?,
            self.root.to_der()?,
        ])
    }
}

impl std::fmt::Debug for CertificateChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subject = |cert: &X509| crate::validate_chain::name_to_string(cert.subject_name());
        f.debug_struct("CertificateChain")
            .field("leaf", &subject(&self.leaf))
            .field("intermediate", &subject(&self.intermediate))
            .field("root", &subject(&self.root))
            .finish()
    }
}

/// Submit a certification request and decode the returned chain
///
/// # Errors
/// - [`EnrollmentError::Transport`] on connection, timeout or status errors
/// - [`EnrollmentError::Protocol`] on empty, rejected or incomplete responses
/// - [`EnrollmentError::Decoding`] if a certificate field does not decode
pub fn enroll<T>(
    transport: &T,
    certification_request: &CertificationRequest,
) -> Result<CertificateChain, EnrollmentError>
where
    T: EnrollmentTransport + ?Sized,
{
    let request = CertificateSigningRequest {
        encoded_cert_request: certification_request
            .to_base64()
            .map_err(|e| EnrollmentError::RequestEncoding(e.to_string()))?,
    };
    let body = protocol::serialize_request(&request)?;

    debug!(bytes = body.len(), "sending certification request to CA");
    let response_body = transport.exchange(&body)?;
    debug!(bytes = response_body.len(), "received CA response");

    let response = protocol::deserialize_response(&response_body)?;
    let encoded = response.encoded_chain()?;

    let chain = CertificateChain {
        leaf: protocol::decode_certificate(FIELD_SIGNED_CERT, encoded.signed_cert)?,
        intermediate: protocol::decode_certificate(
            FIELD_INTERMEDIATE_CERT,
            encoded.intermediate_cert,
        )?,
        root: protocol::decode_certificate(FIELD_ROOT_CERT, encoded.root_cert)?,
    };

    info!(
        leaf = %crate::validate_chain::name_to_string(chain.leaf.subject_name()),
        "CA returned certificate chain"
    );
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_csr::{build_csr, SignatureAlgorithm};
    use crate::error::ProtocolError;
    use crate::generate_keypair::generate_keypair;
    use crate::identity_name::IdentityName;
    use crate::protocol::{encode_certificate, CertificateSigningResponse};
    use crate::test_ca::TestCa;
    use std::cell::Cell;
    use std::time::Duration;

    fn sample_request() -> CertificationRequest {
        let name = IdentityName::with_default_suffix("sysA", "cloudB", "opC").unwrap();
        let keypair = generate_keypair(2048, 2048).unwrap();
        build_csr(&name, &keypair, SignatureAlgorithm::Sha512WithRsa).unwrap()
    }

    fn response_json(response: &CertificateSigningResponse) -> Vec<u8> {
        protocol::serialize_response(response).unwrap()
    }

    #[test]
    fn test_enroll_returns_positional_chain() {
        let ca = TestCa::new();
        let csr = sample_request();

        let transport = |body: &[u8]| -> Result<Vec<u8>, TransportError> {
            let request = protocol::deserialize_request(body).unwrap();
            let leaf = ca.sign_encoded_request(&request.encoded_cert_request);
            Ok(response_json(&CertificateSigningResponse {
                encoded_signed_cert: Some(encode_certificate(&leaf).unwrap()),
                intermediate_cert: Some(encode_certificate(&ca.intermediate_cert).unwrap()),
                root_cert: Some(encode_certificate(&ca.root_cert).unwrap()),
            }))
        };

        let chain = enroll(&transport, &csr).unwrap();
        assert_eq!(
            chain.intermediate.to_der().unwrap(),
            ca.intermediate_cert.to_der().unwrap()
        );
        assert_eq!(chain.root.to_der().unwrap(), ca.root_cert.to_der().unwrap());
        assert_eq!(
            chain.leaf.public_key().unwrap().public_key_to_der().unwrap(),
            csr.public_key().unwrap().public_key_to_der().unwrap()
        );
    }

    #[test]
    fn test_single_attempt_on_timeout() {
        let csr = sample_request();
        let calls = Cell::new(0);
        let transport = |_: &[u8]| -> Result<Vec<u8>, TransportError> {
            calls.set(calls.get() + 1);
            Err(TransportError::Timeout(Duration::from_millis(50)))
        };

        let err = enroll(&transport, &csr).unwrap_err();
        assert!(matches!(
            err,
            EnrollmentError::Transport(TransportError::Timeout(_))
        ));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_missing_root_is_protocol_failure() {
        let ca = TestCa::new();
        let csr = sample_request();
        let transport = |body: &[u8]| -> Result<Vec<u8>, TransportError> {
            let request = protocol::deserialize_request(body).unwrap();
            let leaf = ca.sign_encoded_request(&request.encoded_cert_request);
            Ok(response_json(&CertificateSigningResponse {
                encoded_signed_cert: Some(encode_certificate(&leaf).unwrap()),
                intermediate_cert: Some(encode_certificate(&ca.intermediate_cert).unwrap()),
                root_cert: None,
            }))
        };

        let err = enroll(&transport, &csr).unwrap_err();
        assert!(matches!(
            err,
            EnrollmentError::Protocol(ProtocolError::MissingField(FIELD_ROOT_CERT))
        ));
    }

    #[test]
    fn test_ca_rejection_carries_message() {
        let csr = sample_request();
        let transport = |_: &[u8]| -> Result<Vec<u8>, TransportError> {
            Ok(br#"{"errorMessage":"policy violation","errorCode":400}"#.to_vec())
        };

        match enroll(&transport, &csr).unwrap_err() {
            EnrollmentError::Protocol(ProtocolError::Rejected { message, code }) => {
                assert_eq!(message, "policy violation");
                assert_eq!(code, Some(400));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_undecodable_field_is_decoding_failure() {
        let csr = sample_request();
        let transport = |_: &[u8]| -> Result<Vec<u8>, TransportError> {
            Ok(response_json(&CertificateSigningResponse {
                encoded_signed_cert: Some("%%%".to_string()),
                intermediate_cert: Some("%%%".to_string()),
                root_cert: Some("%%%".to_string()),
            }))
        };

        let err = enroll(&transport, &csr).unwrap_err();
        assert!(matches!(
            err,
            EnrollmentError::Decoding {
                field: FIELD_SIGNED_CERT,
                ..
            }
        ));
    }
}
