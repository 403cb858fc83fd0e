//! Certification Request Module
//!
//! Builds the PKCS#10 certification request a system sends to the CA.
//!
//! # Request Properties
//! - **Version**: PKCS#10 v1 (encoded as 0)
//! - **Subject**: `CN=<system>.<cloud>.<operator>.<suffix>`
//! - **Public Key**: the enrolling system's RSA key
//! - **Signature**: SHA-512 with RSA by default
//!
//! Every request is verified against its own embedded public key right after
//! signing. A request that fails that check is dropped and never reaches the
//! network.
//!
//! # Example
//! ```rust,no_run
//! use cert_enroll::build_csr::{build_csr, SignatureAlgorithm};
//! use cert_enroll::generate_keypair::generate_keypair;
//! use cert_enroll::identity_name::IdentityName;
//! # fn example() -> anyhow::Result<()> {
//! let name = IdentityName::with_default_suffix("sysA", "cloudB", "opC")?;
//! let keypair = generate_keypair(2048, 2048)?;
//! let csr = build_csr(&name, &keypair, SignatureAlgorithm::Sha512WithRsa)?;
//! let body = csr.to_base64()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::x509::{X509Name, X509Req};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CsrError;
use crate::generate_keypair::KeyPair;
use crate::identity_name::IdentityName;

const X509_REQ_VERSION_1: i32 = 0; // PKCS#10 v1 is represented by 0
/// X.520 upper bound for commonName (ub-common-name)
const COMMON_NAME_MAX_LENGTH: usize = 64;

/// Signature algorithms accepted for certification requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "SHA256withRSA")]
    Sha256WithRsa,
    #[serde(rename = "SHA384withRSA")]
    Sha384WithRsa,
    #[default]
    #[serde(rename = "SHA512withRSA")]
    Sha512WithRsa,
}

impl SignatureAlgorithm {
    fn digest(self) -> MessageDigest {
        match self {
            SignatureAlgorithm::Sha256WithRsa => MessageDigest::sha256(),
            SignatureAlgorithm::Sha384WithRsa => MessageDigest::sha384(),
            SignatureAlgorithm::Sha512WithRsa => MessageDigest::sha512(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256WithRsa => "SHA256withRSA",
            SignatureAlgorithm::Sha384WithRsa => "SHA384withRSA",
            SignatureAlgorithm::Sha512WithRsa => "SHA512withRSA",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CsrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA256withRSA" => Ok(SignatureAlgorithm::Sha256WithRsa),
            "SHA384withRSA" => Ok(SignatureAlgorithm::Sha384WithRsa),
            "SHA512withRSA" => Ok(SignatureAlgorithm::Sha512WithRsa),
            other => Err(CsrError::SigningFailure(format!(
                "unsupported signature algorithm {:?}",
                other
            ))),
        }
    }
}

/// Signed PKCS#10 certification request
pub struct CertificationRequest {
    request: X509Req,
}

impl CertificationRequest {
    /// Parse a DER-encoded request
    pub fn from_der(der: &[u8]) -> Result<Self, CsrError> {
        let request = X509Req::from_der(der)
            .map_err(|e| CsrError::EncodingFailure(format!("invalid PKCS#10 DER: {}", e)))?;
        Ok(Self { request })
    }

    pub fn as_x509_req(&self) -> &X509Req {
        &self.request
    }

    pub fn to_der(&self) -> Result<Vec<u8>, CsrError> {
        self.request
            .to_der()
            .map_err(|e| CsrError::EncodingFailure(format!("failed to encode request: {}", e)))
    }

    /// Base64 (standard alphabet, padded) of the DER request, as sent to the CA
    pub fn to_base64(&self) -> Result<String, CsrError> {
        Ok(STANDARD.encode(self.to_der()?))
    }

    /// Public key embedded in the request
    pub fn public_key(&self) -> Result<PKey<Public>, CsrError> {
        self.request
            .public_key()
            .map_err(|e| CsrError::EncodingFailure(format!("embedded public key: {}", e)))
    }

    /// Common name of the request subject
    pub fn subject_common_name(&self) -> Option<String> {
        self.request
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().to_string().ok())
    }

    /// Check the request signature against the embedded public key
    pub fn verify_signature(&self) -> Result<bool, CsrError> {
        let public_key = self.public_key()?;
        self.request
            .verify(&public_key)
            .map_err(|e| CsrError::SigningFailure(format!("signature verification error: {}", e)))
    }

    /// Fail with [`CsrError::SelfVerification`] unless the signature verifies
    pub fn self_verify(&self) -> Result<(), CsrError> {
        if self.verify_signature()? {
            Ok(())
        } else {
            Err(CsrError::SelfVerification)
        }
    }
}

impl fmt::Debug for CertificationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificationRequest")
            .field("subject", &self.subject_common_name())
            .finish()
    }
}

/// Build and self-verify a certification request
///
/// # Errors
/// - [`CsrError::EncodingFailure`] if the name cannot be encoded as a `CN`
/// - [`CsrError::SigningFailure`] if the provider rejects the key/algorithm
/// - [`CsrError::SelfVerification`] if the signed request does not verify
pub fn build_csr(
    identity_name: &IdentityName,
    keypair: &KeyPair,
    signature_algorithm: SignatureAlgorithm,
) -> Result<CertificationRequest, CsrError> {
    let common_name = identity_name.common_name();
    let subject = encode_subject(&common_name)?;

    let mut builder = X509Req::builder()
        .map_err(|e| CsrError::EncodingFailure(format!("failed to create request builder: {}", e)))?;
    builder
        .set_version(X509_REQ_VERSION_1)
        .map_err(|e| CsrError::EncodingFailure(format!("failed to set version: {}", e)))?;
    builder
        .set_subject_name(&subject)
        .map_err(|e| CsrError::EncodingFailure(format!("failed to set subject: {}", e)))?;
    builder
        .set_pubkey(keypair.private_key())
        .map_err(|e| CsrError::EncodingFailure(format!("failed to set public key: {}", e)))?;
    builder
        .sign(keypair.private_key(), signature_algorithm.digest())
        .map_err(|e| {
            CsrError::SigningFailure(format!("{} signing failed: {}", signature_algorithm, e))
        })?;

    let request = CertificationRequest {
        request: builder.build(),
    };
    request.self_verify()?;

    debug!(
        subject = %common_name,
        algorithm = %signature_algorithm,
        key_bits = keypair.bits(),
        "certification request built and self-verified"
    );
    Ok(request)
}

fn encode_subject(common_name: &str) -> Result<X509Name, CsrError> {
    if common_name.chars().count() > COMMON_NAME_MAX_LENGTH {
        return Err(CsrError::EncodingFailure(format!(
            "common name is {} characters, the limit is {}",
            common_name.chars().count(),
            COMMON_NAME_MAX_LENGTH
        )));
    }
    if let Some(c) = common_name.chars().find(|c| c.is_control()) {
        return Err(CsrError::EncodingFailure(format!(
            "common name contains control character {:?}",
            c
        )));
    }

    let mut name_builder = X509Name::builder()
        .map_err(|e| CsrError::EncodingFailure(format!("failed to create name builder: {}", e)))?;
    name_builder
        .append_entry_by_nid(Nid::COMMONNAME, common_name)
        .map_err(|e| CsrError::EncodingFailure(format!("failed to set CN: {}", e)))?;
    Ok(name_builder.build())
}
