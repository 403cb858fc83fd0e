//! Chain Validator
//!
//! Checks a [`CertificateChain`] returned by the CA before anything is
//! persisted. The chain is interpreted positionally as
//! `[leaf, intermediate, root]`:
//!
//! ```text
//! leaf.issuer         == intermediate.subject   verify(leaf, intermediate.key)
//! intermediate.issuer == root.subject           verify(intermediate, root.key)
//! root.issuer         == root.subject           verify(root, root.key)
//! ```
//!
//! Checks run in a fixed order (public keys, names, signatures, validity
//! windows) and stop at the first failure. A [`ValidatedChain`] can only be
//! produced here. [`check_leaf_key`] then ties the leaf to the key pair that
//! requested it.

use std::cmp::Ordering;

use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::pkey::{HasPublic, PKey, PKeyRef, Public};
use openssl::x509::{X509NameRef, X509};
use tracing::debug;

use crate::enrollment::CertificateChain;
use crate::error::{ChainError, ChainPosition};

/// Validator options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Enforce the notBefore/notAfter window of every certificate
    pub check_validity: bool,
    /// Evaluation instant as Unix seconds; `None` means now
    pub at: Option<i64>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            check_validity: true,
            at: None,
        }
    }
}

impl ValidationOptions {
    pub fn without_validity_check() -> Self {
        Self {
            check_validity: false,
            at: None,
        }
    }
}

/// A chain that passed [`validate_chain`]
///
/// Only the validator constructs this type; the credential store writer
/// accepts nothing else.
#[derive(Debug, Clone)]
pub struct ValidatedChain {
    chain: CertificateChain,
}

impl ValidatedChain {
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    pub fn leaf(&self) -> &X509 {
        &self.chain.leaf
    }

    pub fn intermediate(&self) -> &X509 {
        &self.chain.intermediate
    }

    pub fn root(&self) -> &X509 {
        &self.chain.root
    }

    pub fn into_inner(self) -> CertificateChain {
        self.chain
    }
}

/// Validate a `[leaf, intermediate, root]` chain
///
/// # Errors
/// - [`ChainError::MalformedCertificate`] if a public key cannot be decoded
/// - [`ChainError::IssuerMismatch`] if an issuer is not the next subject
/// - [`ChainError::SignatureInvalid`] if a signature does not verify
/// - [`ChainError::Expired`] / [`ChainError::NotYetValid`] when the validity
///   check is on and the evaluation time is outside a certificate's window
pub fn validate_chain(
    chain: CertificateChain,
    options: &ValidationOptions,
) -> Result<ValidatedChain, ChainError> {
    let links = [
        (ChainPosition::Leaf, &chain.leaf, &chain.intermediate),
        (ChainPosition::Intermediate, &chain.intermediate, &chain.root),
        (ChainPosition::Root, &chain.root, &chain.root),
    ];

    let keys = [
        public_key(ChainPosition::Leaf, &chain.leaf)?,
        public_key(ChainPosition::Intermediate, &chain.intermediate)?,
        public_key(ChainPosition::Root, &chain.root)?,
    ];

    for (position, certificate, issuer) in links {
        check_issuer(position, certificate, issuer)?;
    }

    // Issuer keys line up with `links`: intermediate, root, root
    let issuer_keys = [&keys[1], &keys[2], &keys[2]];
    for ((position, certificate, _), issuer_key) in links.into_iter().zip(issuer_keys) {
        let verified = certificate
            .verify(issuer_key)
            .map_err(|e| ChainError::MalformedCertificate {
                certificate: position,
                reason: format!("signature could not be checked: {}", e),
            })?;
        if !verified {
            return Err(ChainError::SignatureInvalid {
                certificate: position,
            });
        }
    }

    if options.check_validity {
        let now = evaluation_time(options)?;
        for (position, certificate, _) in links {
            check_window(position, certificate, &now)?;
        }
    }

    debug!(
        leaf = %name_to_string(chain.leaf.subject_name()),
        root = %name_to_string(chain.root.subject_name()),
        check_validity = options.check_validity,
        "certificate chain validated"
    );

    Ok(ValidatedChain { chain })
}

/// Check that the validated leaf carries the public half of `key`
///
/// # Errors
/// - [`ChainError::KeyMismatch`] if the CA certified a different key
/// - [`ChainError::MalformedCertificate`] if the leaf key cannot be decoded
pub fn check_leaf_key<T: HasPublic>(
    validated_chain: &ValidatedChain,
    key: &PKeyRef<T>,
) -> Result<(), ChainError> {
    let leaf_key = public_key(ChainPosition::Leaf, validated_chain.leaf())?;
    if !leaf_key.public_eq(key) {
        return Err(ChainError::KeyMismatch {
            certificate: ChainPosition::Leaf,
        });
    }
    Ok(())
}

fn public_key(position: ChainPosition, certificate: &X509) -> Result<PKey<Public>, ChainError> {
    certificate
        .public_key()
        .map_err(|e| ChainError::MalformedCertificate {
            certificate: position,
            reason: format!("public key cannot be decoded: {}", e),
        })
}

fn check_issuer(
    position: ChainPosition,
    certificate: &X509,
    issuer: &X509,
) -> Result<(), ChainError> {
    let malformed = |e: openssl::error::ErrorStack| ChainError::MalformedCertificate {
        certificate: position,
        reason: format!("name cannot be encoded: {}", e),
    };

    let actual = certificate.issuer_name().to_der().map_err(malformed)?;
    let expected = issuer.subject_name().to_der().map_err(malformed)?;
    if actual != expected {
        return Err(ChainError::IssuerMismatch {
            certificate: position,
            expected: name_to_string(issuer.subject_name()),
            actual: name_to_string(certificate.issuer_name()),
        });
    }
    Ok(())
}

fn evaluation_time(options: &ValidationOptions) -> Result<Asn1Time, ChainError> {
    let time = match options.at {
        Some(unix_secs) => Asn1Time::from_unix(unix_secs),
        None => Asn1Time::days_from_now(0),
    };
    time.map_err(|e| ChainError::MalformedCertificate {
        certificate: ChainPosition::Leaf,
        reason: format!("evaluation time cannot be represented: {}", e),
    })
}

fn check_window(
    position: ChainPosition,
    certificate: &X509,
    now: &Asn1TimeRef,
) -> Result<(), ChainError> {
    let malformed = |e: openssl::error::ErrorStack| ChainError::MalformedCertificate {
        certificate: position,
        reason: format!("validity period cannot be compared: {}", e),
    };

    let not_before = certificate.not_before();
    if not_before.compare(now).map_err(malformed)? == Ordering::Greater {
        return Err(ChainError::NotYetValid {
            certificate: position,
            not_before: not_before.to_string(),
        });
    }

    let not_after = certificate.not_after();
    if not_after.compare(now).map_err(malformed)? == Ordering::Less {
        return Err(ChainError::Expired {
            certificate: position,
            not_after: not_after.to_string(),
        });
    }
    Ok(())
}

/// Render an X.509 name as `CN=..., O=...` for logs and errors
pub fn name_to_string(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .to_string()
                .unwrap_or_else(|_| hex::encode(entry.data().as_slice()));
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
