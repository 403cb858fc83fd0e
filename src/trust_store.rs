//! Trust Store Writer
//!
//! Writes the cloud (intermediate) certificate into its own PKCS#12 file as a
//! trusted certificate entry, keyed by the cloud common name. Peers of the
//! same cloud use it to authenticate each other. There is no private key in
//! this file.
//!
//! Same atomic write rules as the credential store.

use std::path::Path;

use openssl::pkcs12::Pkcs12;
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::credential_store::{creation_failure, write_atomically};
use crate::error::StoreError;
use crate::validate_chain::ValidatedChain;

pub const DEFAULT_TRUST_STORE_FILE: &str = "truststore.p12";

/// A trusted certificate read back from a trust store
#[derive(Debug, Clone)]
pub struct TrustedCertificate {
    pub alias: Option<String>,
    pub certificate: X509,
}

/// Write the chain's intermediate certificate under `cloud_common_name`
///
/// # Errors
/// - [`StoreError::StoreCreationFailure`] if the container cannot be built
/// - [`StoreError::WriteFailure`] on I/O errors
pub fn persist_trust_store(
    cloud_common_name: &str,
    validated_chain: &ValidatedChain,
    passphrase: &SecretString,
    destination: &Path,
) -> Result<(), StoreError> {
    let der = trust_store_der(cloud_common_name, validated_chain, passphrase)?;
    write_atomically(destination, &der)?;

    info!(
        alias = %cloud_common_name,
        path = %destination.display(),
        "trust store written"
    );
    Ok(())
}

/// Encode the trusted certificate entry as PKCS#12 DER
pub fn trust_store_der(
    cloud_common_name: &str,
    validated_chain: &ValidatedChain,
    passphrase: &SecretString,
) -> Result<Vec<u8>, StoreError> {
    let pkcs12 = Pkcs12::builder()
        .name(cloud_common_name)
        .cert(validated_chain.intermediate())
        .build2(passphrase.expose_secret())
        .map_err(creation_failure)?;
    pkcs12.to_der().map_err(creation_failure)
}

/// Load every certificate of a trust store
///
/// # Errors
/// [`StoreError::LoadFailure`] for unreadable files, wrong passphrases and
/// stores holding no certificate.
pub fn load_trust_store(
    path: &Path,
    passphrase: &SecretString,
) -> Result<Vec<TrustedCertificate>, StoreError> {
    let load_failure = |reason: &str| StoreError::LoadFailure {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let der = std::fs::read(path).map_err(|e| load_failure(&e.to_string()))?;
    let parsed = Pkcs12::from_der(&der)
        .and_then(|pkcs12| pkcs12.parse2(passphrase.expose_secret()))
        .map_err(|_| load_failure("invalid container or wrong passphrase"))?;

    // Without a key entry the certificate may come back as either `cert` or `ca`
    let certificates: Vec<TrustedCertificate> = parsed
        .cert
        .into_iter()
        .chain(parsed.ca.into_iter().flatten())
        .map(|certificate| TrustedCertificate {
            alias: certificate
                .alias()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
            certificate,
        })
        .collect();

    if certificates.is_empty() {
        return Err(load_failure("no trusted certificate entry"));
    }
    Ok(certificates)
}
