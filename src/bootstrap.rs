//! Enrollment Flow
//!
//! Runs the enrollment stages for one identity, strictly in order:
//!
//! ```text
//! generate_keypair → build_csr → enroll (CA) → validate_chain → persist
//!                                                              → persist_trust_store
//! ```
//!
//! Each stage consumes the previous stage's output only. Nothing is written
//! before the chain validates and the leaf is tied to the generated key, so a
//! run abandoned or failed earlier leaves no file behind.
//!
//! With a trust store configured, both containers are encoded and staged
//! before either is renamed into place. If the trust store rename still
//! fails, the previous credential store is put back.
//!
//! Runs for different identities share no state except the
//! [`DestinationLocks`] registry. [`provision_batch`] runs one scoped thread
//! per identity.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use anyhow::{Context, Result};
use openssl::error::ErrorStack;
use openssl::x509::X509;
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::build_csr::{build_csr, SignatureAlgorithm};
use crate::configs::AppConfig;
use crate::credential_store::{self, DestinationLocks, StagedWrite};
use crate::enrollment::{enroll, EnrollmentTransport};
use crate::error::{ChainError, ChainPosition, EnrollError, StoreError};
use crate::generate_keypair::{generate_keypair, KeyPair};
use crate::identity_name::IdentityName;
use crate::trust_store;
use crate::validate_chain::{
    check_leaf_key, name_to_string, validate_chain, ValidatedChain, ValidationOptions,
};

/// Trust store destination and password
#[derive(Debug)]
pub struct TrustStoreSettings {
    pub path: PathBuf,
    pub password: SecretString,
}

/// Everything one enrollment run needs, passed explicitly
#[derive(Debug)]
pub struct EnrollmentSettings {
    pub identity_name: IdentityName,
    pub bit_length: u32,
    pub minimum_bit_length: u32,
    pub signature_algorithm: SignatureAlgorithm,
    pub validation: ValidationOptions,
    pub keystore_path: PathBuf,
    pub keystore_password: SecretString,
    pub truststore: Option<TrustStoreSettings>,
}

impl EnrollmentSettings {
    /// Settings with default key parameters and validation
    pub fn new(
        identity_name: IdentityName,
        keystore_path: impl Into<PathBuf>,
        keystore_password: SecretString,
    ) -> Self {
        let keys = crate::configs::KeysConfig::default();
        Self {
            identity_name,
            bit_length: keys.bit_length,
            minimum_bit_length: keys.minimum_bit_length,
            signature_algorithm: keys.signature_algorithm,
            validation: ValidationOptions::default(),
            keystore_path: keystore_path.into(),
            keystore_password,
            truststore: None,
        }
    }

    /// Build settings from the loaded configuration
    ///
    /// Resolves passwords (inline or from the environment) and validates the
    /// identity attributes.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let identity = &config.identity;
        let identity_name = IdentityName::new(
            identity.system_name.as_str(),
            identity.cloud_name.as_str(),
            identity.operator.as_str(),
            identity.domain_suffix.as_str(),
        )
        .context("Invalid [identity] section")?;

        let keystore_password = config.keystore.password()?;

        let truststore = match (&config.truststore, config.truststore_path()) {
            (Some(truststore), Some(path)) => Some(TrustStoreSettings {
                path,
                password: truststore.password()?,
            }),
            _ => None,
        };

        Ok(Self {
            identity_name,
            bit_length: config.keys.bit_length,
            minimum_bit_length: config.keys.minimum_bit_length,
            signature_algorithm: config.keys.signature_algorithm,
            validation: ValidationOptions {
                check_validity: config.validation.check_validity,
                at: None,
            },
            keystore_path: config.keystore_path(),
            keystore_password,
            truststore,
        })
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentOutcome {
    pub identity_name: String,
    pub keystore_path: PathBuf,
    pub truststore_path: Option<PathBuf>,
    /// SHA-256 over the leaf certificate DER, lowercase hex
    pub leaf_fingerprint: String,
    pub leaf_not_after: String,
}

/// SHA-256 fingerprint of a certificate's DER encoding
pub fn fingerprint_sha256(certificate: &X509) -> Result<String, ErrorStack> {
    let der = certificate.to_der()?;
    let mut hasher = Sha256::new();
    hasher.update(&der);
    Ok(hex::encode(hasher.finalize()))
}

/// Run the full enrollment flow for one identity
///
/// # Errors
/// The first failing stage's error, tagged via [`EnrollError::stage`].
pub fn run_enrollment<T>(
    settings: &EnrollmentSettings,
    transport: &T,
    locks: &DestinationLocks,
) -> Result<EnrollmentOutcome, EnrollError>
where
    T: EnrollmentTransport + ?Sized,
{
    let identity_name = &settings.identity_name;
    info!(identity = %identity_name, "starting enrollment");

    let keypair = generate_keypair(settings.bit_length, settings.minimum_bit_length)?;
    info!(identity = %identity_name, bits = keypair.bits(), "key pair generated");

    let certification_request = build_csr(identity_name, &keypair, settings.signature_algorithm)?;
    info!(
        identity = %identity_name,
        algorithm = %settings.signature_algorithm,
        "certification request built and self-verified"
    );

    let chain = enroll(transport, &certification_request)?;
    let validated_chain = validate_chain(chain, &settings.validation)?;
    check_leaf_key(&validated_chain, keypair.private_key())?;

    let leaf_fingerprint =
        fingerprint_sha256(validated_chain.leaf()).map_err(leaf_fingerprint_failure)?;
    info!(
        identity = %identity_name,
        issuer = %name_to_string(validated_chain.leaf().issuer_name()),
        fingerprint = %leaf_fingerprint,
        "certificate chain validated"
    );

    persist_stores(settings, &keypair, &validated_chain, locks)?;

    info!(
        identity = %identity_name,
        keystore = %settings.keystore_path.display(),
        "enrollment complete"
    );

    Ok(EnrollmentOutcome {
        identity_name: identity_name.common_name(),
        keystore_path: settings.keystore_path.clone(),
        truststore_path: settings.truststore.as_ref().map(|t| t.path.clone()),
        leaf_fingerprint,
        leaf_not_after: validated_chain.leaf().not_after().to_string(),
    })
}

fn leaf_fingerprint_failure(e: ErrorStack) -> ChainError {
    ChainError::MalformedCertificate {
        certificate: ChainPosition::Leaf,
        reason: format!("fingerprint cannot be computed: {}", e),
    }
}

/// Write the credential store and, if configured, the trust store
///
/// Both containers are encoded and staged next to their destinations under
/// the destination locks before the first rename. A failed trust store
/// rename restores the previous credential store, or removes the new one if
/// there was none.
fn persist_stores(
    settings: &EnrollmentSettings,
    keypair: &KeyPair,
    validated_chain: &ValidatedChain,
    locks: &DestinationLocks,
) -> Result<(), StoreError> {
    let identity_name = &settings.identity_name;
    let keystore_der = credential_store::credential_der(
        identity_name,
        keypair,
        validated_chain,
        &settings.keystore_password,
    )?;
    let truststore_der = match &settings.truststore {
        Some(truststore) => Some(trust_store::trust_store_der(
            &identity_name.cloud_common_name(),
            validated_chain,
            &truststore.password,
        )?),
        None => None,
    };

    let mut destinations = vec![settings.keystore_path.as_path()];
    if let Some(truststore) = &settings.truststore {
        destinations.push(truststore.path.as_path());
    }
    // Fixed order so runs sharing both destinations cannot deadlock
    destinations.sort();
    destinations.dedup();
    let handles: Vec<_> = destinations
        .iter()
        .map(|destination| locks.lock_for(destination))
        .collect();
    let _guards: Vec<MutexGuard<'_, ()>> = handles
        .iter()
        .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
        .collect();

    let staged_keystore = StagedWrite::new(&settings.keystore_path, &keystore_der)?;
    let staged_truststore = match (&settings.truststore, &truststore_der) {
        (Some(truststore), Some(der)) => Some(StagedWrite::new(&truststore.path, der)?),
        _ => None,
    };

    let previous_keystore = read_existing(&settings.keystore_path)?;
    staged_keystore.commit()?;
    info!(
        alias = %identity_name,
        path = %settings.keystore_path.display(),
        bytes = keystore_der.len(),
        "credential store written"
    );

    if let Some(staged) = staged_truststore {
        let truststore_path = staged.destination().to_path_buf();
        if let Err(e) = staged.commit() {
            restore_keystore(&settings.keystore_path, previous_keystore);
            return Err(e);
        }
        info!(
            alias = %identity_name.cloud_common_name(),
            path = %truststore_path.display(),
            "trust store written"
        );
    }
    Ok(())
}

fn read_existing(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::WriteFailure {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn restore_keystore(path: &Path, previous: Option<Vec<u8>>) {
    let restored = match previous {
        Some(bytes) => StagedWrite::new(path, &bytes).and_then(StagedWrite::commit),
        None => std::fs::remove_file(path).map_err(|source| StoreError::WriteFailure {
            path: path.to_path_buf(),
            source,
        }),
    };
    match restored {
        Ok(()) => warn!(path = %path.display(), "credential store rolled back"),
        Err(e) => error!(path = %path.display(), error = %e, "credential store rollback failed"),
    }
}

/// Enroll several identities concurrently, one scoped thread each
///
/// Results come back in input order. One identity failing does not affect
/// the others.
pub fn provision_batch<T>(
    settings: &[EnrollmentSettings],
    transport: &T,
    locks: &DestinationLocks,
) -> Vec<Result<EnrollmentOutcome, EnrollError>>
where
    T: EnrollmentTransport + Sync + ?Sized,
{
    let results: Vec<Mutex<Option<Result<EnrollmentOutcome, EnrollError>>>> =
        settings.iter().map(|_| Mutex::new(None)).collect();

    thread::scope(|scope| {
        for (settings, slot) in settings.iter().zip(&results) {
            scope.spawn(move || {
                let result = run_enrollment(settings, transport, locks);
                if let Err(e) = &result {
                    error!(
                        identity = %settings.identity_name,
                        stage = %e.stage(),
                        error = %e,
                        "enrollment failed"
                    );
                }
                *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result);
            });
        }
    });

    results
        .into_iter()
        .zip(settings)
        .map(|(slot, settings)| {
            slot.into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .unwrap_or_else(|| {
                    Err(StoreError::StoreCreationFailure(format!(
                        "enrollment worker for {} did not finish",
                        settings.identity_name
                    ))
                    .into())
                })
        })
        .collect()
}
