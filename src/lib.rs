//! cert-enroll - Certificate Enrollment Library
//!
//! Obtains a signed identity for a system from an external Certificate
//! Authority and stores it as a password-protected credential that
//! TLS-terminating components can load. The library never issues
//! certificates itself and never performs a TLS handshake.
//!
//! # Overview
//!
//! ```text
//! generate_keypair ──► build_csr ──► enroll ──► validate_chain ──► persist
//!   RSA key pair       PKCS#10        CA          leaf, intermediate,  PKCS#12
//!                      self-verified  exchange    root checked         atomic write
//! ```
//!
//! The CA returns a three-tier chain:
//!
//! ```text
//! Root CA (self-signed)
//!   └── Cloud (intermediate) CA
//!       └── System certificate  CN=<system>.<cloud>.<operator>.<domain suffix>
//! ```
//!
//! # Quick Start
//!
//! ```bash
//! # Enroll using config.toml in the working directory
//! cert-enroll enroll
//!
//! # Check what was written
//! cert-enroll inspect
//! ```
//!
//! # As a Library
//!
//! ```no_run
//! use cert_enroll::bootstrap::{run_enrollment, EnrollmentSettings};
//! use cert_enroll::configs::AppConfig;
//! use cert_enroll::credential_store::DestinationLocks;
//! use cert_enroll::http_transport::HttpTransport;
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let settings = EnrollmentSettings::from_config(&config)?;
//!     let transport = HttpTransport::new(
//!         config.certificate_authority.url.clone(),
//!         Duration::from_secs(config.certificate_authority.timeout_secs),
//!     )?;
//!
//!     let outcome = run_enrollment(&settings, &transport, &DestinationLocks::new())?;
//!     println!("stored {} at {}", outcome.identity_name, outcome.keystore_path.display());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`identity_name`]: assembles and validates the distinguished name
//! - [`generate_keypair`]: RSA key pair generation with a size floor
//! - [`build_csr`]: signed, self-verified PKCS#10 requests
//! - [`protocol`]: CA request/response payloads and certificate decoding
//! - [`enrollment`]: the CA exchange behind the [`enrollment::EnrollmentTransport`] seam
//! - [`http_transport`]: blocking HTTP implementation of the transport
//! - [`validate_chain`]: issuer, signature and validity checks
//! - [`credential_store`]: atomic PKCS#12 credential store writes and reloads
//! - [`trust_store`]: PKCS#12 trust store holding the cloud certificate
//! - [`bootstrap`]: the whole flow for one identity or a batch
//! - [`configs`]: TOML configuration
//! - [`error`]: per-stage error types
//!
//! # Error Handling
//!
//! Every stage returns its own `thiserror` enum. [`error::EnrollError`] wraps
//! them and reports the failing [`error::Stage`] and whether an external
//! retry makes sense:
//!
//! ```no_run
//! # use cert_enroll::error::EnrollError;
//! # fn example(result: Result<(), EnrollError>) {
//! if let Err(e) = result {
//!     if e.is_retryable() {
//!         // CA unreachable or store not writable: try again later
//!     }
//!     eprintln!("{} failed: {}", e.stage(), e);
//! }
//! # }
//! ```
//!
//! # Security Considerations
//!
//! - Private keys and passphrases have redacted `Debug` output and are never logged.
//! - A certification request that fails self-verification is never sent.
//! - Nothing is written to disk before the returned chain validates.
//! - Store files are replaced by rename, never modified in place.

pub mod bootstrap;
pub mod build_csr;
pub mod configs;
pub mod credential_store;
pub mod enrollment;
pub mod error;
pub mod generate_keypair;
pub mod http_transport;
pub mod identity_name;
pub mod protocol;
pub mod trust_store;
pub mod validate_chain;

#[cfg(test)]
#[path = "../tests/common/ca.rs"]
mod test_ca;
