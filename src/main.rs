//! cert-enroll - Certificate Enrollment Client
//!
//! Enrolls this system with a Certificate Authority and writes the resulting
//! credential store. See the library documentation for the flow.
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success, store durably written |
//! | 2 | configuration |
//! | 3 | key generation or certification request |
//! | 4 | transport (retryable) |
//! | 5 | CA protocol or certificate decoding |
//! | 6 | chain validation |
//! | 7 | persistence |

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cert_enroll::bootstrap::{fingerprint_sha256, run_enrollment, EnrollmentSettings};
use cert_enroll::configs::{AppConfig, DEFAULT_CONFIG_PATH};
use cert_enroll::credential_store::{load_credential, DestinationLocks};
use cert_enroll::error::{EnrollError, EnrollmentError, TransportError};
use cert_enroll::http_transport::HttpTransport;
use cert_enroll::validate_chain::name_to_string;

const EXIT_CONFIG: u8 = 2;
const EXIT_LOCAL: u8 = 3;
const EXIT_TRANSPORT: u8 = 4;
const EXIT_PROTOCOL: u8 = 5;
const EXIT_CHAIN: u8 = 6;
const EXIT_PERSISTENCE: u8 = 7;

/// cert-enroll - obtain and store a CA-signed system certificate
#[derive(Parser, Debug)]
#[command(name = "cert-enroll", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a key, enroll with the CA and write the credential store
    Enroll,

    /// Reload the credential store and print its contents
    Inspect {
        /// Store to inspect instead of the configured one
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Ask the CA for the cloud common name it signs for
    CloudName,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cert_enroll=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %format!("{:#}", e), "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match cli.command {
        Commands::Enroll => enroll(&config),
        Commands::Inspect { path } => inspect(&config, path),
        Commands::CloudName => cloud_name(&config),
    }
}

fn transport(config: &AppConfig) -> Result<HttpTransport> {
    let authority = &config.certificate_authority;
    HttpTransport::new(
        authority.url.clone(),
        Duration::from_secs(authority.timeout_secs),
    )
    .context("Failed to create CA transport")
}

fn enroll(config: &AppConfig) -> ExitCode {
    let prepared = EnrollmentSettings::from_config(config)
        .and_then(|settings| Ok((settings, transport(config)?)));
    let (settings, transport) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            error!(error = %format!("{:#}", e), "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run_enrollment(&settings, &transport, &DestinationLocks::new()) {
        Ok(outcome) => {
            info!(
                identity = %outcome.identity_name,
                keystore = %outcome.keystore_path.display(),
                fingerprint = %outcome.leaf_fingerprint,
                not_after = %outcome.leaf_not_after,
                "credential store ready"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(
                stage = %e.stage(),
                retryable = e.is_retryable(),
                error = %e,
                "enrollment failed"
            );
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(error: &EnrollError) -> u8 {
    match error {
        EnrollError::Identity(_) => EXIT_CONFIG,
        EnrollError::KeyGeneration(_) | EnrollError::Csr(_) => EXIT_LOCAL,
        EnrollError::Enrollment(EnrollmentError::Transport(_)) => EXIT_TRANSPORT,
        EnrollError::Enrollment(_) => EXIT_PROTOCOL,
        EnrollError::Chain(_) => EXIT_CHAIN,
        EnrollError::Store(_) => EXIT_PERSISTENCE,
    }
}

fn inspect(config: &AppConfig, path: Option<PathBuf>) -> ExitCode {
    let path = path.unwrap_or_else(|| config.keystore_path());
    let password = match config.keystore.password() {
        Ok(password) => password,
        Err(e) => {
            error!(error = %format!("{:#}", e), "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let credential = match load_credential(&path, &password) {
        Ok(credential) => credential,
        Err(e) => {
            error!(error = %e, "failed to load credential store");
            return ExitCode::from(EXIT_PERSISTENCE);
        }
    };

    println!("=== Credential Store: {} ===", path.display());
    println!("Alias: {}", credential.alias().unwrap_or("<none>"));
    println!("Key:   RSA-{}", credential.private_key().bits());

    let chain = credential.chain();
    let labels = ["Leaf", "Intermediate", "Root"];
    for (label, certificate) in labels.iter().zip(chain.as_array()) {
        let fingerprint = match fingerprint_sha256(certificate) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                error!(error = %e, "failed to fingerprint certificate");
                return ExitCode::from(EXIT_PERSISTENCE);
            }
        };
        println!("\n{}:", label);
        println!("  Subject:     {}", name_to_string(certificate.subject_name()));
        println!("  Issuer:      {}", name_to_string(certificate.issuer_name()));
        println!("  Not Before:  {}", certificate.not_before());
        println!("  Not After:   {}", certificate.not_after());
        println!("  SHA-256:     {}", fingerprint);
    }

    ExitCode::SUCCESS
}

fn cloud_name(config: &AppConfig) -> ExitCode {
    let transport = match transport(config) {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %format!("{:#}", e), "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match transport.cloud_common_name() {
        Ok(name) => {
            println!("{}", name);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(url = %transport.url(), error = %e, "failed to query the CA");
            let code = match e {
                TransportError::Status(_) => EXIT_PROTOCOL,
                _ => EXIT_TRANSPORT,
            };
            ExitCode::from(code)
        }
    }
}
