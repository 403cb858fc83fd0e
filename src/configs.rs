use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};

use crate::build_csr::SignatureAlgorithm;
use crate::generate_keypair::{RSA_KEY_SIZE_DEFAULT, RSA_KEY_SIZE_MINIMUM};
use crate::identity_name::DEFAULT_DOMAIN_SUFFIX;
use crate::trust_store::DEFAULT_TRUST_STORE_FILE;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub certificate_authority: CertificateAuthorityConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub truststore: Option<TruststoreConfig>,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    pub system_name: String,
    pub cloud_name: String,
    pub operator: String,
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,
}

fn default_domain_suffix() -> String {
    DEFAULT_DOMAIN_SUFFIX.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CertificateAuthorityConfig {
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeysConfig {
    #[serde(default = "default_bit_length")]
    pub bit_length: u32,
    #[serde(default = "default_minimum_bit_length")]
    pub minimum_bit_length: u32,
    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            bit_length: default_bit_length(),
            minimum_bit_length: default_minimum_bit_length(),
            signature_algorithm: SignatureAlgorithm::default(),
        }
    }
}

fn default_bit_length() -> u32 {
    RSA_KEY_SIZE_DEFAULT
}

fn default_minimum_bit_length() -> u32 {
    RSA_KEY_SIZE_MINIMUM
}

#[derive(Debug, Deserialize)]
pub struct KeystoreConfig {
    #[serde(default = "default_keystore_directory")]
    pub directory: PathBuf,
    /// Defaults to `<system_name>.p12`
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
    /// Environment variable holding the password
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_keystore_directory() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize)]
pub struct TruststoreConfig {
    #[serde(default = "default_truststore_file_name")]
    pub file_name: String,
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_truststore_file_name() -> String {
    DEFAULT_TRUST_STORE_FILE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_check_validity")]
    pub check_validity: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_validity: default_check_validity(),
        }
    }
}

fn default_check_validity() -> bool {
    true
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Resolve a password given inline or through an environment variable
pub fn resolve_password(
    section: &str,
    password: Option<&SecretString>,
    password_env: Option<&str>,
) -> Result<SecretString> {
    if let Some(password) = password {
        return Ok(SecretString::from(password.expose_secret().to_string()));
    }
    if let Some(variable) = password_env {
        let value = std::env::var(variable).with_context(|| {
            format!(
                "[{}] password_env names {} but it is not set",
                section, variable
            )
        })?;
        return Ok(SecretString::from(value));
    }
    bail!("[{}] needs either `password` or `password_env`", section)
}

impl KeystoreConfig {
    pub fn password(&self) -> Result<SecretString> {
        resolve_password("keystore", self.password.as_ref(), self.password_env.as_deref())
    }

    /// Store path for the given system name
    pub fn path_for(&self, system_name: &str) -> PathBuf {
        let file_name = self
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}.p12", system_name));
        self.directory.join(file_name)
    }
}

impl TruststoreConfig {
    pub fn password(&self) -> Result<SecretString> {
        resolve_password("truststore", self.password.as_ref(), self.password_env.as_deref())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(config_str).context("Failed to parse config file")?;
        config.check()?;
        Ok(config)
    }

    /// Load configuration with default path (config.toml)
    pub fn load() -> Result<Self> {
        Self::from_file(DEFAULT_CONFIG_PATH)
    }

    fn check(&self) -> Result<()> {
        if self.certificate_authority.timeout_secs == 0 {
            bail!("[certificate_authority] timeout_secs must be greater than zero");
        }
        if self.certificate_authority.url.trim().is_empty() {
            bail!("[certificate_authority] url must not be empty");
        }
        Ok(())
    }

    /// Credential store path
    pub fn keystore_path(&self) -> PathBuf {
        self.keystore.path_for(&self.identity.system_name)
    }

    /// Trust store path, when a `[truststore]` section is present
    pub fn truststore_path(&self) -> Option<PathBuf> {
        self.truststore
            .as_ref()
            .map(|truststore| self.keystore.directory.join(&truststore.file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[identity]
system_name = "sysA"
cloud_name = "cloudB"
operator = "opC"

[certificate_authority]
url = "http://127.0.0.1:8458/ca"

[keystore]
password = "123456"
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.identity.domain_suffix, "arrowhead.eu");
        assert_eq!(config.certificate_authority.timeout_secs, 30);
        assert_eq!(config.keys.bit_length, 2048);
        assert_eq!(config.keys.minimum_bit_length, 2048);
        assert_eq!(
            config.keys.signature_algorithm,
            SignatureAlgorithm::Sha512WithRsa
        );
        assert!(config.validation.check_validity);
        assert!(config.truststore.is_none());
        assert_eq!(config.keystore_path(), PathBuf::from("./sysA.p12"));
        assert_eq!(config.keystore.password().unwrap().expose_secret(), "123456");
    }

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_toml_str(
            r#"
[identity]
system_name = "sysA"
cloud_name = "cloudB"
operator = "opC"
domain_suffix = "example.org"

[certificate_authority]
url = "https://ca.example.org/ca"
timeout_secs = 5

[keys]
bit_length = 4096
signature_algorithm = "SHA256withRSA"

[keystore]
directory = "certificates"
file_name = "system.p12"
password = "pw"

[truststore]
password = "trust"

[validation]
check_validity = false
"#,
        )
        .unwrap();

        assert_eq!(config.keys.bit_length, 4096);
        assert_eq!(
            config.keys.signature_algorithm,
            SignatureAlgorithm::Sha256WithRsa
        );
        assert!(!config.validation.check_validity);
        assert_eq!(config.keystore_path(), PathBuf::from("certificates/system.p12"));
        assert_eq!(
            config.truststore_path(),
            Some(PathBuf::from("certificates/truststore.p12"))
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = MINIMAL.replace(
            "url = \"http://127.0.0.1:8458/ca\"",
            "url = \"http://127.0.0.1:8458/ca\"\ntimeout_secs = 0",
        );
        assert!(AppConfig::from_toml_str(&config).is_err());
    }

    #[test]
    fn test_password_from_environment() {
        let config = MINIMAL.replace(
            "password = \"123456\"",
            "password_env = \"CERT_ENROLL_TEST_KEYSTORE_PASSWORD\"",
        );
        let config = AppConfig::from_toml_str(&config).unwrap();
        assert!(config.keystore.password().is_err());

        std::env::set_var("CERT_ENROLL_TEST_KEYSTORE_PASSWORD", "from-env");
        assert_eq!(
            config.keystore.password().unwrap().expose_secret(),
            "from-env"
        );
        std::env::remove_var("CERT_ENROLL_TEST_KEYSTORE_PASSWORD");
    }

    #[test]
    fn test_missing_password_is_error() {
        let config = MINIMAL.replace("password = \"123456\"", "");
        let config = AppConfig::from_toml_str(&config).unwrap();
        assert!(config.keystore.password().is_err());
    }

    #[test]
    fn test_debug_no_leak() {
        let config = AppConfig::from_toml_str(MINIMAL).unwrap();
        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("123456"));
    }
}
