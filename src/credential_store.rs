//! Credential Store Writer
//!
//! Persists the private key and the validated chain as a password-protected
//! PKCS#12 container:
//!
//! ```text
//! <system_name>.p12
//!   key entry  alias = identity name
//!     private key
//!     certificate        leaf
//!     ca certificates    intermediate, root
//! ```
//!
//! Writes are atomic: the container goes to a temporary file in the
//! destination directory, is synced, then renamed over the destination. A
//! failed run leaves the previous file (or no file) in place.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::enrollment::CertificateChain;
use crate::error::StoreError;
use crate::generate_keypair::KeyPair;
use crate::identity_name::IdentityName;
use crate::validate_chain::ValidatedChain;

/// Write the key entry for `identity_name` to `destination`
///
/// # Arguments
/// * `identity_name` - Alias (friendly name) of the key entry
/// * `keypair` - Key pair the leaf certificate was issued for
/// * `validated_chain` - Output of [`crate::validate_chain::validate_chain`]
/// * `passphrase` - Container password
/// * `destination` - Store file; replaced atomically if it exists
///
/// # Errors
/// - [`StoreError::StoreCreationFailure`] if the container cannot be built
/// - [`StoreError::WriteFailure`] on I/O errors
pub fn persist(
    identity_name: &IdentityName,
    keypair: &KeyPair,
    validated_chain: &ValidatedChain,
    passphrase: &SecretString,
    destination: &Path,
) -> Result<(), StoreError> {
    let der = credential_der(identity_name, keypair, validated_chain, passphrase)?;
    write_atomically(destination, &der)?;

    info!(
        alias = %identity_name,
        path = %destination.display(),
        bytes = der.len(),
        "credential store written"
    );
    Ok(())
}

/// Encode the key entry as PKCS#12 DER without touching the filesystem
pub fn credential_der(
    identity_name: &IdentityName,
    keypair: &KeyPair,
    validated_chain: &ValidatedChain,
    passphrase: &SecretString,
) -> Result<Vec<u8>, StoreError> {
    let mut ca_certs = Stack::new().map_err(creation_failure)?;
    ca_certs
        .push(validated_chain.intermediate().clone())
        .map_err(creation_failure)?;
    ca_certs
        .push(validated_chain.root().clone())
        .map_err(creation_failure)?;

    let pkcs12 = Pkcs12::builder()
        .name(&identity_name.common_name())
        .pkey(keypair.private_key())
        .cert(validated_chain.leaf())
        .ca(ca_certs)
        .build2(passphrase.expose_secret())
        .map_err(creation_failure)?;
    pkcs12.to_der().map_err(creation_failure)
}

pub(crate) fn creation_failure(e: openssl::error::ErrorStack) -> StoreError {
    StoreError::StoreCreationFailure(e.to_string())
}

/// Replace `destination` with `bytes` via a synced temporary file and a rename
pub(crate) fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    StagedWrite::new(destination, bytes)?.commit()
}

/// Store contents synced to a temporary file, not yet visible at the destination
///
/// The temporary file lives next to the destination so the rename in
/// [`StagedWrite::commit`] never crosses filesystems. Dropping an uncommitted
/// write removes the temporary file.
pub struct StagedWrite {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl StagedWrite {
    pub fn new(destination: &Path, bytes: &[u8]) -> Result<Self, StoreError> {
        let directory = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp =
            NamedTempFile::new_in(directory).map_err(|e| write_failure(destination, e))?;
        temp.write_all(bytes)
            .map_err(|e| write_failure(destination, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| write_failure(destination, e))?;
        debug!(temp = %temp.path().display(), "temporary store synced");

        Ok(Self {
            temp,
            destination: destination.to_path_buf(),
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Rename the temporary file over the destination
    pub fn commit(self) -> Result<(), StoreError> {
        let Self { temp, destination } = self;
        temp.persist(&destination)
            .map_err(|e| write_failure(&destination, e.error))?;
        Ok(())
    }
}

fn write_failure(destination: &Path, source: std::io::Error) -> StoreError {
    StoreError::WriteFailure {
        path: destination.to_path_buf(),
        source,
    }
}

/// A credential store read back from disk
pub struct Credential {
    alias: Option<String>,
    private_key: PKey<Private>,
    chain: CertificateChain,
}

impl Credential {
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("alias", &self.alias)
            .field("private_key", &"<redacted>")
            .field("chain", &self.chain)
            .finish()
    }
}

/// Load and decrypt a credential store written by [`persist`]
///
/// The CA certificates are put back into `[intermediate, root]` order by
/// subject/issuer matching, since PKCS#12 does not guarantee their order.
///
/// # Errors
/// [`StoreError::LoadFailure`] for unreadable files, wrong passphrases and
/// containers missing the key, the leaf or either CA certificate.
pub fn load_credential(path: &Path, passphrase: &SecretString) -> Result<Credential, StoreError> {
    let load_failure = |reason: String| StoreError::LoadFailure {
        path: path.to_path_buf(),
        reason,
    };

    let der = std::fs::read(path).map_err(|e| load_failure(e.to_string()))?;
    let parsed = Pkcs12::from_der(&der)
        .and_then(|pkcs12| pkcs12.parse2(passphrase.expose_secret()))
        .map_err(|_| load_failure("invalid container or wrong passphrase".to_string()))?;

    let private_key = parsed
        .pkey
        .ok_or_else(|| load_failure("no private key entry".to_string()))?;
    let leaf = parsed
        .cert
        .ok_or_else(|| load_failure("no certificate in key entry".to_string()))?;
    let ca_certs: Vec<X509> = parsed
        .ca
        .map(|stack| stack.into_iter().collect())
        .unwrap_or_default();

    let key_matches = leaf
        .public_key()
        .map(|public_key| public_key.public_eq(&private_key))
        .unwrap_or(false);
    if !key_matches {
        return Err(load_failure(
            "private key does not match the leaf certificate".to_string(),
        ));
    }

    let alias = leaf
        .alias()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
    let chain = order_chain(leaf, ca_certs).map_err(load_failure)?;

    Ok(Credential {
        alias,
        private_key,
        chain,
    })
}

/// Rebuild `[leaf, intermediate, root]` from an unordered CA list
fn order_chain(leaf: X509, mut ca_certs: Vec<X509>) -> Result<CertificateChain, String> {
    let issued_by = |certificate: &X509, issuer: &X509| -> bool {
        match (
            certificate.issuer_name().to_der(),
            issuer.subject_name().to_der(),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    };

    let intermediate_index = ca_certs
        .iter()
        .position(|candidate| issued_by(&leaf, candidate))
        .ok_or_else(|| "no issuer of the leaf certificate in the store".to_string())?;
    let intermediate = ca_certs.swap_remove(intermediate_index);

    let root_index = ca_certs
        .iter()
        .position(|candidate| issued_by(&intermediate, candidate))
        .ok_or_else(|| "no issuer of the intermediate certificate in the store".to_string())?;
    let root = ca_certs.swap_remove(root_index);

    Ok(CertificateChain::new(leaf, intermediate, root))
}

/// Per-destination write locks shared by concurrent enrollment runs
#[derive(Debug, Clone, Default)]
pub struct DestinationLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl DestinationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding writes to `destination`
    pub fn lock_for(&self, destination: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(destination.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
