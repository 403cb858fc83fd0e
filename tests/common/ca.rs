//! In-process three-tier test CA
//!
//! ```text
//! Root CA (self-signed, pathlen=1)
//!   └── Cloud (intermediate) CA (signed by Root, pathlen=0)
//!       └── System certificate (signed by the cloud CA from a PKCS#10 request)
//! ```
//!
//! Only depends on `openssl` and `base64` so both the unit tests (through
//! `#[path]`) and the integration tests can include it.

#![allow(dead_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509Req, X509};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const TEST_KEY_SIZE: u32 = 2048;
const DAY_SECS: i64 = 86_400;

pub const ROOT_COMMON_NAME: &str = "arrowhead.eu";
pub const CLOUD_COMMON_NAME: &str = "cloudB.opC.arrowhead.eu";

/// Validity window expressed relative to now, in days
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub from_days: i64,
    pub to_days: i64,
}

impl Window {
    pub const CURRENT: Window = Window {
        from_days: -1,
        to_days: 365,
    };
    pub const EXPIRED: Window = Window {
        from_days: -30,
        to_days: -1,
    };
    pub const FUTURE: Window = Window {
        from_days: 10,
        to_days: 400,
    };
}

pub struct TestCa {
    pub root_key: PKey<Private>,
    pub root_cert: X509,
    pub intermediate_key: PKey<Private>,
    pub intermediate_cert: X509,
}

impl TestCa {
    pub fn new() -> Self {
        Self::build(ROOT_COMMON_NAME, CLOUD_COMMON_NAME, Window::CURRENT)
    }

    /// Same shape, different names (for issuer mismatch cases)
    pub fn named(root_cn: &str, cloud_cn: &str) -> Self {
        Self::build(root_cn, cloud_cn, Window::CURRENT)
    }

    /// Intermediate whose validity window has already elapsed
    pub fn with_expired_intermediate() -> Self {
        Self::build(ROOT_COMMON_NAME, CLOUD_COMMON_NAME, Window::EXPIRED)
    }

    pub fn with_intermediate_window(window: Window) -> Self {
        Self::build(ROOT_COMMON_NAME, CLOUD_COMMON_NAME, window)
    }

    fn build(root_cn: &str, cloud_cn: &str, intermediate_window: Window) -> Self {
        let root_key = generate_key();
        let root_name = name(root_cn);
        let root_cert = issue(
            &root_name,
            &root_key,
            &root_name,
            &root_key,
            Window {
                from_days: -1,
                to_days: 3650,
            },
            Some(1),
        );

        let intermediate_key = generate_key();
        let intermediate_cert = issue(
            &name(cloud_cn),
            &intermediate_key,
            root_cert.subject_name(),
            &root_key,
            intermediate_window,
            Some(0),
        );

        Self {
            root_key,
            root_cert,
            intermediate_key,
            intermediate_cert,
        }
    }

    /// Issue a system certificate for a PKCS#10 request
    pub fn sign_request(&self, request: &X509Req) -> X509 {
        let public_key = request.public_key().expect("request public key");
        let mut builder = X509::builder().unwrap();
        builder.set_version(X509_VERSION_3).unwrap();
        builder.set_serial_number(&serial()).unwrap();
        builder.set_subject_name(request.subject_name()).unwrap();
        builder
            .set_issuer_name(self.intermediate_cert.subject_name())
            .unwrap();
        set_window(&mut builder, Window::CURRENT);
        builder.set_pubkey(&public_key).unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .key_encipherment()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder
            .sign(&self.intermediate_key, MessageDigest::sha256())
            .unwrap();
        builder.build()
    }

    /// Issue a system certificate for a base64 DER request, as the CA receives it
    pub fn sign_encoded_request(&self, encoded_request: &str) -> X509 {
        let der = STANDARD.decode(encoded_request).expect("base64 request");
        let request = X509Req::from_der(&der).expect("DER request");
        self.sign_request(&request)
    }

    /// Issue a leaf for an arbitrary key, bypassing the request
    pub fn issue_leaf<T: HasPublic>(&self, common_name: &str, public_key: &PKeyRef<T>) -> X509 {
        issue(
            &name(common_name),
            public_key,
            self.intermediate_cert.subject_name(),
            &self.intermediate_key,
            Window::CURRENT,
            None,
        )
    }

    /// Root with its own subject and key but naming `issuer_cn` as issuer
    pub fn root_issued_by(&self, issuer_cn: &str) -> X509 {
        issue(
            self.root_cert.subject_name(),
            &self.root_key,
            &name(issuer_cn),
            &self.root_key,
            Window::CURRENT,
            Some(1),
        )
    }

    /// Self-issued root carrying the root key but signed by `signing_key`
    pub fn root_signed_by(&self, signing_key: &PKeyRef<Private>) -> X509 {
        issue(
            self.root_cert.subject_name(),
            &self.root_key,
            self.root_cert.subject_name(),
            signing_key,
            Window::CURRENT,
            Some(1),
        )
    }
}

impl Default for TestCa {
    fn default() -> Self {
        Self::new()
    }
}

/// Base64 of the certificate DER, the CA wire encoding
pub fn encode(certificate: &X509) -> String {
    STANDARD.encode(certificate.to_der().unwrap())
}

pub fn generate_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(TEST_KEY_SIZE).unwrap()).unwrap()
}

fn name(common_name: &str) -> X509Name {
    let mut name_builder = X509Name::builder().unwrap();
    name_builder
        .append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    name_builder.build()
}

fn serial() -> openssl::asn1::Asn1Integer {
    // Random 128-bit serial number
    let mut serial = BigNum::new().unwrap();
    serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
    serial.to_asn1_integer().unwrap()
}

fn set_window(builder: &mut openssl::x509::X509Builder, window: Window) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let not_before = Asn1Time::from_unix(now + window.from_days * DAY_SECS).unwrap();
    let not_after = Asn1Time::from_unix(now + window.to_days * DAY_SECS).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();
}

fn issue<T: HasPublic>(
    subject: &openssl::x509::X509NameRef,
    subject_key: &PKeyRef<T>,
    issuer: &openssl::x509::X509NameRef,
    signing_key: &PKeyRef<Private>,
    window: Window,
    ca_pathlen: Option<u32>,
) -> X509 {
    let mut builder = X509::builder().unwrap();
    builder.set_version(X509_VERSION_3).unwrap();
    builder.set_serial_number(&serial()).unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    set_window(&mut builder, window);
    builder.set_pubkey(subject_key).unwrap();

    match ca_pathlen {
        Some(pathlen) => {
            builder
                .append_extension(
                    BasicConstraints::new()
                        .critical()
                        .ca()
                        .pathlen(pathlen)
                        .build()
                        .unwrap(),
                )
                .unwrap();
            builder
                .append_extension(
                    KeyUsage::new()
                        .critical()
                        .key_cert_sign()
                        .crl_sign()
                        .digital_signature()
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        None => {
            builder
                .append_extension(BasicConstraints::new().critical().build().unwrap())
                .unwrap();
        }
    }

    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}
