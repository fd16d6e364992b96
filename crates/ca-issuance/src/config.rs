//! Serde-deserializable configuration of a [`CertificateAuthority`](crate::ca::CertificateAuthority).
//!
//! ```yaml
//! serialPrefix: 17
//! maxNames: 2
//! expiry: 90d
//! lifespanOcsp: 96h
//! enableMustStaple: true
//! rsaProfile: rsaEE
//! ecdsaProfile: ecdsaEE
//! profiles:
//!   rsaEE:
//!     keyUsages: [digitalSignature, keyEncipherment]
//!     extKeyUsages: [serverAuth, clientAuth]
//!     allowedExtensions: ["1.3.6.1.5.5.7.1.24"]
//!   ecdsaEE:
//!     keyUsages: [digitalSignature]
//!     extKeyUsages: [serverAuth, clientAuth]
//! ```
use std::collections::BTreeMap;

use ca_shared::time::Duration;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

/// The default lifetime of OCSP responses.
pub const DEFAULT_OCSP_LIFESPAN: Duration = Duration::from_hours_unchecked(96);

/// The default amount of time notBefore is moved into the past.
pub const DEFAULT_BACKDATE: Duration = Duration::from_hours_unchecked(1);

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to parse CA configuration from YAML"))]
    ParseYaml { source: serde_yaml::Error },

    #[snafu(display("failed to read CA configuration from {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaConfig {
    /// The first byte of every serial number. Must be non-zero.
    pub serial_prefix: u8,

    /// The maximum number of distinct names a certificate may contain. Must
    /// be non-zero.
    pub max_names: usize,

    /// Lifetime of issued certificates, unless overridden by the profile.
    pub expiry: Duration,

    #[serde(default = "default_ocsp_lifespan")]
    pub lifespan_ocsp: Duration,

    #[serde(default)]
    pub enable_must_staple: bool,

    /// Promote the first DNS name to the common name if the CSR has none.
    #[serde(default = "default_true")]
    pub force_cn_from_san: bool,

    /// Name of the profile in [`Self::profiles`] used for RSA keys.
    pub rsa_profile: String,

    /// Name of the profile in [`Self::profiles`] used for ECDSA keys.
    pub ecdsa_profile: String,

    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl CaConfig {
    #[instrument(name = "parse_ca_config", skip(input))]
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(input).context(ParseYamlSnafu)
    }

    pub async fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = tokio::fs::read_to_string(path)
            .await
            .context(ReadFileSnafu { path })?;

        Self::from_yaml_str(&input)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    pub key_usages: Vec<KeyUsageName>,

    #[serde(default)]
    pub ext_key_usages: Vec<ExtKeyUsageName>,

    /// Certificate policy OIDs in dotted notation.
    #[serde(default)]
    pub policies: Vec<String>,

    /// URLs for the CA issuers access method of the AIA extension.
    #[serde(default)]
    pub issuer_urls: Vec<String>,

    #[serde(default)]
    pub ocsp_url: Option<String>,

    #[serde(default)]
    pub crl_url: Option<String>,

    /// Overrides [`CaConfig::expiry`] for this profile.
    #[serde(default)]
    pub expiry: Option<Duration>,

    #[serde(default = "default_backdate")]
    pub backdate: Duration,

    #[serde(default)]
    pub csr_whitelist: CsrWhitelist,

    /// OIDs of requested CSR extensions which are carried into the
    /// certificate.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

/// Controls which parts of the CSR are taken over into the certificate.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CsrWhitelist {
    #[serde(default = "default_true")]
    pub public_key: bool,

    /// Copy subject attributes other than the common name and serial number.
    #[serde(default)]
    pub subject: bool,
}

impl Default for CsrWhitelist {
    fn default() -> Self {
        Self {
            public_key: true,
            subject: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum KeyUsageName {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    #[serde(rename = "cRLSign")]
    #[strum(serialize = "cRLSign")]
    CrlSign,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ExtKeyUsageName {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    #[serde(rename = "OCSPSigning")]
    #[strum(serialize = "OCSPSigning")]
    OcspSigning,
}

const fn default_true() -> bool {
    true
}

const fn default_ocsp_lifespan() -> Duration {
    DEFAULT_OCSP_LIFESPAN
}

const fn default_backdate() -> Duration {
    DEFAULT_BACKDATE
}
