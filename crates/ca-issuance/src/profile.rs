//! Validated signing profiles and the selection of a profile based on the
//! algorithm of the requested public key.
use ca_shared::time::Duration;
use const_oid::{
    ObjectIdentifier,
    db::{
        rfc5280::{
            ID_KP_CLIENT_AUTH, ID_KP_CODE_SIGNING, ID_KP_EMAIL_PROTECTION, ID_KP_OCSP_SIGNING,
            ID_KP_SERVER_AUTH, ID_KP_TIME_STAMPING,
        },
        rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION},
    },
};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::instrument;
use x509_cert::{
    der::asn1::Ia5String,
    ext::pkix::{KeyUsage, KeyUsages},
};

use crate::{
    config::{CaConfig, CsrWhitelist, ExtKeyUsageName, KeyUsageName, ProfileConfig},
    extensions::is_ca_managed,
};

pub type Result<T, E = ProfileError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum ProfileError {
    #[snafu(display("profile {name:?} is referenced but not defined"))]
    MissingProfile { name: String },

    #[snafu(display("profile {profile:?} contains no key usages"))]
    NoKeyUsages { profile: String },

    #[snafu(display("profile {profile:?} contains invalid OID {oid:?}"))]
    ParseOid {
        source: const_oid::Error,
        profile: String,
        oid: String,
    },

    #[snafu(display("profile {profile:?} contains URL {url:?} which is not a valid IA5 string"))]
    ParseUrl {
        source: x509_cert::der::Error,
        profile: String,
        url: String,
    },

    #[snafu(display("profile {profile:?} must whitelist the CSR public key"))]
    PublicKeyNotWhitelisted { profile: String },

    #[snafu(display(
        "profile {profile:?} allows extension {oid} which is managed by the CA itself"
    ))]
    CaManagedExtensionAllowed {
        profile: String,
        oid: ObjectIdentifier,
    },

    #[snafu(display("no profile supports public key algorithm {oid}"))]
    UnsupportedKeyAlgorithm { oid: ObjectIdentifier },
}

/// The public key algorithms profiles can be selected for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
}

impl KeyAlgorithm {
    pub fn from_oid(oid: ObjectIdentifier) -> Result<Self> {
        match oid {
            RSA_ENCRYPTION => Ok(Self::Rsa),
            ID_EC_PUBLIC_KEY => Ok(Self::Ecdsa),
            oid => UnsupportedKeyAlgorithmSnafu { oid }.fail(),
        }
    }
}

/// A named bundle of signing parameters, validated from a [`ProfileConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningProfile {
    name: String,
    key_usages: Vec<KeyUsages>,
    ext_key_usages: Vec<ObjectIdentifier>,
    policies: Vec<ObjectIdentifier>,
    issuer_urls: Vec<Ia5String>,
    ocsp_url: Option<Ia5String>,
    crl_url: Option<Ia5String>,
    expiry: Option<Duration>,
    backdate: Duration,
    csr_whitelist: CsrWhitelist,
    allowed_extensions: Vec<ObjectIdentifier>,
}

impl SigningProfile {
    #[instrument(name = "load_signing_profile", skip(config))]
    pub fn from_config(name: &str, config: &ProfileConfig) -> Result<Self> {
        ensure!(!config.key_usages.is_empty(), NoKeyUsagesSnafu {
            profile: name
        });
        ensure!(
            config.csr_whitelist.public_key,
            PublicKeyNotWhitelistedSnafu { profile: name }
        );

        let parse_oid = |oid: &String| {
            ObjectIdentifier::new(oid).context(ParseOidSnafu {
                profile: name,
                oid: oid.as_str(),
            })
        };
        let parse_url = |url: &String| {
            Ia5String::new(url).context(ParseUrlSnafu {
                profile: name,
                url: url.as_str(),
            })
        };

        let allowed_extensions = config
            .allowed_extensions
            .iter()
            .map(parse_oid)
            .collect::<Result<Vec<_>>>()?;

        if let Some(oid) = allowed_extensions.iter().find(|oid| is_ca_managed(oid)) {
            return CaManagedExtensionAllowedSnafu {
                profile: name,
                oid: *oid,
            }
            .fail();
        }

        Ok(Self {
            name: name.to_owned(),
            key_usages: config.key_usages.iter().copied().map(key_usage).collect(),
            ext_key_usages: config
                .ext_key_usages
                .iter()
                .copied()
                .map(ext_key_usage)
                .collect(),
            policies: config
                .policies
                .iter()
                .map(parse_oid)
                .collect::<Result<_>>()?,
            issuer_urls: config
                .issuer_urls
                .iter()
                .map(parse_url)
                .collect::<Result<_>>()?,
            ocsp_url: config.ocsp_url.as_ref().map(parse_url).transpose()?,
            crl_url: config.crl_url.as_ref().map(parse_url).transpose()?,
            expiry: config.expiry,
            backdate: config.backdate,
            csr_whitelist: config.csr_whitelist,
            allowed_extensions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key usage extension value. Profiles always contain at
    /// least one usage.
    pub fn key_usage(&self) -> KeyUsage {
        let mut usages = self.key_usages.iter().copied();
        let first = usages.next().unwrap_or(KeyUsages::DigitalSignature);

        KeyUsage(usages.fold(first.into(), |acc, usage| acc | usage))
    }

    pub fn ext_key_usages(&self) -> &[ObjectIdentifier] {
        &self.ext_key_usages
    }

    pub fn policies(&self) -> &[ObjectIdentifier] {
        &self.policies
    }

    pub fn issuer_urls(&self) -> &[Ia5String] {
        &self.issuer_urls
    }

    pub fn ocsp_url(&self) -> Option<&Ia5String> {
        self.ocsp_url.as_ref()
    }

    pub fn crl_url(&self) -> Option<&Ia5String> {
        self.crl_url.as_ref()
    }

    pub fn expiry(&self) -> Option<Duration> {
        self.expiry
    }

    pub fn backdate(&self) -> Duration {
        self.backdate
    }

    pub fn csr_whitelist(&self) -> CsrWhitelist {
        self.csr_whitelist
    }

    pub fn allowed_extensions(&self) -> &[ObjectIdentifier] {
        &self.allowed_extensions
    }
}

fn key_usage(name: KeyUsageName) -> KeyUsages {
    match name {
        KeyUsageName::DigitalSignature => KeyUsages::DigitalSignature,
        KeyUsageName::ContentCommitment => KeyUsages::NonRepudiation,
        KeyUsageName::KeyEncipherment => KeyUsages::KeyEncipherment,
        KeyUsageName::DataEncipherment => KeyUsages::DataEncipherment,
        KeyUsageName::KeyAgreement => KeyUsages::KeyAgreement,
        KeyUsageName::KeyCertSign => KeyUsages::KeyCertSign,
        KeyUsageName::CrlSign => KeyUsages::CRLSign,
    }
}

fn ext_key_usage(name: ExtKeyUsageName) -> ObjectIdentifier {
    match name {
        ExtKeyUsageName::ServerAuth => ID_KP_SERVER_AUTH,
        ExtKeyUsageName::ClientAuth => ID_KP_CLIENT_AUTH,
        ExtKeyUsageName::CodeSigning => ID_KP_CODE_SIGNING,
        ExtKeyUsageName::EmailProtection => ID_KP_EMAIL_PROTECTION,
        ExtKeyUsageName::TimeStamping => ID_KP_TIME_STAMPING,
        ExtKeyUsageName::OcspSigning => ID_KP_OCSP_SIGNING,
    }
}

/// Holds one [`SigningProfile`] per supported key algorithm.
#[derive(Clone, Debug)]
pub struct ProfileSelector {
    rsa: SigningProfile,
    ecdsa: SigningProfile,
}

impl ProfileSelector {
    pub fn new(rsa: SigningProfile, ecdsa: SigningProfile) -> Self {
        Self { rsa, ecdsa }
    }

    pub fn from_config(config: &CaConfig) -> Result<Self> {
        let load = |name: &String| {
            let profile = config
                .profiles
                .get(name)
                .context(MissingProfileSnafu { name: name.as_str() })?;
            SigningProfile::from_config(name, profile)
        };

        Ok(Self {
            rsa: load(&config.rsa_profile)?,
            ecdsa: load(&config.ecdsa_profile)?,
        })
    }

    pub fn select(&self, algorithm: KeyAlgorithm) -> &SigningProfile {
        match algorithm {
            KeyAlgorithm::Rsa => &self.rsa,
            KeyAlgorithm::Ecdsa => &self.ecdsa,
        }
    }

    /// Selects the profile for the algorithm identified by `oid`, which is
    /// usually the algorithm of a SubjectPublicKeyInfo.
    pub fn select_by_oid(&self, oid: ObjectIdentifier) -> Result<&SigningProfile> {
        KeyAlgorithm::from_oid(oid).map(|algorithm| self.select(algorithm))
    }
}
