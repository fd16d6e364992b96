//! Policy collaborators consulted before a certificate is issued.
//!
//! [`PolicyAuthority`] decides whether the CA is willing to issue for a set
//! of names, [`KeyPolicy`] whether a public key is acceptable. Both are
//! implemented outside of this crate, [`StandardKeyPolicy`] is provided as
//! a reasonable default.
use std::fmt::Debug;

use bon::Builder;
use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION};
use rsa::{RsaPublicKey, pkcs8::DecodePublicKey as _, traits::PublicKeyParts};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use x509_cert::{der::Encode, spki::SubjectPublicKeyInfoOwned};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PolicyError {
    #[snafu(display("policy forbids issuance for {name:?}: {reason}"))]
    Forbidden { name: String, reason: String },

    #[snafu(display("key algorithm {algorithm} is not allowed"))]
    KeyAlgorithmNotAllowed { algorithm: String },

    #[snafu(display("RSA modulus of {bits} bits is not allowed"))]
    RsaModulusSize { bits: usize },

    #[snafu(display("failed to encode public key as DER"))]
    EncodePublicKey { source: x509_cert::der::Error },

    #[snafu(display("failed to decode public key"))]
    DecodePublicKey { source: x509_cert::spki::Error },
}

/// Decides whether the CA may issue a certificate for the given (lowercase)
/// names.
pub trait PolicyAuthority: Debug + Send + Sync {
    fn will_issue(&self, names: &[String]) -> Result<(), PolicyError>;
}

/// Decides whether a public key is strong enough to be certified.
pub trait KeyPolicy: Debug + Send + Sync {
    fn good_key(&self, public_key: &SubjectPublicKeyInfoOwned) -> Result<(), PolicyError>;
}

/// Accepts RSA keys within a modulus range and ECDSA keys on P-256.
///
/// ```
/// use ca_issuance::policy::StandardKeyPolicy;
///
/// let policy = StandardKeyPolicy::builder().allow_ecdsa(false).build();
/// ```
#[derive(Builder, Clone, Debug)]
pub struct StandardKeyPolicy {
    #[builder(default = true)]
    allow_rsa: bool,

    #[builder(default = true)]
    allow_ecdsa: bool,

    #[builder(default = 2048)]
    rsa_min_bits: usize,

    #[builder(default = 4096)]
    rsa_max_bits: usize,
}

impl Default for StandardKeyPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl KeyPolicy for StandardKeyPolicy {
    #[instrument(name = "check_public_key", skip_all, fields(algorithm = %public_key.algorithm.oid))]
    fn good_key(&self, public_key: &SubjectPublicKeyInfoOwned) -> Result<(), PolicyError> {
        let oid = public_key.algorithm.oid;
        let der = public_key.to_der().context(EncodePublicKeySnafu)?;

        match oid {
            RSA_ENCRYPTION if self.allow_rsa => {
                let key = RsaPublicKey::from_public_key_der(&der).context(DecodePublicKeySnafu)?;
                let bits = key.n().bits();
                debug!(public_key.size = bits, "checking RSA modulus");

                ensure!(
                    bits % 8 == 0 && (self.rsa_min_bits..=self.rsa_max_bits).contains(&bits),
                    RsaModulusSizeSnafu { bits }
                );
                Ok(())
            }
            ID_EC_PUBLIC_KEY if self.allow_ecdsa => {
                // Fails for every curve other than P-256
                p256::PublicKey::from_public_key_der(&der).context(DecodePublicKeySnafu)?;
                Ok(())
            }
            oid => KeyAlgorithmNotAllowedSnafu {
                algorithm: oid.to_string(),
            }
            .fail(),
        }
    }
}
