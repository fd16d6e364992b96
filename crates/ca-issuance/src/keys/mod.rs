//! Issuer key pairs.
//!
//! [`CertificateKeypair`] abstracts over the key algorithms an issuer can
//! sign with. Two implementations exist: [`ecdsa::SigningKey`] for P-256
//! keys and [`rsa::SigningKey`] for PKCS#1 v1.5 RSA keys, both hashing with
//! SHA-256. [`IssuerKey`] holds either of them, so issuers with different
//! key algorithms can be registered side by side.
//!
//! ```no_run
//! use ca_issuance::keys::{CertificateKeypair, ecdsa};
//!
//! let key = ecdsa::SigningKey::new().unwrap();
//! let spki = key.subject_public_key_info().unwrap();
//! ```
//!
//! RSA decryption in the `rsa` crate is affected by RUSTSEC-2023-0071. Issuer
//! keys only ever sign, which the advisory does not cover.
use std::fmt::Debug;

use rand_core::CryptoRngCore;
use signature::{Keypair, Signer};
use x509_cert::{
    der::Decode,
    spki::{
        EncodePublicKey, SignatureAlgorithmIdentifier, SignatureBitStringEncoding,
        SubjectPublicKeyInfoOwned,
    },
};

pub mod ecdsa;
pub mod rsa;

pub trait CertificateKeypair
where
    Self: Debug + Sized + Send + Sync + Into<IssuerKey> + 'static,
{
    type SigningKey: SignatureAlgorithmIdentifier
        + Keypair<VerifyingKey: EncodePublicKey>
        + Signer<Self::Signature>
        + Send
        + Sync;
    type Signature: SignatureBitStringEncoding;
    type VerifyingKey: EncodePublicKey;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Generates a key using [`rand_core::OsRng`].
    fn new() -> Result<Self, Self::Error>;

    /// Generates a key using `rng`.
    fn new_with_rng<Rng>(rng: &mut Rng) -> Result<Self, Self::Error>
    where
        Rng: CryptoRngCore + Sized;

    fn signing_key(&self) -> &Self::SigningKey;

    fn verifying_key(&self) -> Self::VerifyingKey;

    /// Loads a key from a PKCS#8 PEM document, as read from the issuer's key
    /// file.
    fn from_pkcs8_pem(input: &str) -> Result<Self, Self::Error>;

    /// Short algorithm name used in log fields.
    fn algorithm_name() -> &'static str;

    /// Size in bits of freshly generated keys.
    fn key_size() -> usize;

    /// The verifying key as it appears in certificates and CSRs.
    fn subject_public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned, x509_cert::spki::Error> {
        let document = self.verifying_key().to_public_key_der()?;
        Ok(SubjectPublicKeyInfoOwned::from_der(document.as_bytes())?)
    }
}

/// The key pair of a single issuer, of any supported algorithm.
#[derive(Debug)]
pub enum IssuerKey {
    Rsa(rsa::SigningKey),
    Ecdsa(ecdsa::SigningKey),
}

impl IssuerKey {
    pub fn subject_public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned, x509_cert::spki::Error> {
        match self {
            Self::Rsa(key) => key.subject_public_key_info(),
            Self::Ecdsa(key) => key.subject_public_key_info(),
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            Self::Rsa(_) => rsa::SigningKey::algorithm_name(),
            Self::Ecdsa(_) => ecdsa::SigningKey::algorithm_name(),
        }
    }
}

impl From<rsa::SigningKey> for IssuerKey {
    fn from(key: rsa::SigningKey) -> Self {
        Self::Rsa(key)
    }
}

impl From<ecdsa::SigningKey> for IssuerKey {
    fn from(key: ecdsa::SigningKey) -> Self {
        Self::Ecdsa(key)
    }
}
