//! RSA issuer keys, signing with PKCS#1 v1.5 and SHA-256.
//!
//! Generated keys have [`DEFAULT_KEY_SIZE`] bits unless a size is passed to
//! [`SigningKey::new_with_size`]. Generating a 4096 bit key can take several
//! seconds, test builds therefore use 512 bit keys.
use rand_core::{CryptoRngCore, OsRng};
use rsa::{RsaPrivateKey, pkcs8::DecodePrivateKey, traits::PublicKeyParts};
use sha2::Sha256;
use signature::Keypair;
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};

use crate::keys::CertificateKeypair;

/// The modulus size of keys created by [`CertificateKeypair::new`].
#[cfg(not(test))]
pub const DEFAULT_KEY_SIZE: usize = 4096;

/// The modulus size of keys created by [`CertificateKeypair::new`].
#[cfg(test)]
pub const DEFAULT_KEY_SIZE: usize = 512;

type Pkcs1v15SigningKey = rsa::pkcs1v15::SigningKey<Sha256>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to generate a {bits} bit RSA key"))]
    GenerateKey { source: rsa::Error, bits: usize },

    #[snafu(display("failed to decode the RSA private key from PKCS#8 PEM"))]
    DecodePrivateKey { source: rsa::pkcs8::Error },
}

#[derive(Debug)]
pub struct SigningKey {
    inner: Pkcs1v15SigningKey,
    modulus_bits: usize,
}

impl SigningKey {
    #[instrument(name = "generate_rsa_key", skip(rng))]
    pub fn new_with_size<Rng>(rng: &mut Rng, bits: usize) -> Result<Self>
    where
        Rng: CryptoRngCore + Sized,
    {
        let private_key = RsaPrivateKey::new(rng, bits).context(GenerateKeySnafu { bits })?;
        Ok(Self::from(private_key))
    }

    /// The size of this key's modulus, which can differ from
    /// [`DEFAULT_KEY_SIZE`] for loaded keys.
    pub fn modulus_bits(&self) -> usize {
        self.modulus_bits
    }
}

impl From<RsaPrivateKey> for SigningKey {
    fn from(private_key: RsaPrivateKey) -> Self {
        let modulus_bits = private_key.n().bits();

        Self {
            inner: Pkcs1v15SigningKey::new(private_key),
            modulus_bits,
        }
    }
}

impl CertificateKeypair for SigningKey {
    type Error = Error;
    type Signature = rsa::pkcs1v15::Signature;
    type SigningKey = Pkcs1v15SigningKey;
    type VerifyingKey = rsa::pkcs1v15::VerifyingKey<Sha256>;

    fn new() -> Result<Self> {
        Self::new_with_rng(&mut OsRng)
    }

    fn new_with_rng<Rng>(rng: &mut Rng) -> Result<Self>
    where
        Rng: CryptoRngCore + Sized,
    {
        Self::new_with_size(rng, DEFAULT_KEY_SIZE)
    }

    fn signing_key(&self) -> &Self::SigningKey {
        &self.inner
    }

    fn verifying_key(&self) -> Self::VerifyingKey {
        self.inner.verifying_key()
    }

    #[instrument(name = "load_rsa_key", skip(input))]
    fn from_pkcs8_pem(input: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(input).context(DecodePrivateKeySnafu)?;
        let key = Self::from(private_key);

        debug!(key.modulus_bits = key.modulus_bits, "loaded RSA key");
        Ok(key)
    }

    fn algorithm_name() -> &'static str {
        "rsa"
    }

    fn key_size() -> usize {
        DEFAULT_KEY_SIZE
    }
}
