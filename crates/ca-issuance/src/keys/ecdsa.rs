//! ECDSA issuer keys on the NIST P-256 curve, signing with SHA-256.
//!
//! Signatures are DER encoded as required in X.509 certificates and OCSP
//! responses.
use p256::{NistP256, pkcs8::DecodePrivateKey};
use rand_core::{CryptoRngCore, OsRng};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::keys::CertificateKeypair;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to decode the P-256 private key from PKCS#8 PEM"))]
    DecodePrivateKey { source: p256::pkcs8::Error },
}

#[derive(Debug)]
pub struct SigningKey(p256::ecdsa::SigningKey);

impl From<p256::ecdsa::SigningKey> for SigningKey {
    fn from(signing_key: p256::ecdsa::SigningKey) -> Self {
        Self(signing_key)
    }
}

impl CertificateKeypair for SigningKey {
    type Error = Error;
    type Signature = ecdsa::der::Signature<NistP256>;
    type SigningKey = p256::ecdsa::SigningKey;
    type VerifyingKey = p256::ecdsa::VerifyingKey;

    fn new() -> Result<Self> {
        Self::new_with_rng(&mut OsRng)
    }

    fn new_with_rng<Rng>(rng: &mut Rng) -> Result<Self>
    where
        Rng: CryptoRngCore + Sized,
    {
        Ok(p256::ecdsa::SigningKey::random(rng).into())
    }

    fn signing_key(&self) -> &Self::SigningKey {
        &self.0
    }

    fn verifying_key(&self) -> Self::VerifyingKey {
        *self.0.verifying_key()
    }

    #[instrument(name = "load_ecdsa_key", skip(input))]
    fn from_pkcs8_pem(input: &str) -> Result<Self> {
        p256::ecdsa::SigningKey::from_pkcs8_pem(input)
            .map(Self)
            .context(DecodePrivateKeySnafu)
    }

    fn algorithm_name() -> &'static str {
        "ecdsa"
    }

    fn key_size() -> usize {
        256
    }
}
