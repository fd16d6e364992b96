//! Signature verification for CSRs, certificates and OCSP responses.
//!
//! Supported signature algorithms are `sha{256,384,512}WithRSAEncryption`
//! (PKCS#1 v1.5) and `ecdsa-with-SHA256` on the NIST P-256 curve.
use const_oid::{
    ObjectIdentifier,
    db::rfc5912::{
        ECDSA_WITH_SHA_256, SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION,
        SHA_512_WITH_RSA_ENCRYPTION,
    },
};
use p256::pkcs8::DecodePublicKey as _;
use rsa::RsaPublicKey;
use signature::Verifier;
use snafu::{ResultExt, Snafu};
use x509_cert::{
    Certificate,
    der::Encode,
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
};

pub type Result<T, E = VerifyError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum VerifyError {
    #[snafu(display("unsupported signature algorithm {oid}"))]
    UnsupportedSignatureAlgorithm { oid: ObjectIdentifier },

    #[snafu(display("failed to encode public key as DER"))]
    EncodePublicKey { source: x509_cert::der::Error },

    #[snafu(display("failed to decode public key for {oid}"))]
    DecodePublicKey {
        source: x509_cert::spki::Error,
        oid: ObjectIdentifier,
    },

    #[snafu(display("failed to decode signature"))]
    DecodeSignature { source: signature::Error },

    #[snafu(display("failed to encode signed data as DER"))]
    EncodeSignedData { source: x509_cert::der::Error },

    #[snafu(display("signature does not match"))]
    InvalidSignature { source: signature::Error },
}

/// Verifies that `signature` over `message` was produced by the private
/// half of `public_key` using `algorithm`.
pub fn verify_signature(
    public_key: &SubjectPublicKeyInfoOwned,
    algorithm: &AlgorithmIdentifierOwned,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let oid = algorithm.oid;
    let key_der = public_key.to_der().context(EncodePublicKeySnafu)?;

    match oid {
        SHA_256_WITH_RSA_ENCRYPTION => {
            verify_rsa::<sha2::Sha256>(&key_der, oid, message, signature)
        }
        SHA_384_WITH_RSA_ENCRYPTION => {
            verify_rsa::<sha2::Sha384>(&key_der, oid, message, signature)
        }
        SHA_512_WITH_RSA_ENCRYPTION => {
            verify_rsa::<sha2::Sha512>(&key_der, oid, message, signature)
        }
        ECDSA_WITH_SHA_256 => {
            let verifying_key = p256::ecdsa::VerifyingKey::from_public_key_der(&key_der)
                .context(DecodePublicKeySnafu { oid })?;
            let signature =
                p256::ecdsa::DerSignature::try_from(signature).context(DecodeSignatureSnafu)?;

            verifying_key
                .verify(message, &signature)
                .context(InvalidSignatureSnafu)
        }
        oid => UnsupportedSignatureAlgorithmSnafu { oid }.fail(),
    }
}

fn verify_rsa<D>(key_der: &[u8], oid: ObjectIdentifier, message: &[u8], signature: &[u8]) -> Result<()>
where
    D: sha2::Digest + const_oid::AssociatedOid,
{
    let public_key =
        RsaPublicKey::from_public_key_der(key_der).context(DecodePublicKeySnafu { oid })?;
    let verifying_key = rsa::pkcs1v15::VerifyingKey::<D>::new(public_key);
    let signature =
        rsa::pkcs1v15::Signature::try_from(signature).context(DecodeSignatureSnafu)?;

    verifying_key
        .verify(message, &signature)
        .context(InvalidSignatureSnafu)
}

/// Verifies the signature of `certificate` against the public key of a
/// (potential) issuer.
pub fn verify_certificate(
    certificate: &Certificate,
    issuer_public_key: &SubjectPublicKeyInfoOwned,
) -> Result<()> {
    let tbs = certificate
        .tbs_certificate
        .to_der()
        .context(EncodeSignedDataSnafu)?;

    verify_signature(
        issuer_public_key,
        &certificate.signature_algorithm,
        &tbs,
        certificate.signature.raw_bytes(),
    )
}
