//! Issuers (signing key and certificate pairs) and the ordered registry
//! resolving which issuer signed a given certificate.
use std::{path::Path, time::SystemTime};

use signature::Signer;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use x509_cert::{
    Certificate,
    certificate::TbsCertificate,
    der::{Encode, asn1::BitString},
    name::Name,
    spki::{
        AlgorithmIdentifierOwned, DynSignatureAlgorithmIdentifier, SignatureBitStringEncoding,
        SubjectPublicKeyInfoOwned,
    },
};

use crate::{
    keys::{CertificateKeypair, IssuerKey, ecdsa, rsa},
    verify,
};

mod issuer_builder;
pub use issuer_builder::*;

pub type Result<T, E = IssuerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum IssuerError {
    #[snafu(display("failed to encode the public key of the signing key pair"))]
    EncodePublicKey { source: x509_cert::spki::Error },

    #[snafu(display("the public key of certificate {subject:?} does not match the signing key"))]
    KeyMismatch { subject: String },

    #[snafu(display("failed to determine the signature algorithm"))]
    SignatureAlgorithm { source: x509_cert::spki::Error },

    #[snafu(display("failed to encode data to be signed"))]
    EncodeSignedData { source: x509_cert::der::Error },

    #[snafu(display("failed to sign data"))]
    Sign { source: signature::Error },

    #[snafu(display("failed to encode signature as bit string"))]
    EncodeSignature { source: x509_cert::der::Error },
}

#[derive(Debug, Snafu)]
pub enum LoadIssuerError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to read certificate file {path:?}"))]
    ReadCertificateFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to read private key file {path:?}"))]
    ReadKeyFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to decode certificate chain from PEM"))]
    DecodeCertificatePem { source: x509_cert::der::Error },

    #[snafu(display("the PEM input contains no certificate"))]
    EmptyCertificateChain,

    #[snafu(display("failed to deserialize private key from PKCS8 PEM"))]
    DeserializeKey { source: E },

    #[snafu(display("failed to create issuer"))]
    CreateIssuer { source: IssuerError },
}

/// A signing key pair together with the certificate certifying its public
/// key.
///
/// The certificate's public key is checked against the key pair during
/// construction, afterwards the pair is immutable. Issuers of different key
/// algorithms share this type, see [`IssuerKey`].
#[derive(Debug)]
pub struct Issuer {
    certificate: Certificate,
    key: IssuerKey,
}

impl Issuer {
    #[instrument(
        name = "create_issuer",
        skip_all,
        fields(subject = %certificate.tbs_certificate.subject)
    )]
    pub fn new(certificate: Certificate, key: impl Into<IssuerKey>) -> Result<Self> {
        let key = key.into();
        let key_spki = key.subject_public_key_info().context(EncodePublicKeySnafu)?;
        let certificate_spki = &certificate.tbs_certificate.subject_public_key_info;

        ensure!(
            key_spki.algorithm.oid == certificate_spki.algorithm.oid
                && key_spki.subject_public_key == certificate_spki.subject_public_key,
            KeyMismatchSnafu {
                subject: certificate.tbs_certificate.subject.to_string()
            }
        );

        debug!(issuer.key.algorithm = key.algorithm_name(), "created issuer");
        Ok(Self { certificate, key })
    }

    /// Use this function in combination with [`IssuerBuilder`] to create
    /// self-signed issuers.
    pub fn builder<SK>() -> IssuerBuilderBuilder<'static, SK>
    where
        SK: CertificateKeypair,
    {
        IssuerBuilder::start_builder()
    }

    /// Same as [`Self::builder`], but enforces the RSA algorithm for key creation.
    pub fn builder_with_rsa() -> IssuerBuilderBuilder<'static, rsa::SigningKey> {
        Self::builder()
    }

    /// Same as [`Self::builder`], but enforces the ECDSA algorithm for key creation.
    pub fn builder_with_ecdsa() -> IssuerBuilderBuilder<'static, ecdsa::SigningKey> {
        Self::builder()
    }

    /// Loads an issuer from a PEM certificate (chain) and a PKCS#8 PEM private
    /// key of algorithm `SK`. The first certificate of the chain must belong
    /// to the key.
    pub fn from_pem<SK>(
        certificate_pem: &str,
        key_pem: &str,
    ) -> Result<Self, LoadIssuerError<SK::Error>>
    where
        SK: CertificateKeypair,
    {
        if certificate_pem.trim().is_empty() {
            return EmptyCertificateChainSnafu.fail();
        }

        let certificate = Certificate::load_pem_chain(certificate_pem.as_bytes())
            .context(DecodeCertificatePemSnafu)?
            .into_iter()
            .next()
            .context(EmptyCertificateChainSnafu)?;
        let key_pair = SK::from_pkcs8_pem(key_pem).context(DeserializeKeySnafu)?;

        Self::new(certificate, key_pair).context(CreateIssuerSnafu)
    }

    #[instrument(name = "load_issuer_from_files", skip_all, fields(
        certificate_path = %certificate_path.as_ref().display(),
        key_path = %key_path.as_ref().display(),
    ))]
    pub async fn from_pem_files<SK>(
        certificate_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, LoadIssuerError<SK::Error>>
    where
        SK: CertificateKeypair,
    {
        let certificate_path = certificate_path.as_ref();
        let key_path = key_path.as_ref();

        let certificate_pem = tokio::fs::read_to_string(certificate_path)
            .await
            .context(ReadCertificateFileSnafu {
                path: certificate_path,
            })?;
        let key_pem = tokio::fs::read_to_string(key_path)
            .await
            .context(ReadKeyFileSnafu { path: key_path })?;

        Self::from_pem::<SK>(&certificate_pem, &key_pem)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn key(&self) -> &IssuerKey {
        &self.key
    }

    pub fn subject(&self) -> &Name {
        &self.certificate.tbs_certificate.subject
    }

    pub fn public_key(&self) -> &SubjectPublicKeyInfoOwned {
        &self.certificate.tbs_certificate.subject_public_key_info
    }

    pub fn not_before(&self) -> SystemTime {
        self.certificate
            .tbs_certificate
            .validity
            .not_before
            .to_system_time()
    }

    pub fn not_after(&self) -> SystemTime {
        self.certificate
            .tbs_certificate
            .validity
            .not_after
            .to_system_time()
    }

    pub fn signature_algorithm(&self) -> Result<AlgorithmIdentifierOwned> {
        match &self.key {
            IssuerKey::Rsa(key) => key.signing_key().signature_algorithm_identifier(),
            IssuerKey::Ecdsa(key) => key.signing_key().signature_algorithm_identifier(),
        }
        .context(SignatureAlgorithmSnafu)
    }

    /// Signs `message` with the private key of this issuer.
    pub fn sign(&self, message: &[u8]) -> Result<BitString> {
        match &self.key {
            IssuerKey::Rsa(key) => sign_with(key, message),
            IssuerKey::Ecdsa(key) => sign_with(key, message),
        }
    }

    /// Signs the to-be-signed certificate and assembles the final
    /// [`Certificate`].
    pub fn sign_certificate(&self, tbs_certificate: TbsCertificate) -> Result<Certificate> {
        let signature_algorithm = self.signature_algorithm()?;
        let tbs = tbs_certificate.to_der().context(EncodeSignedDataSnafu)?;
        let signature = self.sign(&tbs)?;

        Ok(Certificate {
            tbs_certificate,
            signature_algorithm,
            signature,
        })
    }

    /// Returns whether `certificate` names this issuer as its issuer and
    /// carries a valid signature of this issuer's key.
    pub fn has_signed(&self, certificate: &Certificate) -> bool {
        self.subject() == &certificate.tbs_certificate.issuer
            && verify::verify_certificate(certificate, self.public_key()).is_ok()
    }
}

fn sign_with<SK>(key_pair: &SK, message: &[u8]) -> Result<BitString>
where
    SK: CertificateKeypair,
{
    let signature: SK::Signature = key_pair
        .signing_key()
        .try_sign(message)
        .context(SignSnafu)?;

    signature.to_bitstring().context(EncodeSignatureSnafu)
}

#[derive(Debug, Snafu)]
pub enum IssuerRegistryError {
    #[snafu(display("at least one issuer is required"))]
    EmptyRegistry,

    #[snafu(display("no registered issuer signed the certificate issued by {issuer:?}"))]
    IssuerNotFound { issuer: String },
}

/// The ordered set of issuers known to the CA. The first registered issuer
/// is the default issuer, used for all new issuance.
#[derive(Debug)]
pub struct IssuerRegistry {
    default_issuer: Issuer,
    other_issuers: Vec<Issuer>,
}

impl IssuerRegistry {
    pub fn new(issuers: Vec<Issuer>) -> Result<Self, IssuerRegistryError> {
        let mut issuers = issuers.into_iter();
        let default_issuer = issuers.next().context(EmptyRegistrySnafu)?;

        Ok(Self {
            default_issuer,
            other_issuers: issuers.collect(),
        })
    }

    pub fn default_issuer(&self) -> &Issuer {
        &self.default_issuer
    }

    /// Iterates over all issuers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Issuer> {
        std::iter::once(&self.default_issuer).chain(self.other_issuers.iter())
    }

    pub fn len(&self) -> usize {
        self.other_issuers.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Finds the issuer which signed `certificate` with a linear scan in
    /// registration order. The first match wins.
    #[instrument(name = "find_issuer", skip_all, fields(
        certificate.issuer = %certificate.tbs_certificate.issuer,
        issuers = self.len(),
    ))]
    pub fn find_by_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<&Issuer, IssuerRegistryError> {
        let issuer = self
            .iter()
            .find(|issuer| issuer.has_signed(certificate))
            .context(IssuerNotFoundSnafu {
                issuer: certificate.tbs_certificate.issuer.to_string(),
            })?;

        debug!(issuer.subject = %issuer.subject(), "resolved issuer");
        Ok(issuer)
    }
}
