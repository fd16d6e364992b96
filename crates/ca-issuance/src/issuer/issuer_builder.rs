use std::time::SystemTime;

use bon::Builder;
use ca_shared::time::Duration;
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::referenced::OwnedToRef,
    ext::pkix::AuthorityKeyIdentifier,
    name::Name,
    serial_number::SerialNumber,
    time::{Time, Validity},
};

use super::Issuer;
use crate::{
    ca::{DEFAULT_ISSUER_SUBJECT, DEFAULT_ISSUER_VALIDITY},
    clock::truncate_to_seconds,
    keys::CertificateKeypair,
};

#[derive(Debug, Snafu)]
pub enum CreateIssuerError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("invalid issuer subject {subject:?}"))]
    ParseSubject {
        source: x509_cert::der::Error,
        subject: String,
    },

    #[snafu(display("issuer validity cannot be represented as X.509 time"))]
    ConvertValidity { source: x509_cert::der::Error },

    #[snafu(display("failed to generate the issuer key pair"))]
    GenerateKeyPair { source: E },

    #[snafu(display("failed to encode the issuer public key"))]
    EncodePublicKey { source: x509_cert::spki::Error },

    #[snafu(display("failed to derive the authority key identifier"))]
    DeriveAuthorityKeyIdentifier { source: x509_cert::der::Error },

    #[snafu(display("failed to self-sign the issuer certificate"))]
    SelfSign { source: x509_cert::builder::Error },
}

/// Creates a self-signed [`Issuer`], generating a key pair unless one is
/// supplied.
///
/// Deployed issuers are loaded with [`Issuer::from_pem`]. This is for
/// bootstrapping a test CA.
///
/// ```no_run
/// use ca_issuance::issuer::Issuer;
///
/// let issuer = Issuer::builder_with_ecdsa()
///     .subject("CN=Bootstrap Issuer")
///     .build()
///     .unwrap();
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct IssuerBuilder<'a, SK>
where
    SK: CertificateKeypair,
{
    /// Distinguished name in RFC 4514 string form.
    #[builder(default = DEFAULT_ISSUER_SUBJECT)]
    subject: &'a str,

    #[builder(default = DEFAULT_ISSUER_VALIDITY)]
    validity: Duration,

    /// Defaults to now.
    not_before: Option<SystemTime>,

    key_pair: Option<SK>,
}

impl<SK, S> IssuerBuilderBuilder<'_, SK, S>
where
    SK: CertificateKeypair,
    S: issuer_builder_builder::IsComplete,
{
    pub fn build(self) -> Result<Issuer, CreateIssuerError<SK::Error>> {
        self.finish_builder().build()
    }
}

impl<SK> IssuerBuilder<'_, SK>
where
    SK: CertificateKeypair,
{
    #[instrument(name = "bootstrap_issuer", skip(self), fields(subject = self.subject))]
    pub fn build(self) -> Result<Issuer, CreateIssuerError<SK::Error>> {
        let subject = self
            .subject
            .parse::<Name>()
            .context(ParseSubjectSnafu {
                subject: self.subject,
            })?;
        let validity = self.validity()?;
        let key_pair = match self.key_pair {
            Some(key_pair) => key_pair,
            None => SK::new().context(GenerateKeyPairSnafu)?,
        };

        // A handful of issuers exist, random 64 bit serials never collide.
        let serial_number = SerialNumber::from(rand::random::<u64>());

        debug!(
            issuer.serial = %serial_number,
            issuer.not_after = %validity.not_after,
            issuer.key.algorithm = SK::algorithm_name(),
            issuer.key.bits = SK::key_size(),
            "self-signing issuer certificate"
        );
        let certificate = self_sign(&key_pair, serial_number, validity, subject)?;

        Ok(Issuer {
            certificate,
            key: key_pair.into(),
        })
    }

    fn validity(&self) -> Result<Validity, CreateIssuerError<SK::Error>> {
        let not_before = truncate_to_seconds(self.not_before.unwrap_or_else(SystemTime::now));

        Ok(Validity {
            not_before: Time::try_from(not_before).context(ConvertValiditySnafu)?,
            not_after: Time::try_from(not_before + self.validity).context(ConvertValiditySnafu)?,
        })
    }
}

/// Signs a CA certificate for `key_pair` with the key itself.
///
/// [`Profile::Root`] contributes the critical CA basic constraints, the
/// subject key identifier and a key usage of keyCertSign and cRLSign. The
/// matching authority key identifier is added on top.
fn self_sign<SK>(
    key_pair: &SK,
    serial_number: SerialNumber,
    validity: Validity,
    subject: Name,
) -> Result<x509_cert::Certificate, CreateIssuerError<SK::Error>>
where
    SK: CertificateKeypair,
{
    let spki = key_pair
        .subject_public_key_info()
        .context(EncodePublicKeySnafu)?;
    let authority_key_identifier = AuthorityKeyIdentifier::try_from(spki.owned_to_ref())
        .context(DeriveAuthorityKeyIdentifierSnafu)?;

    let mut builder = CertificateBuilder::new(
        Profile::Root,
        serial_number,
        validity,
        subject,
        spki,
        key_pair.signing_key(),
    )
    .context(SelfSignSnafu)?;
    builder
        .add_extension(&authority_key_identifier)
        .context(SelfSignSnafu)?;

    builder.build().context(SelfSignSnafu)
}
