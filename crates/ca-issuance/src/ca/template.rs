use std::time::SystemTime;

use bon::Builder;
use const_oid::db::{
    rfc4519::{CN, SERIAL_NUMBER},
    rfc5280::{ID_AD_CA_ISSUERS, ID_AD_OCSP},
};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use x509_cert::{
    certificate::{TbsCertificate, Version},
    der::{
        Tag,
        asn1::{Any, Ia5String, SetOfVec},
        referenced::OwnedToRef,
    },
    ext::{
        AsExtension, Extension,
        pkix::{
            AccessDescription, AuthorityInfoAccessSyntax, AuthorityKeyIdentifier,
            BasicConstraints, CertificatePolicies, CrlDistributionPoints, ExtendedKeyUsage,
            SubjectAltName, SubjectKeyIdentifier,
            certpolicy::PolicyInformation,
            crl::dp::DistributionPoint,
            name::{DistributionPointName, GeneralName},
        },
    },
    attr::AttributeTypeAndValue,
    name::{Name, RdnSequence, RelativeDistinguishedName},
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::{Time, Validity},
};

use crate::{issuer::Issuer, profile::SigningProfile};

/// Defines all error variants which can occur when building a certificate
/// template
#[derive(Debug, Snafu)]
pub enum CreateTemplateError {
    #[snafu(display(
        "the certificate would outlive its issuer {issuer:?}, \
        issuer notAfter {issuer_not_after:?}, certificate notAfter {not_after:?}"
    ))]
    CertOutlivesIssuer {
        issuer: String,
        issuer_not_after: SystemTime,
        not_after: SystemTime,
    },

    #[snafu(display("failed to convert validity bounds into X.509 time"))]
    ParseValidity { source: x509_cert::der::Error },

    #[snafu(display("failed to compute key identifier"))]
    ComputeKeyIdentifier { source: x509_cert::der::Error },

    #[snafu(display("failed to encode certificate extension"))]
    EncodeExtension { source: x509_cert::der::Error },

    #[snafu(display(
        "failed to parse subject alternative DNS name \"{subject_alternative_dns_name}\" as a Ia5 string"
    ))]
    ParseSubjectAlternativeDnsName {
        subject_alternative_dns_name: String,
        source: x509_cert::der::Error,
    },

    #[snafu(display("failed to determine the issuer's signature algorithm"))]
    IssuerSignatureAlgorithm { source: crate::issuer::IssuerError },
}

/// This builder assembles the to-be-signed part of a leaf certificate.
///
/// The extensions are added in a fixed order: SubjectKeyIdentifier,
/// AuthorityKeyIdentifier, BasicConstraints (CA = false), KeyUsage,
/// ExtendedKeyUsage, SubjectAltName, CertificatePolicies,
/// AuthorityInfoAccess and CRLDistributionPoints, followed by the
/// `extra_extensions` taken from the CSR. Empty extensions are omitted.
#[derive(Builder)]
#[builder(finish_fn = finish_builder)]
pub struct CertificateTemplate<'a> {
    serial_number: SerialNumber,

    subject: Name,

    public_key: &'a SubjectPublicKeyInfoOwned,

    /// Distinct, lowercase DNS names for the SubjectAltName extension.
    dns_names: &'a [String],

    not_before: SystemTime,

    not_after: SystemTime,

    profile: &'a SigningProfile,

    /// Processed CSR extensions, appended verbatim.
    #[builder(default)]
    extra_extensions: Vec<Extension>,

    /// The issuer whose name and key identifier go into the certificate.
    signed_by: &'a Issuer,
}

impl<S> CertificateTemplateBuilder<'_, S>
where
    S: certificate_template_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<TbsCertificate, CreateTemplateError> {
        self.finish_builder().build()
    }
}

impl CertificateTemplate<'_> {
    #[instrument(
        name = "build_certificate_template",
        skip(self),
        fields(subject = %self.subject, profile = self.profile.name()),
    )]
    pub fn build(self) -> Result<TbsCertificate, CreateTemplateError> {
        let issuer_not_after = self.signed_by.not_after();
        ensure!(self.not_after <= issuer_not_after, CertOutlivesIssuerSnafu {
            issuer: self.signed_by.subject().to_string(),
            issuer_not_after,
            not_after: self.not_after,
        });

        let validity = Validity {
            not_before: Time::try_from(self.not_before).context(ParseValiditySnafu)?,
            not_after: Time::try_from(self.not_after).context(ParseValiditySnafu)?,
        };

        let extensions = self.extensions()?;

        debug!(
            certificate.subject = %self.subject,
            certificate.not_after = %validity.not_after,
            certificate.not_before = %validity.not_before,
            certificate.serial = %self.serial_number,
            certificate.san.dns_names = ?self.dns_names,
            certificate.signed_by.issuer = %self.signed_by.subject(),
            certificate.extensions = extensions.len(),
            "creating certificate template"
        );

        Ok(TbsCertificate {
            version: Version::V3,
            serial_number: self.serial_number,
            signature: self
                .signed_by
                .signature_algorithm()
                .context(IssuerSignatureAlgorithmSnafu)?,
            issuer: self.signed_by.subject().clone(),
            validity,
            subject: self.subject,
            subject_public_key_info: self.public_key.clone(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(extensions),
        })
    }

    fn extensions(&self) -> Result<Vec<Extension>, CreateTemplateError> {
        let mut extensions = Vec::new();
        let subject = &self.subject;
        let profile = self.profile;

        let ski = SubjectKeyIdentifier::try_from(self.public_key.owned_to_ref())
            .context(ComputeKeyIdentifierSnafu)?;
        push_extension(&mut extensions, subject, &ski)?;

        let aki = AuthorityKeyIdentifier::try_from(self.signed_by.public_key().owned_to_ref())
            .context(ComputeKeyIdentifierSnafu)?;
        push_extension(&mut extensions, subject, &aki)?;

        let basic_constraints = BasicConstraints {
            ca: false,
            path_len_constraint: None,
        };
        push_extension(&mut extensions, subject, &basic_constraints)?;
        push_extension(&mut extensions, subject, &profile.key_usage())?;

        if !profile.ext_key_usages().is_empty() {
            let eku = ExtendedKeyUsage(profile.ext_key_usages().to_vec());
            push_extension(&mut extensions, subject, &eku)?;
        }

        if !self.dns_names.is_empty() {
            let sans = self
                .dns_names
                .iter()
                .map(|dns_name| {
                    Ia5String::new(dns_name)
                        .map(GeneralName::DnsName)
                        .with_context(|_| ParseSubjectAlternativeDnsNameSnafu {
                            subject_alternative_dns_name: dns_name.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            push_extension(&mut extensions, subject, &SubjectAltName(sans))?;
        }

        if !profile.policies().is_empty() {
            let policies = profile
                .policies()
                .iter()
                .map(|oid| PolicyInformation {
                    policy_identifier: *oid,
                    policy_qualifiers: None,
                })
                .collect();
            push_extension(&mut extensions, subject, &CertificatePolicies(policies))?;
        }

        let access_descriptions = profile
            .ocsp_url()
            .map(|url| (ID_AD_OCSP, url))
            .into_iter()
            .chain(profile.issuer_urls().iter().map(|url| (ID_AD_CA_ISSUERS, url)))
            .map(|(access_method, url)| AccessDescription {
                access_method,
                access_location: GeneralName::UniformResourceIdentifier(url.clone()),
            })
            .collect::<Vec<_>>();
        if !access_descriptions.is_empty() {
            push_extension(
                &mut extensions,
                subject,
                &AuthorityInfoAccessSyntax(access_descriptions),
            )?;
        }

        if let Some(crl_url) = profile.crl_url() {
            let distribution_point = DistributionPoint {
                distribution_point: Some(DistributionPointName::FullName(vec![
                    GeneralName::UniformResourceIdentifier(crl_url.clone()),
                ])),
                reasons: None,
                crl_issuer: None,
            };
            push_extension(
                &mut extensions,
                subject,
                &CrlDistributionPoints(vec![distribution_point]),
            )?;
        }

        extensions.extend(self.extra_extensions.iter().cloned());
        Ok(extensions)
    }
}

fn push_extension<E>(
    extensions: &mut Vec<Extension>,
    subject: &Name,
    extension: &E,
) -> Result<(), CreateTemplateError>
where
    E: AsExtension,
{
    let extension = extension
        .to_extension(subject, extensions.as_slice())
        .context(EncodeExtensionSnafu)?;
    extensions.push(extension);

    Ok(())
}

/// Builds the certificate subject: the common name (if any) followed by the
/// `serialNumber` attribute and, if given, the `retained` RDNs of the CSR
/// subject except common names and serial numbers.
pub fn subject_name(
    common_name: Option<&str>,
    serial: &str,
    retained: Option<&Name>,
) -> x509_cert::der::Result<Name> {
    let mut rdns = Vec::new();

    if let Some(retained) = retained {
        for rdn in &retained.0 {
            let attributes = rdn
                .0
                .iter()
                .filter(|atv| atv.oid != CN && atv.oid != SERIAL_NUMBER)
                .cloned()
                .collect::<Vec<_>>();

            if !attributes.is_empty() {
                rdns.push(RelativeDistinguishedName(SetOfVec::try_from(attributes)?));
            }
        }
    }

    if let Some(common_name) = common_name {
        rdns.push(single_attribute_rdn(
            CN,
            Any::new(Tag::Utf8String, common_name.as_bytes())?,
        )?);
    }

    rdns.push(single_attribute_rdn(
        SERIAL_NUMBER,
        Any::new(Tag::PrintableString, serial.as_bytes())?,
    )?);

    Ok(RdnSequence(rdns))
}

fn single_attribute_rdn(
    oid: const_oid::ObjectIdentifier,
    value: Any,
) -> x509_cert::der::Result<RelativeDistinguishedName> {
    let attribute = AttributeTypeAndValue { oid, value };
    Ok(RelativeDistinguishedName(SetOfVec::try_from(vec![attribute])?))
}
