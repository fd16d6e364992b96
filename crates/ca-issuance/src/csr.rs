//! A read-only view over a PKCS#10 certificate signing request.
use const_oid::db::{rfc4519::CN, rfc5280::ID_CE_SUBJECT_ALT_NAME};
use snafu::{ResultExt, Snafu};
use x509_cert::{
    der::{Decode, Encode, Tag, Tagged, asn1::Any},
    ext::{
        Extension,
        pkix::{SubjectAltName, name::GeneralName},
    },
    name::Name,
    request::CertReq,
    spki::SubjectPublicKeyInfoOwned,
};

use crate::{
    oid::ID_EXTENSION_REQ,
    verify::{self, VerifyError},
};

pub type Result<T, E = CsrError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum CsrError {
    #[snafu(display("failed to decode CSR from DER"))]
    DecodeCsr { source: x509_cert::der::Error },

    #[snafu(display("the CSR contains {count} extension request attributes, expected at most one"))]
    MultipleExtensionRequests { count: usize },

    #[snafu(display("failed to decode the requested extensions"))]
    DecodeRequestedExtensions { source: x509_cert::der::Error },

    #[snafu(display("failed to decode the requested subject alternative names"))]
    DecodeSubjectAltName { source: x509_cert::der::Error },

    #[snafu(display("subject alternative names of type {kind} are not supported"))]
    UnsupportedSubjectAltName { kind: &'static str },

    #[snafu(display("common name uses unsupported string type {tag}"))]
    UnsupportedCommonNameEncoding { tag: Tag },

    #[snafu(display("common name is not valid UTF-8"))]
    InvalidCommonName { source: std::str::Utf8Error },

    #[snafu(display("failed to encode CSR info as DER"))]
    EncodeInfo { source: x509_cert::der::Error },

    #[snafu(display("CSR self-signature is invalid"))]
    InvalidSelfSignature { source: VerifyError },
}

/// Wraps a parsed [`CertReq`] together with the extensions requested via
/// the `extensionRequest` attribute.
#[derive(Clone, Debug)]
pub struct CertificateRequest {
    inner: CertReq,
    requested_extensions: Vec<Extension>,
}

impl CertificateRequest {
    pub fn new(inner: CertReq) -> Result<Self> {
        let attributes = inner
            .info
            .attributes
            .iter()
            .filter(|attribute| attribute.oid == ID_EXTENSION_REQ)
            .collect::<Vec<_>>();

        let requested_extensions = match attributes.as_slice() {
            [] => Vec::new(),
            [attribute] => {
                let mut extensions = Vec::new();
                for value in attribute.values.iter() {
                    extensions.extend(decode_extensions(value)?);
                }
                extensions
            }
            _ => {
                return MultipleExtensionRequestsSnafu {
                    count: attributes.len(),
                }
                .fail();
            }
        };

        Ok(Self {
            inner,
            requested_extensions,
        })
    }

    pub fn from_der(input: &[u8]) -> Result<Self> {
        let inner = CertReq::from_der(input).context(DecodeCsrSnafu)?;
        Self::new(inner)
    }

    pub fn inner(&self) -> &CertReq {
        &self.inner
    }

    pub fn subject(&self) -> &Name {
        &self.inner.info.subject
    }

    pub fn public_key(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.info.public_key
    }

    pub fn requested_extensions(&self) -> &[Extension] {
        &self.requested_extensions
    }

    /// Returns the first common name of the subject, if any.
    pub fn common_name(&self) -> Result<Option<String>> {
        let common_name = self
            .subject()
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .find(|atv| atv.oid == CN);

        match common_name {
            Some(atv) => decode_directory_string(&atv.value).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the DNS names of the requested subject alternative name
    /// extension in the order they appear in the CSR.
    pub fn dns_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for extension in self
            .requested_extensions
            .iter()
            .filter(|ext| ext.extn_id == ID_CE_SUBJECT_ALT_NAME)
        {
            let san = SubjectAltName::from_der(extension.extn_value.as_bytes())
                .context(DecodeSubjectAltNameSnafu)?;

            for name in san.0 {
                match name {
                    GeneralName::DnsName(dns_name) => names.push(dns_name.to_string()),
                    GeneralName::IpAddress(_) => {
                        return UnsupportedSubjectAltNameSnafu { kind: "IP address" }.fail();
                    }
                    GeneralName::Rfc822Name(_) => {
                        return UnsupportedSubjectAltNameSnafu {
                            kind: "email address",
                        }
                        .fail();
                    }
                    GeneralName::UniformResourceIdentifier(_) => {
                        return UnsupportedSubjectAltNameSnafu { kind: "URI" }.fail();
                    }
                    _ => return UnsupportedSubjectAltNameSnafu { kind: "other" }.fail(),
                }
            }
        }

        Ok(names)
    }

    /// Checks that the CSR is signed by the private key belonging to the
    /// public key it contains.
    pub fn verify_signature(&self) -> Result<()> {
        let info = self.inner.info.to_der().context(EncodeInfoSnafu)?;

        verify::verify_signature(
            self.public_key(),
            &self.inner.algorithm,
            &info,
            self.inner.signature.raw_bytes(),
        )
        .context(InvalidSelfSignatureSnafu)
    }
}

fn decode_extensions(value: &Any) -> Result<Vec<Extension>> {
    let der = value.to_der().context(DecodeRequestedExtensionsSnafu)?;
    Vec::<Extension>::from_der(&der).context(DecodeRequestedExtensionsSnafu)
}

fn decode_directory_string(value: &Any) -> Result<String> {
    match value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String => {
            let value = std::str::from_utf8(value.value()).context(InvalidCommonNameSnafu)?;
            Ok(value.to_owned())
        }
        tag => UnsupportedCommonNameEncodingSnafu { tag }.fail(),
    }
}
