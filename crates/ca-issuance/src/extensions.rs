//! Classification and normalization of extensions requested in a CSR.
//!
//! The TLS Feature extension (must-staple) is always validated and, if
//! enabled, replaced by a single canonical extension, whether or not the
//! profile lists it. Of the remaining extensions only those on the profile's
//! allow list are considered.
use std::collections::{BTreeSet, HashSet};

use const_oid::{
    AssociatedOid, ObjectIdentifier,
    db::rfc5280::{
        ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_BASIC_CONSTRAINTS, ID_CE_CERTIFICATE_POLICIES,
        ID_CE_CRL_DISTRIBUTION_POINTS, ID_CE_EXT_KEY_USAGE, ID_CE_KEY_USAGE,
        ID_CE_SUBJECT_ALT_NAME, ID_CE_SUBJECT_KEY_IDENTIFIER, ID_PE_AUTHORITY_INFO_ACCESS,
    },
};
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument, warn};
use x509_cert::{
    der::{
        Decode, DecodeValue, EncodeValue, FixedTag, Header, Length, Reader, Tag, Writer,
    },
    ext::{AsExtension, Extension},
    name::Name,
};

use crate::{
    oid::{ID_PE_TLS_FEATURE, TLS_FEATURE_STATUS_REQUEST},
    profile::SigningProfile,
};

/// Extensions the CA always computes itself. Requests for them are never
/// honoured.
const CA_MANAGED_EXTENSIONS: [ObjectIdentifier; 9] = [
    ID_CE_SUBJECT_ALT_NAME,
    ID_CE_KEY_USAGE,
    ID_CE_EXT_KEY_USAGE,
    ID_CE_BASIC_CONSTRAINTS,
    ID_CE_SUBJECT_KEY_IDENTIFIER,
    ID_CE_AUTHORITY_KEY_IDENTIFIER,
    ID_PE_AUTHORITY_INFO_ACCESS,
    ID_CE_CRL_DISTRIBUTION_POINTS,
    ID_CE_CERTIFICATE_POLICIES,
];

pub fn is_ca_managed(oid: &ObjectIdentifier) -> bool {
    CA_MANAGED_EXTENSIONS.contains(oid)
}

pub type Result<T, E = ProcessExtensionsError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum ProcessExtensionsError {
    #[snafu(display("invalid must-staple request: {reason}"))]
    InvalidTlsFeature {
        reason: &'static str,
        telemetry: BTreeSet<ExtensionTelemetry>,
    },

    #[snafu(display("failed to encode the TLS feature extension"))]
    EncodeTlsFeature { source: x509_cert::der::Error },
}

impl ProcessExtensionsError {
    /// Telemetry collected up to the point of failure.
    pub fn telemetry(&self) -> BTreeSet<ExtensionTelemetry> {
        match self {
            Self::InvalidTlsFeature { telemetry, .. } => telemetry.clone(),
            Self::EncodeTlsFeature { .. } => BTreeSet::new(),
        }
    }
}

/// Tags describing which kinds of extensions a CSR requested. They are
/// only used for metrics.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ExtensionTelemetry {
    TlsFeatureRequested,
    TlsFeatureInvalid,
    BasicExtensionRequested,
    OtherExtensionRequested,
}

/// The kinds of requested extensions the processor distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestedExtension<'a> {
    MustStaple(&'a Extension),
    Recognized(&'a Extension),
    Unsupported(ObjectIdentifier),
}

impl<'a> RequestedExtension<'a> {
    pub fn classify(extension: &'a Extension, allowed: &[ObjectIdentifier]) -> Self {
        if extension.extn_id == ID_PE_TLS_FEATURE {
            Self::MustStaple(extension)
        } else if allowed.contains(&extension.extn_id) {
            Self::Recognized(extension)
        } else {
            Self::Unsupported(extension.extn_id)
        }
    }
}

/// The TLS Feature extension as defined in RFC 7633.
///
/// ```text
/// Features ::= SEQUENCE OF INTEGER
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsFeature(pub Vec<u16>);

impl TlsFeature {
    /// The feature set requesting a stapled OCSP response, which encodes as
    /// `30 03 02 01 05`.
    pub fn must_staple() -> Self {
        Self(vec![TLS_FEATURE_STATUS_REQUEST])
    }
}

impl AssociatedOid for TlsFeature {
    const OID: ObjectIdentifier = ID_PE_TLS_FEATURE;
}

impl FixedTag for TlsFeature {
    const TAG: Tag = Tag::Sequence;
}

impl<'a> DecodeValue<'a> for TlsFeature {
    fn decode_value<R: Reader<'a>>(reader: &mut R, header: Header) -> x509_cert::der::Result<Self> {
        Vec::<u16>::decode_value(reader, header).map(Self)
    }
}

impl EncodeValue for TlsFeature {
    fn value_len(&self) -> x509_cert::der::Result<Length> {
        self.0.value_len()
    }

    fn encode_value(&self, writer: &mut impl Writer) -> x509_cert::der::Result<()> {
        self.0.encode_value(writer)
    }
}

impl AsExtension for TlsFeature {
    fn critical(&self, _subject: &Name, _extensions: &[Extension]) -> bool {
        false
    }
}

/// The outcome of [`process`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessedExtensions {
    /// Extensions to append to the certificate template.
    pub extensions: Vec<Extension>,

    /// At most one entry per tag.
    pub telemetry: BTreeSet<ExtensionTelemetry>,
}

/// Decides which of the `requested` extensions end up in the certificate.
///
/// Unsupported extensions are dropped. Recognized ones are copied verbatim,
/// keeping the first occurrence of each OID. Must-staple requests are
/// validated and, if `must_staple_enabled`, emitted exactly once.
#[instrument(
    name = "process_csr_extensions",
    skip(requested, profile),
    fields(profile = profile.name(), requested = requested.len()),
)]
pub fn process(
    requested: &[Extension],
    profile: &SigningProfile,
    must_staple_enabled: bool,
) -> Result<ProcessedExtensions> {
    let mut telemetry = BTreeSet::new();
    let mut extensions = Vec::new();
    let mut seen = HashSet::new();
    let mut must_staple_requested = false;

    for extension in requested {
        match RequestedExtension::classify(extension, profile.allowed_extensions()) {
            RequestedExtension::Unsupported(oid) => {
                let tag = if is_ca_managed(&oid) {
                    ExtensionTelemetry::BasicExtensionRequested
                } else {
                    ExtensionTelemetry::OtherExtensionRequested
                };
                telemetry.insert(tag);

                debug!(extension.oid = %oid, "dropping unsupported extension");
            }
            RequestedExtension::MustStaple(extension) => {
                telemetry.insert(ExtensionTelemetry::TlsFeatureRequested);

                if let Err(reason) = validate_tls_feature(extension) {
                    telemetry.insert(ExtensionTelemetry::TlsFeatureInvalid);
                    warn!(reason, "rejecting invalid must-staple request");

                    return InvalidTlsFeatureSnafu { reason, telemetry }.fail();
                }

                must_staple_requested = true;
            }
            RequestedExtension::Recognized(extension) => {
                if seen.insert(extension.extn_id) {
                    extensions.push(extension.clone());
                }
            }
        }
    }

    if must_staple_requested && must_staple_enabled {
        let must_staple = TlsFeature::must_staple()
            .to_extension(&Name::default(), &extensions)
            .context(EncodeTlsFeatureSnafu)?;
        extensions.push(must_staple);
    }

    Ok(ProcessedExtensions {
        extensions,
        telemetry,
    })
}

fn validate_tls_feature(extension: &Extension) -> Result<(), &'static str> {
    let feature = TlsFeature::from_der(extension.extn_value.as_bytes())
        .map_err(|_| "value is not a sequence of integers")?;

    if feature.0.is_empty() {
        return Err("no features requested");
    }

    if feature.0.iter().any(|f| *f != TLS_FEATURE_STATUS_REQUEST) {
        return Err("only status_request is supported");
    }

    Ok(())
}
