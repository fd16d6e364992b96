//! Contains the [`CertificateAuthority`], which validates certificate signing
//! requests and issues signed leaf certificates, and the types it returns.
use std::{collections::BTreeSet, sync::Arc, time::SystemTime};

use bon::Builder;
use ca_shared::time::Duration;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{Span, debug, instrument, warn};
use x509_cert::{Certificate, der::Encode, name::Name, request::CertReq};

use crate::{
    ErrorKind,
    clock::{Clock, SystemClock, truncate_to_seconds},
    config::CaConfig,
    csr::{CertificateRequest, CsrError},
    extensions::{self, ProcessExtensionsError},
    issuer::{Issuer, IssuerError, IssuerRegistry, IssuerRegistryError},
    metrics::{Metrics, SignatureKind},
    ocsp::{GenerateOcspError, OcspResponder, OcspSigningRequest},
    policy::{KeyPolicy, PolicyAuthority, PolicyError, StandardKeyPolicy},
    profile::{ProfileError, ProfileSelector},
    serial::{SerialAllocator, SerialError},
    store::{CertificateStore, CollaboratorError, NoopPublisher, Publisher},
};

mod consts;
mod template;
pub use consts::*;
pub use template::*;

/// A signed certificate as returned by
/// [`CertificateAuthority::issue_certificate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub der: Vec<u8>,
    pub certificate: Certificate,

    /// Canonical rendering of the serial, lowercase hex padded to 36
    /// characters.
    pub serial: String,
    pub issuer: Name,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
}

#[derive(Debug, Snafu)]
pub enum IssueCertificateError {
    #[snafu(display("failed to parse certificate signing request"))]
    ParseCsr { source: CsrError },

    #[snafu(display("certificate signing request has an invalid self-signature"))]
    InvalidCsrSignature { source: CsrError },

    #[snafu(display("failed to read names from certificate signing request"))]
    ReadNames { source: CsrError },

    #[snafu(display("certificate signing request contains no names"))]
    NoNames,

    #[snafu(display("name {name:?} contains non-ASCII characters"))]
    InvalidName { name: String },

    #[snafu(display("certificate signing request contains {count} names, at most {max} are allowed"))]
    TooManyNames { count: usize, max: usize },

    #[snafu(display(
        "common name {common_name:?} is {length} bytes long, at most {MAX_CN_LENGTH} are allowed"
    ))]
    CommonNameTooLong { common_name: String, length: usize },

    #[snafu(display("public key rejected by key policy"))]
    KeyRejected { source: PolicyError },

    #[snafu(display("names rejected by policy authority"))]
    NamesRejected { source: PolicyError },

    #[snafu(display("failed to select a signing profile"))]
    SelectProfile { source: ProfileError },

    #[snafu(display("failed to process requested extensions"))]
    ProcessExtensions { source: ProcessExtensionsError },

    #[snafu(display("failed to allocate serial number"))]
    AllocateSerial { source: SerialError },

    #[snafu(display("failed to build certificate subject"))]
    BuildSubject { source: x509_cert::der::Error },

    #[snafu(display("failed to build certificate template"))]
    BuildTemplate { source: CreateTemplateError },

    #[snafu(display("failed to sign certificate"))]
    SignCertificate { source: IssuerError },

    #[snafu(display("failed to encode certificate as DER"))]
    EncodeCertificate { source: x509_cert::der::Error },

    #[snafu(display("failed to store certificate with serial {}", certificate.serial))]
    StoreCertificate {
        source: CollaboratorError,
        certificate: Box<IssuedCertificate>,
    },

    #[snafu(display("failed to publish certificate with serial {}", certificate.serial))]
    PublishCertificate {
        source: CollaboratorError,
        certificate: Box<IssuedCertificate>,
    },
}

impl IssueCertificateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ParseCsr { .. }
            | Self::InvalidCsrSignature { .. }
            | Self::ReadNames { .. }
            | Self::NoNames
            | Self::InvalidName { .. }
            | Self::TooManyNames { .. }
            | Self::CommonNameTooLong { .. }
            | Self::KeyRejected { .. }
            | Self::NamesRejected { .. } => ErrorKind::Malformed,
            Self::ProcessExtensions { source } => match source {
                ProcessExtensionsError::InvalidTlsFeature { .. } => ErrorKind::Malformed,
                ProcessExtensionsError::EncodeTlsFeature { .. } => ErrorKind::InternalError,
            },
            Self::SelectProfile { .. }
            | Self::AllocateSerial { .. }
            | Self::BuildSubject { .. }
            | Self::BuildTemplate { .. }
            | Self::SignCertificate { .. }
            | Self::EncodeCertificate { .. }
            | Self::StoreCertificate { .. }
            | Self::PublishCertificate { .. } => ErrorKind::InternalError,
        }
    }

    /// Returns the certificate if the error happened after it was signed,
    /// i.e. while storing or publishing it.
    pub fn signed_certificate(&self) -> Option<&IssuedCertificate> {
        match self {
            Self::StoreCertificate { certificate, .. }
            | Self::PublishCertificate { certificate, .. } => Some(certificate),
            _ => None,
        }
    }
}

#[derive(Debug, Snafu)]
pub enum CreateCertificateAuthorityError {
    #[snafu(display("failed to create serial allocator"))]
    CreateSerialAllocator { source: SerialError },

    #[snafu(display("failed to load signing profiles"))]
    LoadProfiles { source: ProfileError },

    #[snafu(display("failed to create issuer registry"))]
    CreateIssuerRegistry { source: IssuerRegistryError },

    #[snafu(display("max_names must allow at least one name"))]
    InvalidMaxNames,
}

impl CreateCertificateAuthorityError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InternalError
    }
}

/// This builder creates a [`CertificateAuthority`] from its configuration,
/// its issuers and the external collaborators.
///
/// - The first entry of `issuers` becomes the default issuer, which signs
///   all new certificates. The remaining issuers are only used for OCSP.
/// - `key_policy` defaults to [`StandardKeyPolicy::default`].
/// - `publisher` defaults to [`NoopPublisher`].
/// - `clock` defaults to [`SystemClock`].
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct CertificateAuthorityBuilder {
    config: CaConfig,

    /// Issuers may use different key algorithms.
    issuers: Vec<Issuer>,

    policy_authority: Arc<dyn PolicyAuthority>,

    key_policy: Option<Arc<dyn KeyPolicy>>,

    store: Arc<dyn CertificateStore>,

    publisher: Option<Arc<dyn Publisher>>,

    clock: Option<Arc<dyn Clock>>,
}

impl<S> CertificateAuthorityBuilderBuilder<S>
where
    S: certificate_authority_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<CertificateAuthority, CreateCertificateAuthorityError> {
        self.finish_builder().build()
    }
}

impl CertificateAuthorityBuilder {
    #[instrument(name = "build_certificate_authority", skip(self), fields(
        issuers = self.issuers.len(),
        serial_prefix = self.config.serial_prefix,
    ))]
    pub fn build(self) -> Result<CertificateAuthority, CreateCertificateAuthorityError> {
        let config = self.config;
        ensure!(config.max_names > 0, InvalidMaxNamesSnafu);

        let serials =
            SerialAllocator::new(config.serial_prefix).context(CreateSerialAllocatorSnafu)?;
        let profiles = ProfileSelector::from_config(&config).context(LoadProfilesSnafu)?;
        let issuers =
            Arc::new(IssuerRegistry::new(self.issuers).context(CreateIssuerRegistrySnafu)?);

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let key_policy: Arc<dyn KeyPolicy> = match self.key_policy {
            Some(key_policy) => key_policy,
            None => Arc::new(StandardKeyPolicy::default()),
        };
        let publisher: Arc<dyn Publisher> = match self.publisher {
            Some(publisher) => publisher,
            None => Arc::new(NoopPublisher),
        };

        debug!(
            ca.default_issuer = %issuers.default_issuer().subject(),
            ca.max_names = config.max_names,
            ca.expiry = %config.expiry,
            ca.enable_must_staple = config.enable_must_staple,
            ca.force_cn_from_san = config.force_cn_from_san,
            "created certificate authority"
        );

        let ocsp = OcspResponder::new(issuers.clone(), config.lifespan_ocsp, clock.clone());

        Ok(CertificateAuthority {
            issuers,
            profiles,
            serials,
            max_names: config.max_names,
            expiry: config.expiry,
            enable_must_staple: config.enable_must_staple,
            force_cn_from_san: config.force_cn_from_san,
            policy_authority: self.policy_authority,
            key_policy,
            store: self.store,
            publisher,
            clock,
            metrics: Metrics::from_global(),
            ocsp,
        })
    }
}

/// A certificate authority issuing leaf certificates with the default issuer
/// of its [`IssuerRegistry`], and OCSP responses with whichever registered
/// issuer signed the certificate in question.
///
/// Use [`CertificateAuthority::builder`] to create one.
#[derive(Debug)]
pub struct CertificateAuthority {
    issuers: Arc<IssuerRegistry>,
    profiles: ProfileSelector,
    serials: SerialAllocator,
    max_names: usize,
    expiry: Duration,
    enable_must_staple: bool,
    force_cn_from_san: bool,
    policy_authority: Arc<dyn PolicyAuthority>,
    key_policy: Arc<dyn KeyPolicy>,
    store: Arc<dyn CertificateStore>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    ocsp: OcspResponder,
}

impl CertificateAuthority {
    /// Use this function in combination with [`CertificateAuthorityBuilder`]
    /// to create new CAs.
    pub fn builder() -> CertificateAuthorityBuilderBuilder {
        CertificateAuthorityBuilder::start_builder()
    }

    pub fn issuers(&self) -> &IssuerRegistry {
        &self.issuers
    }

    pub fn ocsp_responder(&self) -> &OcspResponder {
        &self.ocsp
    }

    /// Validates `csr` and issues a certificate signed by the default issuer.
    ///
    /// The certificate is stored and published before it is returned. If
    /// either of them fails, the error still carries the certificate, see
    /// [`IssueCertificateError::signed_certificate`].
    #[instrument(
        name = "issue_certificate",
        skip(self, csr),
        fields(subject = %csr.info.subject, serial = tracing::field::Empty),
    )]
    pub async fn issue_certificate(
        &self,
        csr: &CertReq,
        registration_id: i64,
    ) -> Result<IssuedCertificate, IssueCertificateError> {
        let result = match CertificateRequest::new(csr.clone()).context(ParseCsrSnafu) {
            Ok(request) => self.issue(&request, registration_id).await,
            Err(err) => Err(err),
        };

        result.inspect_err(log_rejection)
    }

    /// Same as [`Self::issue_certificate`], but takes the DER encoded CSR.
    #[instrument(
        name = "issue_certificate_der",
        skip(self, csr_der),
        fields(serial = tracing::field::Empty),
    )]
    pub async fn issue_certificate_der(
        &self,
        csr_der: &[u8],
        registration_id: i64,
    ) -> Result<IssuedCertificate, IssueCertificateError> {
        let result = match CertificateRequest::from_der(csr_der).context(ParseCsrSnafu) {
            Ok(request) => self.issue(&request, registration_id).await,
            Err(err) => Err(err),
        };

        result.inspect_err(log_rejection)
    }

    /// Signs an OCSP response, see [`OcspResponder::generate`].
    pub fn generate_ocsp(&self, request: &OcspSigningRequest) -> Result<Vec<u8>, GenerateOcspError> {
        self.ocsp.generate(request)
    }

    async fn issue(
        &self,
        csr: &CertificateRequest,
        registration_id: i64,
    ) -> Result<IssuedCertificate, IssueCertificateError> {
        csr.verify_signature().context(InvalidCsrSignatureSnafu)?;

        let (common_name, names) = self.names(csr)?;

        self.key_policy
            .good_key(csr.public_key())
            .context(KeyRejectedSnafu)?;
        self.policy_authority
            .will_issue(&names)
            .context(NamesRejectedSnafu)?;

        let profile = self
            .profiles
            .select_by_oid(csr.public_key().algorithm.oid)
            .context(SelectProfileSnafu)?;

        let processed =
            extensions::process(csr.requested_extensions(), profile, self.enable_must_staple)
                .inspect_err(|err| self.record_extension_telemetry(&err.telemetry()))
                .context(ProcessExtensionsSnafu)?;
        self.record_extension_telemetry(&processed.telemetry);

        let serial = self.serials.allocate().context(AllocateSerialSnafu)?;
        let serial_string = serial.to_string();
        Span::current().record("serial", serial_string.as_str());

        let retained_subject = profile.csr_whitelist().subject.then_some(csr.subject());
        let subject = subject_name(common_name.as_deref(), &serial_string, retained_subject)
            .context(BuildSubjectSnafu)?;

        let now = truncate_to_seconds(self.clock.now());
        let not_before = now - profile.backdate();
        let not_after = not_before + profile.expiry().unwrap_or(self.expiry);

        let issuer = self.issuers.default_issuer();
        let tbs_certificate = CertificateTemplate::builder()
            .serial_number(serial.to_serial_number().context(AllocateSerialSnafu)?)
            .subject(subject)
            .public_key(csr.public_key())
            .dns_names(&names)
            .not_before(not_before)
            .not_after(not_after)
            .profile(profile)
            .extra_extensions(processed.extensions)
            .signed_by(issuer)
            .build()
            .context(BuildTemplateSnafu)?;

        let certificate = issuer
            .sign_certificate(tbs_certificate)
            .context(SignCertificateSnafu)?;
        self.metrics.record_signature(SignatureKind::Certificate);
        let der = certificate.to_der().context(EncodeCertificateSnafu)?;

        let issued = IssuedCertificate {
            der,
            certificate,
            serial: serial_string,
            issuer: issuer.subject().clone(),
            not_before,
            not_after,
        };
        debug!(
            certificate.serial = issued.serial,
            certificate.issuer = %issued.issuer,
            certificate.profile = profile.name(),
            certificate.names = ?names,
            "signed certificate"
        );

        self.store
            .add_certificate(&issued.der, &issued.serial, registration_id)
            .await
            .with_context(|_| StoreCertificateSnafu {
                certificate: Box::new(issued.clone()),
            })?;
        self.publisher
            .submit(&issued.der)
            .await
            .with_context(|_| PublishCertificateSnafu {
                certificate: Box::new(issued.clone()),
            })?;

        Ok(issued)
    }

    /// Returns the common name and the sorted, distinct and lowercase names
    /// of the certificate. The common name is always part of the names.
    ///
    /// Names must be ASCII, internationalized names are only accepted in
    /// their A-label form.
    fn names(
        &self,
        csr: &CertificateRequest,
    ) -> Result<(Option<String>, Vec<String>), IssueCertificateError> {
        let dns_names = csr.dns_names().context(ReadNamesSnafu)?;
        let mut raw_common_name = csr.common_name().context(ReadNamesSnafu)?;

        if let Some(name) = dns_names
            .iter()
            .chain(raw_common_name.iter())
            .find(|name| !name.is_ascii())
        {
            return InvalidNameSnafu { name: name.clone() }.fail();
        }

        if raw_common_name.is_none() && self.force_cn_from_san {
            raw_common_name = dns_names.first().cloned();
        }
        let common_name = raw_common_name.as_deref().map(str::to_ascii_lowercase);

        let names = dns_names
            .iter()
            .map(|name| name.to_ascii_lowercase())
            .chain(common_name.clone())
            .collect::<BTreeSet<_>>();

        ensure!(!names.is_empty(), NoNamesSnafu);
        ensure!(names.len() <= self.max_names, TooManyNamesSnafu {
            count: names.len(),
            max: self.max_names,
        });

        if let Some(raw_common_name) = &raw_common_name {
            ensure!(raw_common_name.len() <= MAX_CN_LENGTH, CommonNameTooLongSnafu {
                common_name: raw_common_name.clone(),
                length: raw_common_name.len(),
            });
        }

        Ok((common_name, names.into_iter().collect()))
    }

    fn record_extension_telemetry(&self, telemetry: &BTreeSet<extensions::ExtensionTelemetry>) {
        for tag in telemetry {
            self.metrics.record_csr_extension(*tag);
        }
    }
}

fn log_rejection(err: &IssueCertificateError) {
    warn!(error = %err, kind = %err.kind(), "rejected certificate request");
}

#[cfg(test)]
mod tests {
    use const_oid::db::rfc5280::{ID_CE_KEY_USAGE, ID_CE_SUBJECT_ALT_NAME};
    use rstest::rstest;
    use x509_cert::{
        der::{Decode, asn1::GeneralizedTime},
        ext::{
            Extension,
            pkix::{KeyUsage, KeyUsages, SubjectAltName, name::GeneralName},
        },
    };

    use super::*;
    use crate::{
        clock::FakeClock,
        extensions::TlsFeature,
        keys::{CertificateKeypair, ecdsa, rsa},
        ocsp::{CertStatus, OcspStatus},
        oid::{CT_PRECERT_POISON, ID_PE_TLS_FEATURE},
        policy::StandardKeyPolicy,
        profile::KeyAlgorithm,
        serial::serial_to_string,
        test_utils::{
            CsrOptions, DenyListAuthority, FailingStore, MemoryStore, RECOGNIZED_EXTENSION,
            build_csr, decode_ocsp_response, extension, signed_leaf, test_config,
        },
        verify::verify_certificate,
    };

    const MUST_STAPLE_DER: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x05];

    // 65 bytes
    const LONG_COMMON_NAME: &str =
        "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa.example.com";

    struct TestCa {
        ca: CertificateAuthority,
        store: Arc<MemoryStore>,
        clock: FakeClock,
    }

    fn test_ca(config: CaConfig) -> TestCa {
        let clock = FakeClock::default();
        let issuer = Issuer::builder_with_ecdsa()
            .not_before(clock.now())
            .build()
            .unwrap();

        test_ca_with_issuers(config, vec![issuer], clock)
    }

    fn test_ca_with_issuers(
        config: CaConfig,
        issuers: Vec<Issuer>,
        clock: FakeClock,
    ) -> TestCa {
        let store = Arc::new(MemoryStore::default());
        let ca = CertificateAuthority::builder()
            .config(config)
            .issuers(issuers)
            .policy_authority(Arc::new(DenyListAuthority::default()))
            .key_policy(Arc::new(
                StandardKeyPolicy::builder().rsa_min_bits(512).build(),
            ))
            .store(store.clone())
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        TestCa { ca, store, clock }
    }

    fn dns_names(certificate: &Certificate) -> Vec<String> {
        let extension = certificate
            .tbs_certificate
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == ID_CE_SUBJECT_ALT_NAME)
            .unwrap();

        SubjectAltName::from_der(extension.extn_value.as_bytes())
            .unwrap()
            .0
            .into_iter()
            .filter_map(|name| match name {
                GeneralName::DnsName(name) => Some(name.to_string()),
                _ => None,
            })
            .collect()
    }

    fn subject_attribute(certificate: &Certificate, oid: const_oid::ObjectIdentifier) -> Option<String> {
        certificate
            .tbs_certificate
            .subject
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .find(|atv| atv.oid == oid)
            .map(|atv| String::from_utf8(atv.value.value().to_vec()).unwrap())
    }

    #[tokio::test]
    async fn issues_valid_csr() {
        let TestCa { ca, store, clock } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            common_name: Some("Foo.Example.com"),
            dns_names: &["foo.example.com", "BAR.example.com"],
            ..Default::default()
        });

        let issued = ca.issue_certificate(&csr, 42).await.unwrap();
        let tbs = &issued.certificate.tbs_certificate;

        assert_eq!(issued.serial.len(), 36);
        assert!(issued.serial.starts_with("11"));
        assert_eq!(serial_to_string(&tbs.serial_number), issued.serial);
        assert_eq!(
            subject_attribute(&issued.certificate, const_oid::db::rfc4519::SERIAL_NUMBER),
            Some(issued.serial.clone())
        );
        assert_eq!(
            subject_attribute(&issued.certificate, const_oid::db::rfc4519::CN).as_deref(),
            Some("foo.example.com")
        );
        assert_eq!(dns_names(&issued.certificate), vec![
            "bar.example.com",
            "foo.example.com"
        ]);

        let backdate = Duration::from_hours_unchecked(1);
        assert_eq!(issued.not_before, clock.now() - backdate);
        assert_eq!(
            issued.not_after,
            clock.now() - backdate + Duration::from_days_unchecked(90)
        );
        assert_eq!(tbs.validity.not_before.to_system_time(), issued.not_before);

        verify_certificate(&issued.certificate, ca.issuers().default_issuer().public_key())
            .unwrap();
        assert_eq!(Certificate::from_der(&issued.der).unwrap(), issued.certificate);
        assert_eq!(store.certificates(), vec![(
            issued.der.clone(),
            issued.serial.clone(),
            42
        )]);
    }

    #[tokio::test]
    async fn issues_from_der() {
        let TestCa { ca, .. } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["foo.example.com"],
            ..Default::default()
        });

        let issued = ca
            .issue_certificate_der(&csr.to_der().unwrap(), 1)
            .await
            .unwrap();
        assert_eq!(dns_names(&issued.certificate), vec!["foo.example.com"]);

        let err = ca.issue_certificate_der(&[0x30, 0x00], 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[rstest]
    #[case::no_names(None, &[])]
    #[case::too_many_names(None, &["a.example.com", "b.example.com", "c.example.com", "d.example.com"])]
    #[case::common_name_too_long(Some(LONG_COMMON_NAME), &[])]
    #[tokio::test]
    async fn rejects_invalid_names(#[case] common_name: Option<&str>, #[case] names: &[&str]) {
        let TestCa { ca, store, .. } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            common_name,
            dns_names: names,
            ..Default::default()
        });

        let err = ca.issue_certificate(&csr, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert!(err.signed_certificate().is_none());
        assert!(store.certificates().is_empty());
    }

    #[rstest]
    #[case::common_name(Some("bücher.example.com"), &[])]
    #[case::common_name_with_ascii_sans(Some("straße.example.com"), &["strasse.example.com"])]
    #[tokio::test]
    async fn non_ascii_names_are_malformed(
        #[case] common_name: Option<&str>,
        #[case] names: &[&str],
    ) {
        let TestCa { ca, store, .. } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            common_name,
            dns_names: names,
            ..Default::default()
        });

        let err = ca.issue_certificate(&csr, 1).await.unwrap_err();
        assert!(matches!(err, IssueCertificateError::InvalidName { .. }));
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert!(store.certificates().is_empty());
    }

    #[tokio::test]
    async fn common_name_length_is_checked_as_requested() {
        let TestCa { ca, .. } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let long_common_name = LONG_COMMON_NAME.to_ascii_uppercase();
        let csr = build_csr(&key, CsrOptions {
            common_name: Some(&long_common_name),
            ..Default::default()
        });

        let err = ca.issue_certificate(&csr, 1).await.unwrap_err();
        assert!(matches!(
            err,
            IssueCertificateError::CommonNameTooLong { ref common_name, length: 65 }
                if *common_name == long_common_name
        ));
    }

    #[tokio::test]
    async fn max_names_counts_distinct_names() {
        let TestCa { ca, .. } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            common_name: Some("A.example.com"),
            dns_names: &["a.example.com", "b.example.com", "c.example.com", "A.EXAMPLE.COM"],
            ..Default::default()
        });

        let issued = ca.issue_certificate(&csr, 1).await.unwrap();
        assert_eq!(dns_names(&issued.certificate).len(), 3);
    }

    #[tokio::test]
    async fn common_name_is_added_to_names() {
        let TestCa { ca, .. } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            common_name: Some("cn.example.com"),
            dns_names: &["san.example.com"],
            ..Default::default()
        });

        let issued = ca.issue_certificate(&csr, 1).await.unwrap();
        assert_eq!(dns_names(&issued.certificate), vec![
            "cn.example.com",
            "san.example.com"
        ]);
    }

    #[rstest]
    #[case::forced(true, Some("b.example.com"))]
    #[case::not_forced(false, None)]
    #[tokio::test]
    async fn force_cn_from_san(#[case] force: bool, #[case] expected: Option<&str>) {
        let mut config = test_config();
        config.force_cn_from_san = force;
        let TestCa { ca, .. } = test_ca(config);
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["b.example.com", "a.example.com"],
            ..Default::default()
        });

        let issued = ca.issue_certificate(&csr, 1).await.unwrap();
        assert_eq!(
            subject_attribute(&issued.certificate, const_oid::db::rfc4519::CN).as_deref(),
            expected
        );
    }

    #[tokio::test]
    async fn invalid_self_signature() {
        let TestCa { ca, .. } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let mut csr = build_csr(&key, CsrOptions {
            common_name: Some("foo.example.com"),
            ..Default::default()
        });
        csr.info.subject = "CN=bar.example.com".parse().unwrap();

        let err = ca.issue_certificate(&csr, 1).await.unwrap_err();
        assert!(matches!(err, IssueCertificateError::InvalidCsrSignature { .. }));
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn policy_rejections_are_malformed() {
        let TestCa { ca, .. } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["forbidden.example.com"],
            ..Default::default()
        });

        let err = ca.issue_certificate(&csr, 1).await.unwrap_err();
        assert!(matches!(err, IssueCertificateError::NamesRejected { .. }));
        assert_eq!(err.kind(), ErrorKind::Malformed);

        let clock = FakeClock::default();
        let ca = CertificateAuthority::builder()
            .config(test_config())
            .issuers(vec![
                Issuer::builder_with_ecdsa()
                    .not_before(clock.now())
                    .build()
                    .unwrap(),
            ])
            .policy_authority(Arc::new(DenyListAuthority::default()))
            .key_policy(Arc::new(
                StandardKeyPolicy::builder().allow_ecdsa(false).build(),
            ))
            .store(Arc::new(MemoryStore::default()))
            .clock(Arc::new(clock))
            .build()
            .unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["foo.example.com"],
            ..Default::default()
        });

        let err = ca.issue_certificate(&csr, 1).await.unwrap_err();
        assert!(matches!(err, IssueCertificateError::KeyRejected { .. }));
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn selects_profile_by_key_algorithm() {
        let TestCa { ca, .. } = test_ca(test_config());
        let rsa_key = rsa::SigningKey::new().unwrap();
        let ecdsa_key = ecdsa::SigningKey::new().unwrap();
        let options = || CsrOptions {
            dns_names: &["foo.example.com"],
            ..Default::default()
        };

        let key_usage = |issued: &IssuedCertificate| {
            let extension = issued
                .certificate
                .tbs_certificate
                .extensions
                .iter()
                .flatten()
                .find(|ext| ext.extn_id == ID_CE_KEY_USAGE)
                .unwrap();
            KeyUsage::from_der(extension.extn_value.as_bytes()).unwrap()
        };

        let rsa_issued = ca
            .issue_certificate(&build_csr(&rsa_key, options()), 1)
            .await
            .unwrap();
        let rsa_usage = key_usage(&rsa_issued);
        assert!(rsa_usage.0.contains(KeyUsages::DigitalSignature));
        assert!(rsa_usage.0.contains(KeyUsages::KeyEncipherment));

        let ecdsa_issued = ca
            .issue_certificate(&build_csr(&ecdsa_key, options()), 1)
            .await
            .unwrap();
        let ecdsa_usage = key_usage(&ecdsa_issued);
        assert!(ecdsa_usage.0.contains(KeyUsages::DigitalSignature));
        assert!(!ecdsa_usage.0.contains(KeyUsages::KeyEncipherment));
    }

    #[rstest]
    #[case::disabled(false, 0)]
    #[case::enabled(true, 1)]
    #[tokio::test]
    async fn must_staple(#[case] enabled: bool, #[case] expected: usize) {
        let mut config = test_config();
        config.enable_must_staple = enabled;
        let TestCa { ca, .. } = test_ca(config);
        let key = rsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["foo.example.com"],
            extensions: vec![
                extension(ID_PE_TLS_FEATURE, &MUST_STAPLE_DER),
                extension(ID_PE_TLS_FEATURE, &MUST_STAPLE_DER),
            ],
            ..Default::default()
        });

        let issued = ca.issue_certificate(&csr, 1).await.unwrap();
        let tls_features = issued
            .certificate
            .tbs_certificate
            .extensions
            .iter()
            .flatten()
            .filter(|ext| ext.extn_id == ID_PE_TLS_FEATURE)
            .collect::<Vec<_>>();

        assert_eq!(tls_features.len(), expected);
        for ext in tls_features {
            assert!(!ext.critical);
            assert_eq!(
                TlsFeature::from_der(ext.extn_value.as_bytes()).unwrap(),
                TlsFeature::must_staple()
            );
        }
    }

    #[rstest]
    #[tokio::test]
    async fn empty_must_staple_request(#[values(true, false)] enabled: bool) {
        let mut config = test_config();
        config.enable_must_staple = enabled;
        let TestCa { ca, .. } = test_ca(config);
        let key = rsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["foo.example.com"],
            extensions: vec![extension(ID_PE_TLS_FEATURE, &[])],
            ..Default::default()
        });

        let err = ca.issue_certificate(&csr, 1).await.unwrap_err();
        assert!(matches!(err, IssueCertificateError::ProcessExtensions { .. }));
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[rstest]
    #[case::ecdsa_valid(KeyAlgorithm::Ecdsa, &MUST_STAPLE_DER, true)]
    #[case::ecdsa_empty(KeyAlgorithm::Ecdsa, &[], false)]
    #[case::rsa_valid(KeyAlgorithm::Rsa, &MUST_STAPLE_DER, true)]
    #[case::rsa_empty_sequence(KeyAlgorithm::Rsa, &[0x30, 0x00], false)]
    #[tokio::test]
    async fn must_staple_without_allow_list(
        #[case] algorithm: KeyAlgorithm,
        #[case] value: &[u8],
        #[case] valid: bool,
    ) {
        let mut config = test_config();
        for profile in config.profiles.values_mut() {
            profile.allowed_extensions.clear();
        }
        let TestCa { ca, .. } = test_ca(config);
        let options = CsrOptions {
            dns_names: &["foo.example.com"],
            extensions: vec![extension(ID_PE_TLS_FEATURE, value)],
            ..Default::default()
        };
        let csr = match algorithm {
            KeyAlgorithm::Rsa => build_csr(&rsa::SigningKey::new().unwrap(), options),
            KeyAlgorithm::Ecdsa => build_csr(&ecdsa::SigningKey::new().unwrap(), options),
        };

        let result = ca.issue_certificate(&csr, 1).await;
        if valid {
            let issued = result.unwrap();
            let tls_features = issued
                .certificate
                .tbs_certificate
                .extensions
                .iter()
                .flatten()
                .filter(|ext| ext.extn_id == ID_PE_TLS_FEATURE)
                .count();
            assert_eq!(tls_features, 1);
        } else {
            let err = result.unwrap_err();
            assert!(matches!(err, IssueCertificateError::ProcessExtensions { .. }));
            assert_eq!(err.kind(), ErrorKind::Malformed);
        }
    }

    #[tokio::test]
    async fn unsupported_extensions_are_dropped() {
        let TestCa { ca, .. } = test_ca(test_config());
        let key = rsa::SigningKey::new().unwrap();
        let recognized = extension(RECOGNIZED_EXTENSION, &[0x04, 0x01, 0x01]);
        let must_staple = extension(ID_PE_TLS_FEATURE, &MUST_STAPLE_DER);
        let unsupported = extension(CT_PRECERT_POISON, &[0x05, 0x00]);

        let csr = |extensions: Vec<Extension>| {
            build_csr(&key, CsrOptions {
                dns_names: &["foo.example.com"],
                extensions,
                ..Default::default()
            })
        };
        let without = ca
            .issue_certificate(&csr(vec![recognized.clone(), must_staple.clone()]), 1)
            .await
            .unwrap();
        let with = ca
            .issue_certificate(&csr(vec![recognized.clone(), unsupported, must_staple]), 1)
            .await
            .unwrap();

        let extensions = |issued: &IssuedCertificate| {
            issued
                .certificate
                .tbs_certificate
                .extensions
                .clone()
                .unwrap_or_default()
        };
        let without = extensions(&without);
        let with = extensions(&with);

        // Three requested, two copied
        assert_eq!(with.len(), without.len());
        assert!(with.iter().all(|ext| ext.extn_id != CT_PRECERT_POISON));
        assert!(with.contains(&recognized));
        assert_eq!(
            with.iter()
                .filter(|ext| ext.extn_id == ID_PE_TLS_FEATURE)
                .map(|ext| ext.extn_value.as_bytes())
                .collect::<Vec<_>>(),
            vec![&MUST_STAPLE_DER[..]]
        );
        let oids = |extensions: &[Extension]| {
            extensions.iter().map(|ext| ext.extn_id).collect::<Vec<_>>()
        };
        assert_eq!(oids(&with), oids(&without));
    }

    #[tokio::test]
    async fn subject_whitelist() {
        let mut config = test_config();
        config
            .profiles
            .get_mut("ecdsaEE")
            .unwrap()
            .csr_whitelist
            .subject = true;
        let TestCa { ca, .. } = test_ca(config);
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            common_name: Some("foo.example.com"),
            organization: Some("Example Org"),
            ..Default::default()
        });

        let issued = ca.issue_certificate(&csr, 1).await.unwrap();
        assert_eq!(
            subject_attribute(&issued.certificate, const_oid::db::rfc4519::O).as_deref(),
            Some("Example Org")
        );

        let TestCa { ca, .. } = test_ca(test_config());
        let issued = ca.issue_certificate(&csr, 1).await.unwrap();
        assert_eq!(
            subject_attribute(&issued.certificate, const_oid::db::rfc4519::O),
            None
        );
    }

    #[tokio::test]
    async fn multiple_issuers() {
        let clock = FakeClock::default();
        let first = Issuer::builder_with_ecdsa()
            .subject("CN=First")
            .not_before(clock.now())
            .build()
            .unwrap();
        let second = Issuer::builder_with_ecdsa()
            .subject("CN=Second")
            .not_before(clock.now())
            .build()
            .unwrap();
        let first_key = first.public_key().clone();
        let second_key = second.public_key().clone();
        let TestCa { ca, .. } = test_ca_with_issuers(test_config(), vec![first, second], clock);

        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["foo.example.com"],
            ..Default::default()
        });

        let issued = ca.issue_certificate(&csr, 1).await.unwrap();
        assert_eq!(issued.issuer, "CN=First".parse::<Name>().unwrap());
        verify_certificate(&issued.certificate, &first_key).unwrap();
        assert!(verify_certificate(&issued.certificate, &second_key).is_err());
    }

    #[tokio::test]
    async fn mixed_key_algorithm_issuers() {
        let clock = FakeClock::default();
        let rsa_issuer = Issuer::builder_with_rsa()
            .subject("CN=RSA Issuer")
            .not_before(clock.now())
            .build()
            .unwrap();
        let ecdsa_issuer = Issuer::builder_with_ecdsa()
            .subject("CN=ECDSA Issuer")
            .not_before(clock.now())
            .build()
            .unwrap();
        let rsa_issuer_key = rsa_issuer.public_key().clone();
        let ecdsa_issuer_key = ecdsa_issuer.public_key().clone();
        let ecdsa_leaf = signed_leaf(&ecdsa_issuer, &clock);
        let TestCa { ca, .. } =
            test_ca_with_issuers(test_config(), vec![rsa_issuer, ecdsa_issuer], clock);

        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["foo.example.com"],
            ..Default::default()
        });
        let issued = ca.issue_certificate(&csr, 1).await.unwrap();
        assert_eq!(issued.issuer, "CN=RSA Issuer".parse::<Name>().unwrap());
        verify_certificate(&issued.certificate, &rsa_issuer_key).unwrap();

        for (certificate_der, issuer_key) in [
            (issued.der.clone(), rsa_issuer_key),
            (ecdsa_leaf.to_der().unwrap(), ecdsa_issuer_key),
        ] {
            let der = ca
                .generate_ocsp(&OcspSigningRequest {
                    certificate_der,
                    status: OcspStatus::Good,
                })
                .unwrap();

            let basic = decode_ocsp_response(&der);
            crate::verify::verify_signature(
                &issuer_key,
                &basic.signature_algorithm,
                &basic.tbs_response_data.to_der().unwrap(),
                basic.signature.raw_bytes(),
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn not_after_beyond_issuer() {
        let clock = FakeClock::default();
        let issuer = Issuer::builder_with_ecdsa()
            .not_before(clock.now())
            .validity(Duration::from_days_unchecked(30))
            .build()
            .unwrap();
        let TestCa { ca, store, .. } = test_ca_with_issuers(test_config(), vec![issuer], clock);

        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["foo.example.com"],
            ..Default::default()
        });

        let err = ca.issue_certificate(&csr, 1).await.unwrap_err();
        assert!(matches!(err, IssueCertificateError::BuildTemplate {
            source: CreateTemplateError::CertOutlivesIssuer { .. }
        }));
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert!(store.certificates().is_empty());
    }

    #[tokio::test]
    async fn store_failure_carries_certificate() {
        let clock = FakeClock::default();
        let ca = CertificateAuthority::builder()
            .config(test_config())
            .issuers(vec![
                Issuer::builder_with_ecdsa()
                    .not_before(clock.now())
                    .build()
                    .unwrap(),
            ])
            .policy_authority(Arc::new(DenyListAuthority::default()))
            .store(Arc::new(FailingStore))
            .clock(Arc::new(clock))
            .build()
            .unwrap();

        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["foo.example.com"],
            ..Default::default()
        });

        let err = ca.issue_certificate(&csr, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);

        let issued = err.signed_certificate().unwrap();
        verify_certificate(&issued.certificate, ca.issuers().default_issuer().public_key())
            .unwrap();
    }

    #[tokio::test]
    async fn issue_then_ocsp() {
        let TestCa { ca, clock, .. } = test_ca(test_config());
        let key = ecdsa::SigningKey::new().unwrap();
        let csr = build_csr(&key, CsrOptions {
            dns_names: &["foo.example.com"],
            ..Default::default()
        });
        let issued = ca.issue_certificate(&csr, 1).await.unwrap();

        clock.advance(Duration::from_hours_unchecked(2));
        let der = ca
            .generate_ocsp(&OcspSigningRequest {
                certificate_der: issued.der.clone(),
                status: OcspStatus::Good,
            })
            .unwrap();

        let basic = decode_ocsp_response(&der);
        let single = &basic.tbs_response_data.responses[0];
        assert_eq!(serial_to_string(&single.cert_id.serial_number), issued.serial);
        assert!(matches!(single.cert_status, CertStatus::Good(_)));
        assert_eq!(
            GeneralizedTime::from(single.this_update).to_system_time(),
            clock.now()
        );

        let mut tampered = issued.der.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;
        let err = ca
            .generate_ocsp(&OcspSigningRequest {
                certificate_der: tampered,
                status: OcspStatus::Good,
            })
            .unwrap_err();
        assert_ne!(err.kind(), ErrorKind::InternalError);
    }

    #[test]
    fn zero_serial_prefix() {
        let mut config = test_config();
        config.serial_prefix = 0;

        let err = CertificateAuthority::builder()
            .config(config)
            .issuers(vec![Issuer::builder_with_ecdsa().build().unwrap()])
            .policy_authority(Arc::new(DenyListAuthority::default()))
            .store(Arc::new(MemoryStore::default()))
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            CreateCertificateAuthorityError::CreateSerialAllocator {
                source: SerialError::ZeroSerialPrefix
            }
        ));
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }

    #[test]
    fn zero_max_names() {
        let mut config = test_config();
        config.max_names = 0;

        let err = CertificateAuthority::builder()
            .config(config)
            .issuers(vec![Issuer::builder_with_ecdsa().build().unwrap()])
            .policy_authority(Arc::new(DenyListAuthority::default()))
            .store(Arc::new(MemoryStore::default()))
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            CreateCertificateAuthorityError::InvalidMaxNames
        ));
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }

    #[test]
    fn empty_issuer_list() {
        let err = CertificateAuthority::builder()
            .config(test_config())
            .issuers(Vec::new())
            .policy_authority(Arc::new(DenyListAuthority::default()))
            .store(Arc::new(MemoryStore::default()))
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            CreateCertificateAuthorityError::CreateIssuerRegistry { .. }
        ));
    }
}
