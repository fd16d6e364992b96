//! Fixtures shared by the unit tests of this crate.
use std::{collections::BTreeMap, num::NonZeroU32, sync::Mutex};

use async_trait::async_trait;
use ca_shared::time::Duration;
use const_oid::{ObjectIdentifier, db::rfc5280::ID_CE_SUBJECT_ALT_NAME};
use rand_core::{CryptoRng, RngCore};
use signature::Signer;
use x509_cert::{
    Certificate,
    attr::Attribute,
    der::{
        Decode, Encode,
        asn1::{Any, Ia5String, OctetString, SetOfVec},
    },
    ext::{
        Extension,
        pkix::{SubjectAltName, name::GeneralName},
    },
    name::Name,
    request::{CertReq, CertReqInfo, Version},
    serial_number::SerialNumber,
    spki::{DynSignatureAlgorithmIdentifier, SignatureBitStringEncoding},
};

use crate::{
    ca::{CertificateTemplate, subject_name},
    clock::{Clock, FakeClock},
    config::{CaConfig, CsrWhitelist, ExtKeyUsageName, KeyUsageName, ProfileConfig},
    issuer::Issuer,
    keys::{CertificateKeypair, ecdsa},
    ocsp::{BasicOcspResponse, OcspResponse, OcspResponseStatus},
    oid::{ID_EXTENSION_REQ, ID_PE_TLS_FEATURE, ID_PKIX_OCSP_BASIC},
    policy::{ForbiddenSnafu, PolicyAuthority, PolicyError},
    profile::{KeyAlgorithm, ProfileSelector},
    store::{CertificateStore, CollaboratorError},
};

/// An extension OID the RSA test profile allows to be copied from the CSR.
pub const RECOGNIZED_EXTENSION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.44947.1.1.1");

/// Fills every requested byte with the contained value.
pub struct FixedRng(pub u8);

impl RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        u32::from_ne_bytes([self.0; 4])
    }

    fn next_u64(&mut self) -> u64 {
        u64::from_ne_bytes([self.0; 8])
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(self.0);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for FixedRng {}

/// Fails every fallible request for random bytes.
pub struct FailingRng;

impl RngCore for FailingRng {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }

    fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand_core::Error> {
        let code = NonZeroU32::new(rand_core::Error::CUSTOM_START).unwrap();
        Err(rand_core::Error::from(code))
    }
}

impl CryptoRng for FailingRng {}

#[derive(Default)]
pub struct CsrOptions<'a> {
    pub common_name: Option<&'a str>,
    pub organization: Option<&'a str>,

    /// Put into a subject alternative name extension, if not empty.
    pub dns_names: &'a [&'a str],

    /// Requested in addition to the subject alternative names.
    pub extensions: Vec<Extension>,
}

/// Builds a CSR signed by `key`.
pub fn build_csr<K>(key: &K, options: CsrOptions<'_>) -> CertReq
where
    K: CertificateKeypair,
{
    let subject = [
        options.common_name.map(|cn| format!("CN={cn}")),
        options.organization.map(|o| format!("O={o}")),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(",");
    let subject = if subject.is_empty() {
        Name::default()
    } else {
        subject.parse().unwrap()
    };

    let mut extensions = Vec::new();
    if !options.dns_names.is_empty() {
        let san = SubjectAltName(
            options
                .dns_names
                .iter()
                .map(|name| GeneralName::DnsName(Ia5String::new(name).unwrap()))
                .collect(),
        );
        extensions.push(Extension {
            extn_id: ID_CE_SUBJECT_ALT_NAME,
            critical: false,
            extn_value: OctetString::new(san.to_der().unwrap()).unwrap(),
        });
    }
    extensions.extend(options.extensions);

    let mut attributes = SetOfVec::new();
    if !extensions.is_empty() {
        let mut values = SetOfVec::new();
        values.insert(Any::encode_from(&extensions).unwrap()).unwrap();
        attributes
            .insert(Attribute {
                oid: ID_EXTENSION_REQ,
                values,
            })
            .unwrap();
    }

    let info = CertReqInfo {
        version: Version::V1,
        subject,
        public_key: key.subject_public_key_info().unwrap(),
        attributes,
    };

    let signature: K::Signature = key.signing_key().try_sign(&info.to_der().unwrap()).unwrap();
    CertReq {
        info,
        algorithm: key.signing_key().signature_algorithm_identifier().unwrap(),
        signature: signature.to_bitstring().unwrap(),
    }
}

pub fn extension(oid: ObjectIdentifier, value: &[u8]) -> Extension {
    Extension {
        extn_id: oid,
        critical: false,
        extn_value: OctetString::new(value).unwrap(),
    }
}

/// Profiles `rsaEE` (digitalSignature, keyEncipherment) and `ecdsaEE`
/// (digitalSignature, with policies, AIA and CRL URLs), at most three names
/// and 90 days of validity.
pub fn test_config() -> CaConfig {
    let rsa = ProfileConfig {
        key_usages: vec![KeyUsageName::DigitalSignature, KeyUsageName::KeyEncipherment],
        ext_key_usages: vec![ExtKeyUsageName::ServerAuth, ExtKeyUsageName::ClientAuth],
        backdate: Duration::from_hours_unchecked(1),
        csr_whitelist: CsrWhitelist::default(),
        allowed_extensions: vec![
            ID_PE_TLS_FEATURE.to_string(),
            RECOGNIZED_EXTENSION.to_string(),
        ],
        ..Default::default()
    };

    let ecdsa = ProfileConfig {
        key_usages: vec![KeyUsageName::DigitalSignature],
        ext_key_usages: vec![ExtKeyUsageName::ServerAuth],
        policies: vec!["2.23.140.1.2.1".to_owned()],
        issuer_urls: vec!["http://ca.example.com/issuer.der".to_owned()],
        ocsp_url: Some("http://ocsp.example.com".to_owned()),
        crl_url: Some("http://ca.example.com/crl.der".to_owned()),
        backdate: Duration::from_hours_unchecked(1),
        csr_whitelist: CsrWhitelist::default(),
        allowed_extensions: vec![ID_PE_TLS_FEATURE.to_string()],
        ..Default::default()
    };

    CaConfig {
        serial_prefix: 0x11,
        max_names: 3,
        expiry: Duration::from_days_unchecked(90),
        lifespan_ocsp: Duration::from_hours_unchecked(96),
        enable_must_staple: true,
        force_cn_from_san: true,
        rsa_profile: "rsaEE".to_owned(),
        ecdsa_profile: "ecdsaEE".to_owned(),
        profiles: BTreeMap::from([("rsaEE".to_owned(), rsa), ("ecdsaEE".to_owned(), ecdsa)]),
    }
}

/// Forbids every name starting with `forbidden`.
#[derive(Debug, Default)]
pub struct DenyListAuthority;

impl PolicyAuthority for DenyListAuthority {
    fn will_issue(&self, names: &[String]) -> Result<(), PolicyError> {
        match names.iter().find(|name| name.starts_with("forbidden")) {
            Some(name) => ForbiddenSnafu {
                name: name.as_str(),
                reason: "name is on the deny list",
            }
            .fail(),
            None => Ok(()),
        }
    }
}

/// Keeps every stored certificate in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    certificates: Mutex<Vec<(Vec<u8>, String, i64)>>,
}

impl MemoryStore {
    pub fn certificates(&self) -> Vec<(Vec<u8>, String, i64)> {
        self.certificates.lock().unwrap().clone()
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn add_certificate(
        &self,
        der: &[u8],
        serial: &str,
        registration_id: i64,
    ) -> Result<(), CollaboratorError> {
        self.certificates
            .lock()
            .unwrap()
            .push((der.to_vec(), serial.to_owned(), registration_id));
        Ok(())
    }
}

#[derive(Debug)]
pub struct FailingStore;

#[async_trait]
impl CertificateStore for FailingStore {
    async fn add_certificate(
        &self,
        _der: &[u8],
        _serial: &str,
        _registration_id: i64,
    ) -> Result<(), CollaboratorError> {
        Err("database unavailable".into())
    }
}

/// Issues a one day leaf certificate for a fresh ECDSA key, signed by
/// `issuer`.
pub fn signed_leaf(issuer: &Issuer, clock: &FakeClock) -> Certificate {
    let key = ecdsa::SigningKey::new().unwrap();
    let public_key = key.subject_public_key_info().unwrap();
    let profiles = ProfileSelector::from_config(&test_config()).unwrap();
    let serial = SerialNumber::from(rand::random::<u32>());
    let dns_names = vec!["leaf.example.com".to_owned()];

    let tbs_certificate = CertificateTemplate::builder()
        .serial_number(serial)
        .subject(subject_name(Some("leaf.example.com"), "01", None).unwrap())
        .public_key(&public_key)
        .dns_names(&dns_names)
        .not_before(clock.now())
        .not_after(clock.now() + Duration::from_days_unchecked(1))
        .profile(profiles.select(KeyAlgorithm::Ecdsa))
        .signed_by(issuer)
        .build()
        .unwrap();

    issuer.sign_certificate(tbs_certificate).unwrap()
}

/// Decodes a successful OCSP response and returns the contained basic
/// response.
pub fn decode_ocsp_response(der: &[u8]) -> BasicOcspResponse {
    let response = OcspResponse::from_der(der).unwrap();
    assert_eq!(response.response_status, OcspResponseStatus::Successful);

    let bytes = response.response_bytes.unwrap();
    assert_eq!(bytes.response_type, ID_PKIX_OCSP_BASIC);

    BasicOcspResponse::from_der(bytes.response.as_bytes()).unwrap()
}
