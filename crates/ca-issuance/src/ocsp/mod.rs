//! Signed OCSP responses (RFC 6960) for previously issued certificates.
//!
//! The ASN.1 structures come from [`x509_ocsp`] and are re-exported here.
//! This module adds the SHA-1 based identifiers the responses carry and the
//! [`OcspResponder`] producing them.
use std::time::SystemTime;

use const_oid::AssociatedOid;
use der::{
    Tag,
    asn1::{Any, OctetString},
};
use sha1::{Digest, Sha1};
use x509_cert::{
    der::Encode,
    ext::pkix::CrlReason,
    name::Name,
    serial_number::SerialNumber,
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
};
pub use x509_ocsp::{
    BasicOcspResponse, CertId, CertStatus, OcspGeneralizedTime, OcspResponse, OcspResponseStatus,
    ResponderId, ResponseBytes, ResponseData, RevokedInfo, SingleResponse, Version,
};

mod responder;
pub use responder::*;

/// The status to attest for a certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcspStatus {
    Good,
    Revoked {
        reason: CrlReason,
        revoked_at: SystemTime,
    },
}

/// Everything needed to sign one OCSP response.
#[derive(Clone, Debug)]
pub struct OcspSigningRequest {
    /// DER of the certificate the response is about.
    pub certificate_der: Vec<u8>,
    pub status: OcspStatus,
}

/// Identifies the certificate with `serial_number` issued by the owner of
/// `issuer_name` and `issuer_key`, using SHA-1 hashes with explicit NULL
/// parameters.
pub fn cert_id(
    issuer_name: &Name,
    issuer_key: &SubjectPublicKeyInfoOwned,
    serial_number: SerialNumber,
) -> der::Result<CertId> {
    let name_hash = Sha1::digest(issuer_name.to_der()?);

    Ok(CertId {
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: Sha1::OID,
            parameters: Some(Any::new(Tag::Null, Vec::new())?),
        },
        issuer_name_hash: OctetString::new(name_hash.to_vec())?,
        issuer_key_hash: OctetString::new(key_hash(issuer_key).to_vec())?,
        serial_number,
    })
}

/// The `byKey` responder ID of the holder of `public_key`.
pub fn responder_id(public_key: &SubjectPublicKeyInfoOwned) -> der::Result<ResponderId> {
    OctetString::new(key_hash(public_key).to_vec()).map(ResponderId::ByKey)
}

/// SHA-1 over the subjectPublicKey bits, excluding tag, length and the
/// unused bits count.
fn key_hash(public_key: &SubjectPublicKeyInfoOwned) -> [u8; 20] {
    Sha1::digest(public_key.subject_public_key.raw_bytes()).into()
}
