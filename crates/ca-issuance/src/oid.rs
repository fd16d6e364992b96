//! Object identifiers which are not part of the [`const_oid::db`] modules
//! used throughout this crate.
use const_oid::ObjectIdentifier;

/// The TLS Feature extension, see RFC 7633, section 6.
pub const ID_PE_TLS_FEATURE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.1.24");

/// The PKCS#9 `extensionRequest` attribute, which carries the requested
/// extensions inside a CSR.
pub const ID_EXTENSION_REQ: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// `id-pkix-ocsp-basic`, the response type of a [`BasicOcspResponse`](x509_ocsp::BasicOcspResponse).
pub const ID_PKIX_OCSP_BASIC: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.1");

/// Certificate Transparency precertificate poison, see RFC 6962, section 3.1.
pub const CT_PRECERT_POISON: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.3");

/// The value of the `status_request` TLS extension (RFC 6066), which is the
/// only feature a must-staple request may contain.
pub const TLS_FEATURE_STATUS_REQUEST: u16 = 5;
