//! This crate provides the issuance engine of a certificate authority. Given
//! a PKCS#10 certificate signing request (CSR) it produces signed X.509 leaf
//! certificates and later signed OCSP responses for those certificates.
//!
//! The entry points are:
//!
//! - [`CertificateAuthority::issue_certificate`](crate::ca::CertificateAuthority::issue_certificate),
//!   which validates a CSR against the configured policies and profiles and
//!   signs a certificate with the default issuer.
//! - [`OcspResponder::generate`](crate::ocsp::OcspResponder::generate),
//!   which signs an OCSP response for a previously issued certificate using
//!   the issuer that signed it.
//!
//! Hostname policy, key policy, persistence and publication are external
//! collaborators, see [`policy`] and [`store`].
//!
//! ## References
//!
//! - <https://datatracker.ietf.org/doc/html/rfc5280>
//! - <https://datatracker.ietf.org/doc/html/rfc6960>
//! - <https://datatracker.ietf.org/doc/html/rfc7633>
//! - <https://datatracker.ietf.org/doc/html/rfc2986>
pub mod ca;
pub mod clock;
pub mod config;
pub mod csr;
pub mod extensions;
pub mod issuer;
pub mod keys;
pub mod metrics;
pub mod ocsp;
pub mod oid;
pub mod policy;
pub mod profile;
pub mod serial;
pub mod store;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_utils;

/// Coarse classification of every error returned by the public entry points.
///
/// Callers translate these into their transport specific error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "camelCase")]
pub enum ErrorKind {
    /// The caller supplied invalid input, e.g. a CSR with a bad signature.
    Malformed,

    /// The CA itself is misconfigured or failed while signing or storing.
    InternalError,

    /// The requested object (usually an issuer) is unknown.
    NotFound,
}
