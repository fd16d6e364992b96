use ca_shared::time::Duration;

/// The default validity of self-signed issuers built via
/// [`Issuer::builder`](crate::issuer::Issuer::builder), one year.
pub const DEFAULT_ISSUER_VALIDITY: Duration = Duration::from_days_unchecked(365);

/// The default issuer subject name containing only the common name.
pub const DEFAULT_ISSUER_SUBJECT: &str = "CN=Issuance Engine Internal CA";

/// The maximum length in bytes of the common name, see the upper bound
/// `ub-common-name` in RFC 5280.
pub const MAX_CN_LENGTH: usize = 64;
