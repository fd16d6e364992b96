use std::{sync::Arc, time::SystemTime};

use ca_shared::time::Duration;
use der::{
    Decode, Encode,
    asn1::{GeneralizedTime, Null, OctetString},
};
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument, warn};
use x509_cert::Certificate;

use super::{
    BasicOcspResponse, CertStatus, OcspGeneralizedTime, OcspResponse, OcspResponseStatus,
    OcspSigningRequest, OcspStatus, ResponseBytes, ResponseData, RevokedInfo, SingleResponse,
    Version, cert_id, responder_id,
};
use crate::{
    ErrorKind,
    clock::{Clock, truncate_to_seconds},
    issuer::{IssuerError, IssuerRegistry, IssuerRegistryError},
    metrics::{Metrics, SignatureKind},
    oid::ID_PKIX_OCSP_BASIC,
};

#[derive(Debug, Snafu)]
pub enum GenerateOcspError {
    #[snafu(display("failed to parse certificate from DER"))]
    ParseCertificate { source: der::Error },

    #[snafu(display("failed to resolve the issuer of the certificate"))]
    ResolveIssuer { source: IssuerRegistryError },

    #[snafu(display("failed to convert {field} into GeneralizedTime"))]
    ConvertTime {
        source: der::Error,
        field: &'static str,
    },

    #[snafu(display("failed to build the certificate ID"))]
    BuildCertId { source: der::Error },

    #[snafu(display("failed to build the responder ID"))]
    BuildResponderId { source: der::Error },

    #[snafu(display("failed to encode the OCSP response data"))]
    EncodeResponseData { source: der::Error },

    #[snafu(display("failed to sign the OCSP response"))]
    SignResponse { source: IssuerError },

    #[snafu(display("failed to encode the OCSP response"))]
    EncodeResponse { source: der::Error },
}

impl GenerateOcspError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ParseCertificate { .. } => ErrorKind::Malformed,
            Self::ResolveIssuer { .. } => ErrorKind::NotFound,
            Self::ConvertTime { .. }
            | Self::BuildCertId { .. }
            | Self::BuildResponderId { .. }
            | Self::EncodeResponseData { .. }
            | Self::SignResponse { .. }
            | Self::EncodeResponse { .. } => ErrorKind::InternalError,
        }
    }
}

/// Signs OCSP responses with the issuer that signed the certificate in
/// question.
#[derive(Debug)]
pub struct OcspResponder {
    issuers: Arc<IssuerRegistry>,
    lifespan: Duration,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl OcspResponder {
    /// Creates a responder whose responses are valid for `lifespan` after
    /// they were produced.
    pub fn new(issuers: Arc<IssuerRegistry>, lifespan: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            issuers,
            lifespan,
            clock,
            metrics: Metrics::from_global(),
        }
    }

    pub fn issuers(&self) -> &IssuerRegistry {
        &self.issuers
    }

    /// Produces the DER encoded `OCSPResponse` for `request`.
    #[instrument(name = "generate_ocsp_response", skip_all, fields(
        certificate.len = request.certificate_der.len(),
        status = ?request.status,
    ))]
    pub fn generate(&self, request: &OcspSigningRequest) -> Result<Vec<u8>, GenerateOcspError> {
        let certificate = Certificate::from_der(&request.certificate_der)
            .inspect_err(|err| warn!(error = %err, "rejecting unparsable certificate"))
            .context(ParseCertificateSnafu)?;

        let issuer = self
            .issuers
            .find_by_certificate(&certificate)
            .inspect_err(|err| warn!(error = %err, "no registered issuer signed the certificate"))
            .context(ResolveIssuerSnafu)?;

        let now = truncate_to_seconds(self.clock.now());
        let next_update = now + self.lifespan;

        let cert_status = match request.status {
            OcspStatus::Good => CertStatus::Good(Null),
            OcspStatus::Revoked { reason, revoked_at } => CertStatus::Revoked(RevokedInfo {
                revocation_time: generalized_time(revoked_at, "revocation time")?,
                revocation_reason: Some(reason),
            }),
        };

        let serial_number = certificate.tbs_certificate.serial_number;
        let single_response = SingleResponse {
            cert_id: cert_id(issuer.subject(), issuer.public_key(), serial_number.clone())
                .context(BuildCertIdSnafu)?,
            cert_status,
            this_update: generalized_time(now, "thisUpdate")?,
            next_update: Some(generalized_time(next_update, "nextUpdate")?),
            single_extensions: None,
        };

        let tbs_response_data = ResponseData {
            version: Version::V1,
            responder_id: responder_id(issuer.public_key()).context(BuildResponderIdSnafu)?,
            produced_at: generalized_time(now, "producedAt")?,
            responses: vec![single_response],
            response_extensions: None,
        };

        let tbs = tbs_response_data
            .to_der()
            .context(EncodeResponseDataSnafu)?;
        let signature = issuer.sign(&tbs).context(SignResponseSnafu)?;
        let basic_response = BasicOcspResponse {
            tbs_response_data,
            signature_algorithm: issuer.signature_algorithm().context(SignResponseSnafu)?,
            signature,
            certs: None,
        };

        let response = OcspResponse {
            response_status: OcspResponseStatus::Successful,
            response_bytes: Some(ResponseBytes {
                response_type: ID_PKIX_OCSP_BASIC,
                response: OctetString::new(
                    basic_response.to_der().context(EncodeResponseSnafu)?,
                )
                .context(EncodeResponseSnafu)?,
            }),
        };
        let der = response.to_der().context(EncodeResponseSnafu)?;

        self.metrics.record_signature(SignatureKind::Ocsp);
        debug!(
            ocsp.issuer = %issuer.subject(),
            ocsp.serial = %serial_number,
            ocsp.this_update = ?now,
            ocsp.next_update = ?next_update,
            "signed OCSP response"
        );

        Ok(der)
    }
}

fn generalized_time(
    time: SystemTime,
    field: &'static str,
) -> Result<OcspGeneralizedTime, GenerateOcspError> {
    GeneralizedTime::from_system_time(time)
        .map(OcspGeneralizedTime::from)
        .context(ConvertTimeSnafu { field })
}
