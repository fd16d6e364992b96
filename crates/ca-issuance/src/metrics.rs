//! OpenTelemetry counters emitted by the issuance engine.
//!
//! The counters are created from the global meter provider. Without an
//! installed provider every recording is a no-op.
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Meter},
};

use crate::extensions::ExtensionTelemetry;

const METER_NAME: &str = "ca-issuance";

/// What an issuer signature was produced for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SignatureKind {
    Certificate,
    Ocsp,
}

#[derive(Clone, Debug)]
pub struct Metrics {
    signatures: Counter<u64>,
    csr_extensions: Counter<u64>,
}

impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        let signatures = meter
            .u64_counter("ca.signatures")
            .with_description("Number of signatures produced by issuers")
            .build();

        let csr_extensions = meter
            .u64_counter("ca.csr_extensions")
            .with_description("Number of CSRs requesting extensions, by category")
            .build();

        Self {
            signatures,
            csr_extensions,
        }
    }

    /// Creates the counters from the globally installed meter provider.
    pub fn from_global() -> Self {
        Self::new(&global::meter(METER_NAME))
    }

    pub fn record_signature(&self, kind: SignatureKind) {
        self.signatures
            .add(1, &[KeyValue::new("kind", <&'static str>::from(kind))]);
    }

    pub fn record_csr_extension(&self, telemetry: ExtensionTelemetry) {
        self.csr_extensions
            .add(1, &[KeyValue::new("type", <&'static str>::from(telemetry))]);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::from_global()
    }
}
