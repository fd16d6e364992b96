//! Persistence and publication collaborators, awaited after a certificate
//! has been signed.
use std::fmt::Debug;

use async_trait::async_trait;

/// Errors returned by collaborators are opaque to the CA.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait CertificateStore: Debug + Send + Sync {
    /// Persists the DER encoded certificate under its canonical serial.
    async fn add_certificate(
        &self,
        der: &[u8],
        serial: &str,
        registration_id: i64,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait Publisher: Debug + Send + Sync {
    /// Submits the DER encoded certificate for out-of-band publication,
    /// e.g. to Certificate Transparency logs.
    async fn submit(&self, der: &[u8]) -> Result<(), CollaboratorError>;
}

/// A [`Publisher`] which discards every submission.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn submit(&self, _der: &[u8]) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
