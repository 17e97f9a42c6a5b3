use cr_certs::CertBackend;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state for all routes.
#[derive(Clone)]
pub struct ApiState {
    pub backend: Arc<dyn CertBackend>,
    /// Reported by `/ping` so clients can tell instances apart
    pub instance_id: Uuid,
}

impl ApiState {
    pub fn new(backend: Arc<dyn CertBackend>, instance_id: Uuid) -> Self {
        Self {
            backend,
            instance_id,
        }
    }
}
