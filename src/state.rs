//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AccessLevelPolicy, AuthContext, Authenticator, Identity, Policy};
use crate::database::Store;
use crate::error::ApiError;
use crate::gate;
use crate::schema::{Registry, ResourceDescriptor};
use crate::sync::{DocumentHub, EditTypes};
use crate::transcode::{PlainTextTranscoder, Transcoder};
use crate::upload::UploadLimits;

/// Collaborators behind the gateway; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub store: Arc<dyn Store>,
    pub authenticator: Arc<dyn Authenticator>,
    pub policy: Arc<dyn Policy>,
    pub hub: Arc<DocumentHub>,
    pub transcoder: Arc<dyn Transcoder>,
    pub uploads: UploadLimits,
}

impl AppState {
    /// State with the default policy, edit types and transcoder
    pub fn new(registry: Registry, store: Arc<dyn Store>, authenticator: Arc<dyn Authenticator>) -> Self {
        let hub = DocumentHub::new(store.clone(), EditTypes::builtin());
        Self {
            registry: Arc::new(registry),
            store,
            authenticator,
            policy: Arc::new(AccessLevelPolicy),
            hub: Arc::new(hub),
            transcoder: Arc::new(PlainTextTranscoder),
            uploads: UploadLimits::default(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_upload_limits(mut self, uploads: UploadLimits) -> Self {
        self.uploads = uploads;
        self
    }

    /// Replace the document hub with one whose actors retire after `idle`
    pub fn with_actor_idle_timeout(mut self, idle: Duration) -> Self {
        self.hub = Arc::new(DocumentHub::new(self.store.clone(), EditTypes::builtin()).with_idle_timeout(idle));
        self
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    /// Descriptor of an engine resource the registry validated at load
    pub fn descriptor(&self, name: &str) -> Result<&ResourceDescriptor, ApiError> {
        self.registry.get(name).ok_or_else(|| {
            tracing::error!("Resource '{}' missing from the registry", name);
            ApiError::internal_server_error("Resource schema is incomplete")
        })
    }

    pub async fn authorize(
        &self,
        identity: &Identity,
        capability: &str,
        context: &AuthContext,
    ) -> Result<(), ApiError> {
        gate::authorize(self.policy.as_ref(), identity, capability, context).await
    }
}
