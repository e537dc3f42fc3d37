use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{AccessLevel, AuthError, Identity};

/// Inputs a policy decision may consult besides the identity and capability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthContext {
    pub params: BTreeMap<String, String>,
    /// Parsed request body for mutating requests
    pub body: Option<Value>,
}

impl AuthContext {
    pub fn new(params: &[(&str, &str)]) -> Self {
        Self {
            params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Policy-decision collaborator consulted by the authorization gate
#[async_trait]
pub trait Policy: Send + Sync {
    async fn authorize(
        &self,
        identity: &Identity,
        capability: &str,
        context: &AuthContext,
    ) -> Result<bool, AuthError>;
}

/// Default policy keyed on the identity's access level
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLevelPolicy;

const READ_ACTIONS: &[&str] = &["read", "index", "show"];

impl AccessLevelPolicy {
    fn decide(access: AccessLevel, capability: &str) -> bool {
        let Some((_, action)) = capability.rsplit_once(':') else {
            return false;
        };
        match access {
            AccessLevel::Deny => false,
            AccessLevel::Read => READ_ACTIONS.contains(&action),
            AccessLevel::Edit => action != "destroy",
            AccessLevel::Full | AccessLevel::Root => true,
        }
    }
}

#[async_trait]
impl Policy for AccessLevelPolicy {
    async fn authorize(
        &self,
        identity: &Identity,
        capability: &str,
        _context: &AuthContext,
    ) -> Result<bool, AuthError> {
        Ok(Self::decide(identity.access, capability))
    }
}
