use tracing::{debug, warn};

use crate::auth::{AuthContext, Identity, Policy};
use crate::error::ApiError;

/// Single authorization checkpoint every handler passes before touching
/// storage or the document hub. A `false` decision becomes 403.
pub async fn authorize(
    policy: &dyn Policy,
    identity: &Identity,
    capability: &str,
    context: &AuthContext,
) -> Result<(), ApiError> {
    if policy.authorize(identity, capability, context).await? {
        debug!("{} granted {}", identity.subject, capability);
        Ok(())
    } else {
        warn!("{} denied {}", identity.subject, capability);
        Err(ApiError::forbidden(format!("Not permitted to perform {}", capability)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessLevel, AccessLevelPolicy, AuthError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn identity(access: AccessLevel) -> Identity {
        Identity {
            subject: "alice".into(),
            user_id: Some("u1".into()),
            access,
        }
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, AuthContext)>>,
    }

    #[async_trait]
    impl Policy for Recording {
        async fn authorize(&self, _: &Identity, capability: &str, context: &AuthContext) -> Result<bool, AuthError> {
            self.seen.lock().unwrap().push((capability.to_string(), context.clone()));
            Ok(capability != "user:destroy")
        }
    }

    #[tokio::test]
    async fn denial_is_forbidden() {
        let ctx = AuthContext::new(&[("id", "1")]);
        let err = authorize(&AccessLevelPolicy, &identity(AccessLevel::Read), "user:write", &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(authorize(&AccessLevelPolicy, &identity(AccessLevel::Read), "user:read", &ctx)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn policy_sees_capability_and_context() {
        let policy = Recording::default();
        let ctx = AuthContext::new(&[("id", "d1")]).with_body(json!({ "parent": "s1" }));
        authorize(&policy, &identity(AccessLevel::Edit), "document:change", &ctx)
            .await
            .unwrap();
        assert!(authorize(&policy, &identity(AccessLevel::Root), "user:destroy", &AuthContext::default())
            .await
            .is_err());

        let seen = policy.seen.lock().unwrap();
        assert_eq!(seen[0].0, "document:change");
        assert_eq!(seen[0].1.params["id"], "d1");
        assert_eq!(seen[0].1.body.as_ref().unwrap()["parent"], "s1");
        assert_eq!(seen.len(), 2);
    }

    struct Failing;

    #[async_trait]
    impl Policy for Failing {
        async fn authorize(&self, _: &Identity, _: &str, _: &AuthContext) -> Result<bool, AuthError> {
            Err(AuthError::Backend("policy store offline".into()))
        }
    }

    #[tokio::test]
    async fn policy_failures_are_internal_errors() {
        let err = authorize(&Failing, &identity(AccessLevel::Root), "user:read", &AuthContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
    }
}
