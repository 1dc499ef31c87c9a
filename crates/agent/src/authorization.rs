use std::sync::Arc;

use distribution_core::{
    config::AuthorizationConfig,
    traits::{AuthorizationContext, AuthorizationDecision, RequestAuthorizationStrategy},
    DistributionActionType, DistributionRequest,
};
use tracing::debug;

/// 放行所有请求
#[derive(Debug, Default)]
pub struct AllowAllAuthorizationStrategy;

impl AllowAllAuthorizationStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl RequestAuthorizationStrategy for AllowAllAuthorizationStrategy {
    fn authorize(
        &self,
        _request: &DistributionRequest,
        _context: &AuthorizationContext,
    ) -> AuthorizationDecision {
        AuthorizationDecision::Allowed
    }

    fn name(&self) -> &str {
        "AllowAll"
    }
}

/// 基于路径的授权
///
/// 请求中的每个路径都必须位于某个允许的根路径之下；可选地拒绝所有DELETE请求。
/// POLL与TEST请求不携带要分发的内容，不做路径检查。
#[derive(Debug, Clone)]
pub struct PathPrivilegeAuthorizationStrategy {
    allowed_roots: Vec<String>,
    deny_delete: bool,
}

impl PathPrivilegeAuthorizationStrategy {
    pub fn new(allowed_roots: Vec<String>, deny_delete: bool) -> Self {
        let allowed_roots = allowed_roots
            .into_iter()
            .map(|root| {
                let trimmed = root.trim_end_matches('/');
                if trimmed.is_empty() {
                    "/".to_string()
                } else {
                    trimmed.to_string()
                }
            })
            .collect();
        Self {
            allowed_roots,
            deny_delete,
        }
    }

    fn is_allowed_path(&self, path: &str) -> bool {
        self.allowed_roots.iter().any(|root| {
            root == "/"
                || path == root
                || path
                    .strip_prefix(root.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

impl RequestAuthorizationStrategy for PathPrivilegeAuthorizationStrategy {
    fn authorize(
        &self,
        request: &DistributionRequest,
        context: &AuthorizationContext,
    ) -> AuthorizationDecision {
        let action = request.action_type();
        if self.deny_delete && action == DistributionActionType::Delete {
            return AuthorizationDecision::Denied("DELETE请求被禁止".to_string());
        }

        if matches!(action, DistributionActionType::Poll | DistributionActionType::Test)
            || self.allowed_roots.is_empty()
        {
            return AuthorizationDecision::Allowed;
        }

        if let Some(path) = request.paths().iter().find(|p| !self.is_allowed_path(p)) {
            debug!(
                "拒绝请求 {}: 路径 {} 不在允许范围内 (principal: {:?})",
                request, path, context.principal
            );
            return AuthorizationDecision::Denied(format!("路径不在允许范围内: {path}"));
        }

        AuthorizationDecision::Allowed
    }

    fn name(&self) -> &str {
        "PathPrivilege"
    }
}

/// 按配置创建授权策略，没有任何限制时放行所有请求
pub fn authorization_strategy_from_config(
    config: &AuthorizationConfig,
) -> Arc<dyn RequestAuthorizationStrategy> {
    if config.allowed_roots.is_empty() && !config.deny_delete {
        Arc::new(AllowAllAuthorizationStrategy::new())
    } else {
        Arc::new(PathPrivilegeAuthorizationStrategy::new(
            config.allowed_roots.clone(),
            config.deny_delete,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: DistributionActionType, paths: &[&str]) -> DistributionRequest {
        DistributionRequest::new(action, paths.iter().copied())
    }

    #[test]
    fn test_allow_all() {
        let strategy = AllowAllAuthorizationStrategy::new();
        let decision = strategy.authorize(
            &request(DistributionActionType::Delete, &["/anything"]),
            &AuthorizationContext::default(),
        );
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_paths_must_be_under_allowed_roots() {
        let strategy = PathPrivilegeAuthorizationStrategy::new(
            vec!["/content/site/".to_string(), "/etc/tags".to_string()],
            false,
        );
        let ctx = AuthorizationContext::for_principal("editor");

        assert!(strategy
            .authorize(&request(DistributionActionType::Add, &["/content/site/en"]), &ctx)
            .is_allowed());
        assert!(strategy
            .authorize(
                &request(DistributionActionType::Add, &["/content/site", "/etc/tags/a"]),
                &ctx
            )
            .is_allowed());
        assert!(!strategy
            .authorize(&request(DistributionActionType::Add, &["/content/sites"]), &ctx)
            .is_allowed());
        assert!(!strategy
            .authorize(
                &request(DistributionActionType::Add, &["/content/site/en", "/apps"]),
                &ctx
            )
            .is_allowed());
    }

    #[test]
    fn test_poll_and_test_skip_path_checks() {
        let strategy = PathPrivilegeAuthorizationStrategy::new(vec!["/content".to_string()], true);
        let ctx = AuthorizationContext::default();

        assert!(strategy
            .authorize(&request(DistributionActionType::Poll, &["/"]), &ctx)
            .is_allowed());
        assert!(strategy
            .authorize(&request(DistributionActionType::Test, &["/"]), &ctx)
            .is_allowed());
    }

    #[test]
    fn test_deny_delete() {
        let strategy = PathPrivilegeAuthorizationStrategy::new(vec![], true);
        let decision = strategy.authorize(
            &request(DistributionActionType::Delete, &["/content/a"]),
            &AuthorizationContext::default(),
        );
        assert_eq!(
            decision,
            AuthorizationDecision::Denied("DELETE请求被禁止".to_string())
        );
    }

    #[test]
    fn test_from_config() {
        let allow = authorization_strategy_from_config(&AuthorizationConfig::default());
        assert_eq!(allow.name(), "AllowAll");

        let restricted = authorization_strategy_from_config(&AuthorizationConfig {
            allowed_roots: vec!["/content".to_string()],
            deny_delete: false,
        });
        assert_eq!(restricted.name(), "PathPrivilege");
    }
}
