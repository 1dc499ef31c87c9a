use crate::models::DistributionRequest;

/// 授权上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationContext {
    /// 发起请求的主体
    pub principal: Option<String>,
    /// Agent 代表其执行操作的服务名
    pub service_name: Option<String>,
}

impl AuthorizationContext {
    pub fn for_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            service_name: None,
        }
    }

    pub fn with_service_name(mut self, service_name: Option<String>) -> Self {
        self.service_name = service_name;
        self
    }
}

/// 授权结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allowed,
    Denied(String),
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthorizationDecision::Allowed)
    }
}

/// 请求授权策略接口，在请求入队前执行
pub trait RequestAuthorizationStrategy: Send + Sync {
    fn authorize(
        &self,
        request: &DistributionRequest,
        context: &AuthorizationContext,
    ) -> AuthorizationDecision;

    /// 策略名称
    fn name(&self) -> &str;
}
