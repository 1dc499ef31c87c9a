use std::fmt;

use url::Url;

use crate::DistributionResult;

/// 认证目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticationTarget {
    /// HTTP客户端凭据
    HttpClient,
    /// 内容仓库会话
    RepositorySession,
}

/// 认证上下文
#[derive(Debug, Clone)]
pub struct AuthenticationContext {
    pub endpoint: Url,
}

/// HTTP凭据
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Basic { username: String, password: String },
    Bearer(String),
}

// 不输出密码和令牌
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).finish_non_exhaustive()
            }
            Credentials::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

/// 认证提供者接口
pub trait AuthenticationProvider: Send + Sync {
    /// 是否能为给定目标提供凭据
    fn can_authenticate(&self, target: AuthenticationTarget) -> bool;

    /// 为一次连接生成凭据
    fn authenticate(&self, context: &AuthenticationContext) -> DistributionResult<Credentials>;
}
