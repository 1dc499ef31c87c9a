use distribution_core::{
    config::CredentialsConfig,
    traits::{AuthenticationContext, AuthenticationProvider, AuthenticationTarget, Credentials},
    DistributionResult,
};
use tracing::debug;

/// 固定凭据的认证提供者
///
/// 只为HTTP客户端提供凭据，内容仓库会话不由它负责。
#[derive(Debug, Clone)]
pub struct StaticCredentialsProvider {
    credentials: Credentials,
}

impl StaticCredentialsProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn anonymous() -> Self {
        Self::new(Credentials::Anonymous)
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(Credentials::Basic {
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new(Credentials::Bearer(token.into()))
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::new(config.to_credentials())
    }
}

impl AuthenticationProvider for StaticCredentialsProvider {
    fn can_authenticate(&self, target: AuthenticationTarget) -> bool {
        target == AuthenticationTarget::HttpClient
    }

    fn authenticate(&self, context: &AuthenticationContext) -> DistributionResult<Credentials> {
        debug!("为 {} 提供凭据: {:?}", context.endpoint, self.credentials);
        Ok(self.credentials.clone())
    }
}

/// 把凭据附加到请求上
pub(crate) fn apply_credentials(
    builder: reqwest::RequestBuilder,
    credentials: &Credentials,
) -> reqwest::RequestBuilder {
    match credentials {
        Credentials::Anonymous => builder,
        Credentials::Basic { username, password } => builder.basic_auth(username, Some(password)),
        Credentials::Bearer(token) => builder.bearer_auth(token),
    }
}
