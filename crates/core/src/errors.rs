use thiserror::Error;

/// 分发系统错误类型定义
#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("无效的Agent配置: {0}")]
    InvalidAgentConfig(String),

    #[error("Agent已禁用: {agent}")]
    AgentDisabled { agent: String },

    #[error("请求未授权: {0}")]
    UnauthorizedRequest(String),

    #[error("队列提供者错误: {0}")]
    QueueProvider(String),

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("触发器错误: {0}")]
    Trigger(String),

    #[error("调度器错误: {0}")]
    Scheduler(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl DistributionError {
    /// 调用方是否可以退避后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DistributionError::QueueProvider(_)
                | DistributionError::Transport(_)
                | DistributionError::Network(_)
        )
    }
}

impl From<serde_json::Error> for DistributionError {
    fn from(e: serde_json::Error) -> Self {
        DistributionError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type DistributionResult<T> = std::result::Result<T, DistributionError>;
