use std::time::Duration;

use async_trait::async_trait;
use distribution_core::{
    config::TransportConfig,
    config::DEFAULT_QUEUE_NAME,
    traits::{Credentials, DistributionTransport},
    DistributionActionType, DistributionError, DistributionPackage, DistributionRequest,
    DistributionResult,
};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::authentication::apply_credentials;

/// HTTP传输
///
/// - ADD/DELETE/TEST: 打包为JSON后 `POST {endpoint}/packages`
/// - POLL: 反复 `GET {endpoint}/queues/{queue}/next` 拉取远端待处理的包，204表示没有更多的包
///
/// 拉取到的包交给 `with_package_sink` 注册的接收端。
#[derive(Debug, Clone)]
pub struct HttpTransport {
    name: String,
    client: reqwest::Client,
    endpoint: Url,
    credentials: Credentials,
    poll_queue: String,
    max_poll_packages: usize,
    package_sink: Option<mpsc::UnboundedSender<DistributionPackage>>,
}

impl HttpTransport {
    pub fn new(
        name: impl Into<String>,
        endpoint: Url,
        credentials: Credentials,
        timeout: Duration,
    ) -> DistributionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DistributionError::Transport(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            name: name.into(),
            client,
            endpoint,
            credentials,
            poll_queue: DEFAULT_QUEUE_NAME.to_string(),
            max_poll_packages: 100,
            package_sink: None,
        })
    }

    /// 根据配置创建；未配置 endpoint 时返回 `Configuration` 错误
    pub fn from_config(name: impl Into<String>, config: &TransportConfig) -> DistributionResult<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            DistributionError::Configuration("transport.endpoint 未配置".to_string())
        })?;
        let endpoint = Url::parse(endpoint).map_err(|e| {
            DistributionError::Configuration(format!("无效的transport.endpoint {endpoint}: {e}"))
        })?;

        Ok(Self::new(
            name,
            endpoint,
            config.credentials.to_credentials(),
            Duration::from_secs(config.timeout_seconds),
        )?
        .with_poll_queue(config.poll_queue.clone())
        .with_max_poll_packages(config.max_poll_packages))
    }

    pub fn with_poll_queue(mut self, queue: impl Into<String>) -> Self {
        self.poll_queue = queue.into();
        self
    }

    pub fn with_max_poll_packages(mut self, max: usize) -> Self {
        self.max_poll_packages = max.max(1);
        self
    }

    pub fn with_package_sink(mut self, sink: mpsc::UnboundedSender<DistributionPackage>) -> Self {
        self.package_sink = Some(sink);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, segments: &[&str]) -> DistributionResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                DistributionError::Configuration(format!(
                    "transport endpoint 不能作为基础URL: {}",
                    self.endpoint
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_package(&self, package: &DistributionPackage) -> DistributionResult<()> {
        let url = self.url(&["packages"])?;
        let response = apply_credentials(self.client.post(url.clone()), &self.credentials)
            .json(package)
            .send()
            .await
            .map_err(|e| DistributionError::Transport(format!("发送分发包到 {url} 失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DistributionError::Transport(format!(
                "发送分发包 {} 失败，状态码: {status}",
                package.id
            )));
        }

        debug!("分发包 {} 已发送到 {}", package.id, url);
        Ok(())
    }

    async fn poll_packages(&self) -> DistributionResult<usize> {
        let mut received = 0;
        while received < self.max_poll_packages {
            match self.fetch(&self.poll_queue).await? {
                Some(package) => {
                    received += 1;
                    match &self.package_sink {
                        Some(sink) => {
                            if sink.send(package).is_err() {
                                warn!("分发包接收端已关闭，停止拉取");
                                break;
                            }
                        }
                        None => debug!("拉取到分发包 {}，未配置接收端", package.id),
                    }
                }
                None => break,
            }
        }
        Ok(received)
    }
}

#[async_trait]
impl DistributionTransport for HttpTransport {
    async fn deliver(&self, request: &DistributionRequest) -> DistributionResult<()> {
        match request.action_type() {
            DistributionActionType::Poll => {
                let received = self.poll_packages().await?;
                info!("从 {} 拉取了 {} 个分发包", self.endpoint, received);
                Ok(())
            }
            DistributionActionType::Add
            | DistributionActionType::Delete
            | DistributionActionType::Test => {
                let package = DistributionPackage::from_request(request);
                self.send_package(&package).await
            }
        }
    }

    async fn fetch(&self, queue_name: &str) -> DistributionResult<Option<DistributionPackage>> {
        let url = self.url(&["queues", queue_name, "next"])?;
        let response = apply_credentials(self.client.get(url.clone()), &self.credentials)
            .send()
            .await
            .map_err(|e| DistributionError::Transport(format!("从 {url} 拉取失败: {e}")))?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let package = response
                    .json::<DistributionPackage>()
                    .await
                    .map_err(|e| DistributionError::Serialization(format!("解析分发包失败: {e}")))?;
                Ok(Some(package))
            }
            status => Err(DistributionError::Transport(format!(
                "从 {url} 拉取失败，状态码: {status}"
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
