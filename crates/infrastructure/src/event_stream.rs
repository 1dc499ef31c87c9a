use std::time::Duration;

use async_trait::async_trait;
use distribution_core::{
    traits::{Credentials, EventChunkStream, EventStreamClient},
    DistributionError, DistributionResult,
};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info};
use url::Url;

use crate::authentication::apply_credentials;

/// 基于reqwest流式响应体的事件流客户端
///
/// 连接只设置建立超时，不设置读超时，服务端可以无限期保持连接。
#[derive(Debug, Clone)]
pub struct HttpEventStreamClient {
    client: reqwest::Client,
}

impl HttpEventStreamClient {
    pub fn new(connect_timeout: Duration) -> DistributionResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DistributionError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventStreamClient for HttpEventStreamClient {
    async fn connect(
        &self,
        endpoint: &Url,
        credentials: &Credentials,
    ) -> DistributionResult<EventChunkStream> {
        debug!("连接事件流: {}", endpoint);
        let request = apply_credentials(self.client.get(endpoint.clone()), credentials);
        let response = request
            .send()
            .await
            .map_err(|e| DistributionError::Network(format!("连接事件流 {endpoint} 失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DistributionError::Network(format!(
                "事件流 {endpoint} 返回状态码 {status}"
            )));
        }

        info!("事件流已连接: {}", endpoint);
        let stream = response
            .bytes_stream()
            .map_err(|e| DistributionError::Network(format!("读取事件流失败: {e}")))
            .filter(|chunk| {
                let keep = !matches!(chunk, Ok(bytes) if bytes.is_empty());
                futures::future::ready(keep)
            });
        Ok(stream.boxed())
    }
}
