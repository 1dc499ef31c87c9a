use std::collections::HashMap;
use std::sync::Arc;

use distribution_core::{config::AgentConfig, DistributionError, DistributionResult};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::agent::{AgentComponents, SimpleDistributionAgent};

/// Agent工厂
pub struct DistributionAgentFactory;

impl DistributionAgentFactory {
    /// 校验配置与协作者并创建Agent，配置为启用时立即启用
    ///
    /// 配置无效或缺少协作者时返回 `InvalidAgentConfig`，不会创建Agent。
    pub async fn create(
        config: &AgentConfig,
        components: AgentComponents,
    ) -> DistributionResult<Arc<SimpleDistributionAgent>> {
        let agent = SimpleDistributionAgent::new(config, components)?;
        if config.enabled {
            agent.enable().await?;
        } else {
            info!("Agent {} 配置为禁用，保持停用状态", config.name);
        }
        Ok(agent)
    }
}

/// 已创建Agent的注册表
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<SimpleDistributionAgent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建并登记Agent；同名Agent已存在或创建失败时不登记
    pub async fn register(
        &self,
        config: &AgentConfig,
        components: AgentComponents,
    ) -> DistributionResult<Arc<SimpleDistributionAgent>> {
        if self.agents.read().await.contains_key(&config.name) {
            return Err(DistributionError::InvalidAgentConfig(format!(
                "agent {} 已存在",
                config.name
            )));
        }

        let agent = DistributionAgentFactory::create(config, components).await?;

        let mut agents = self.agents.write().await;
        if agents.contains_key(&config.name) {
            drop(agents);
            if let Err(e) = agent.disable().await {
                warn!("停用重复的Agent {} 失败: {}", config.name, e);
            }
            return Err(DistributionError::InvalidAgentConfig(format!(
                "agent {} 已存在",
                config.name
            )));
        }
        agents.insert(config.name.clone(), Arc::clone(&agent));
        info!("登记Agent: {}", config.name);
        Ok(agent)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<SimpleDistributionAgent>> {
        self.agents.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 移除并停用Agent，返回是否存在
    pub async fn remove(&self, name: &str) -> DistributionResult<bool> {
        let removed = self.agents.write().await.remove(name);
        match removed {
            Some(agent) => {
                agent.disable().await?;
                info!("移除Agent: {}", name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 停用并移除所有Agent
    pub async fn shutdown(&self) {
        let agents: Vec<(String, Arc<SimpleDistributionAgent>)> =
            self.agents.write().await.drain().collect();
        for (name, agent) in agents {
            if let Err(e) = agent.disable().await {
                warn!("停用Agent {} 失败: {}", name, e);
            }
        }
    }
}
