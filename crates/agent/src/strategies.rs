use std::sync::Arc;

use distribution_core::{
    config::{DispatchingConfig, PathRuleConfig},
    traits::DispatchingStrategy,
    DistributionError, DistributionRequest, DistributionResult,
};
use tracing::debug;

/// 单队列策略：所有请求进入同一个固定队列
pub struct SingleQueueDispatchingStrategy {
    queue_name: String,
}

/// 扇出策略：请求复制到每一个已知队列
pub struct MultipleQueueDispatchingStrategy;

/// 路径前缀策略：按最长匹配的前缀规则选择队列
pub struct PathPrefixDispatchingStrategy {
    rules: Vec<PathRuleConfig>,
    default_queue: String,
}

impl SingleQueueDispatchingStrategy {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
        }
    }
}

impl Default for SingleQueueDispatchingStrategy {
    fn default() -> Self {
        Self::new(distribution_core::config::DEFAULT_QUEUE_NAME)
    }
}

impl DispatchingStrategy for SingleQueueDispatchingStrategy {
    fn dispatch(
        &self,
        _request: &DistributionRequest,
        _queue_names: &[String],
    ) -> DistributionResult<Vec<String>> {
        Ok(vec![self.queue_name.clone()])
    }

    fn name(&self) -> &str {
        "SingleQueue"
    }
}

impl MultipleQueueDispatchingStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MultipleQueueDispatchingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchingStrategy for MultipleQueueDispatchingStrategy {
    fn dispatch(
        &self,
        request: &DistributionRequest,
        queue_names: &[String],
    ) -> DistributionResult<Vec<String>> {
        if queue_names.is_empty() {
            return Err(DistributionError::Configuration(
                "扇出策略没有可用的队列".to_string(),
            ));
        }

        // 去重并保持声明顺序
        let mut targets: Vec<String> = Vec::with_capacity(queue_names.len());
        for name in queue_names {
            if !targets.contains(name) {
                targets.push(name.clone());
            }
        }

        debug!("请求 {} 扇出到 {} 个队列", request, targets.len());
        Ok(targets)
    }

    fn name(&self) -> &str {
        "MultipleQueue"
    }
}

impl PathPrefixDispatchingStrategy {
    pub fn new(rules: Vec<PathRuleConfig>, default_queue: impl Into<String>) -> Self {
        Self {
            rules,
            default_queue: default_queue.into(),
        }
    }

    fn queue_for_path(&self, path: &str) -> &str {
        self.rules
            .iter()
            .filter(|rule| path_has_prefix(path, &rule.prefix))
            // 前缀相同长度时取先声明的规则
            .fold(None::<&PathRuleConfig>, |best, rule| match best {
                Some(current) if prefix_len(&current.prefix) >= prefix_len(&rule.prefix) => {
                    Some(current)
                }
                _ => Some(rule),
            })
            .map(|rule| rule.queue.as_str())
            .unwrap_or(self.default_queue.as_str())
    }
}

fn prefix_len(prefix: &str) -> usize {
    prefix.trim_end_matches('/').len()
}

/// `/content/dam` 匹配 `/content/dam` 与 `/content/dam/a`，不匹配 `/content/damaged`
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl DispatchingStrategy for PathPrefixDispatchingStrategy {
    fn dispatch(
        &self,
        request: &DistributionRequest,
        _queue_names: &[String],
    ) -> DistributionResult<Vec<String>> {
        let mut targets: Vec<String> = Vec::new();
        for path in request.paths() {
            let queue = self.queue_for_path(path);
            if !targets.iter().any(|t| t == queue) {
                targets.push(queue.to_string());
            }
        }

        if targets.is_empty() {
            targets.push(self.default_queue.clone());
        }

        debug!("请求 {} 按路径路由到 {:?}", request, targets);
        Ok(targets)
    }

    fn name(&self) -> &str {
        "PathPrefix"
    }
}

/// 按配置创建分派策略
pub fn dispatching_strategy_from_config(config: &DispatchingConfig) -> Arc<dyn DispatchingStrategy> {
    match config {
        DispatchingConfig::Single { queue } => Arc::new(SingleQueueDispatchingStrategy::new(queue.clone())),
        DispatchingConfig::Multiple => Arc::new(MultipleQueueDispatchingStrategy::new()),
        DispatchingConfig::PathPrefix {
            rules,
            default_queue,
        } => Arc::new(PathPrefixDispatchingStrategy::new(
            rules.clone(),
            default_queue.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distribution_core::DistributionActionType;

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn request(paths: &[&str]) -> DistributionRequest {
        DistributionRequest::new(DistributionActionType::Add, paths.iter().copied())
    }

    fn rule(prefix: &str, queue: &str) -> PathRuleConfig {
        PathRuleConfig {
            prefix: prefix.to_string(),
            queue: queue.to_string(),
        }
    }

    #[test]
    fn test_single_queue_ignores_request_content() {
        let strategy = SingleQueueDispatchingStrategy::default();
        let known = queues(&["default", "other"]);

        assert_eq!(
            strategy.dispatch(&request(&["/content/a"]), &known).unwrap(),
            vec!["default"]
        );
        assert_eq!(
            strategy.dispatch(&request(&["/etc/b", "/var/c"]), &known).unwrap(),
            vec!["default"]
        );
    }

    #[test]
    fn test_multiple_queue_fans_out_in_order() {
        let strategy = MultipleQueueDispatchingStrategy::new();
        let known = queues(&["publish-1", "publish-2", "publish-1"]);

        let targets = strategy.dispatch(&request(&["/content/a"]), &known).unwrap();
        assert_eq!(targets, vec!["publish-1", "publish-2"]);

        assert!(strategy.dispatch(&request(&["/content/a"]), &[]).is_err());
    }

    #[test]
    fn test_path_prefix_longest_match() {
        let strategy = PathPrefixDispatchingStrategy::new(
            vec![
                rule("/content", "content"),
                rule("/content/dam", "assets"),
                rule("/content/dam/", "shadowed"),
            ],
            "default",
        );
        let known = queues(&["default", "content", "assets"]);

        assert_eq!(
            strategy.dispatch(&request(&["/content/dam/a.png"]), &known).unwrap(),
            vec!["assets"]
        );
        assert_eq!(
            strategy.dispatch(&request(&["/content/damaged"]), &known).unwrap(),
            vec!["content"]
        );
        assert_eq!(
            strategy.dispatch(&request(&["/etc/config"]), &known).unwrap(),
            vec!["default"]
        );
        assert_eq!(
            strategy
                .dispatch(&request(&["/content/site", "/content/dam/x", "/content/other"]), &known)
                .unwrap(),
            vec!["content", "assets"]
        );
        assert_eq!(strategy.dispatch(&request(&[]), &known).unwrap(), vec!["default"]);
    }

    #[test]
    fn test_strategies_are_deterministic() {
        let known = queues(&["default", "assets", "content"]);
        let strategies: Vec<Arc<dyn DispatchingStrategy>> = vec![
            dispatching_strategy_from_config(&DispatchingConfig::default()),
            dispatching_strategy_from_config(&DispatchingConfig::Multiple),
            dispatching_strategy_from_config(&DispatchingConfig::PathPrefix {
                rules: vec![rule("/content/dam", "assets"), rule("/content", "content")],
                default_queue: "default".to_string(),
            }),
        ];
        let requests = [
            request(&["/content/a"]),
            request(&["/content/dam/b", "/etc"]),
            request(&["/"]),
        ];

        for strategy in &strategies {
            for req in &requests {
                let first = strategy.dispatch(req, &known).unwrap();
                let second = strategy.dispatch(&req.clone(), &known.clone()).unwrap();
                assert_eq!(first, second, "strategy {} is not deterministic", strategy.name());
            }
        }
    }
}
