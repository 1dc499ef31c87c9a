use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use distribution_core::{config::AppConfig, logging::init_logging};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod app;

use app::Application;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("distribution-agent")
        .version("1.0.0")
        .about("内容分发Agent")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/distribution.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config/distribution.toml");

    let config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置文件失败: {config_path}"))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.logging.level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.logging.format);
    init_logging(log_level, log_format)?;

    info!("启动分发Agent {}", config.agent.name);
    info!("配置文件: {config_path}");

    let app = Application::new(config).await?;

    let shutdown = CancellationToken::new();
    let app_handle = tokio::spawn(app.run(shutdown.clone()));

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown.cancel();

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(Ok(()))) => info!("Agent已优雅关闭"),
        Ok(Ok(Err(e))) => error!("Agent关闭时发生错误: {e:#}"),
        Ok(Err(e)) => error!("Agent任务异常退出: {e}"),
        Err(_) => warn!("Agent关闭超时，强制退出"),
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
