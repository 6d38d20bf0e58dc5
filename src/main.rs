//! lsbroker 查询代理服务
//!
//! 集成功能：
//! 1. peer 注册表 (按配置注册后端)
//! 2. 查询引擎 (缓存聚合 / 直通)
//! 3. livestatus TCP 前端 (每个监听地址一个)
//! 4. 可选的 Prometheus 抓取端点 (`metrics_listen`)
//!
//! 运行: cargo run --bin lsbroker-server -- --config config/lsbroker.toml

use std::sync::Arc;

use anyhow::Context;
use futures::future::select_all;

use lsbroker::observability::init_metrics;
use lsbroker::schema::default_catalog;
use lsbroker::service::{run_metrics_server, Frontend};
use lsbroker::utils::config::BrokerConfig;
use lsbroker::QueryEngine;

/// 命令行参数
#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    listen: Vec<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();
    for i in 0..args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(args[i + 1].clone());
                }
            }
            "--listen" | "-l" => {
                if i + 1 < args.len() {
                    parsed.listen.push(args[i + 1].clone());
                }
            }
            _ => {}
        }
    }
    parsed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();

    // 1. 加载配置文件
    let loaded = match &args.config {
        Some(path) => BrokerConfig::load_from_file(path).map_err(|e| e.to_string()),
        None => BrokerConfig::load_default().map_err(|e| e.to_string()),
    };
    let (mut config, load_error) = match loaded {
        Ok(cfg) => (cfg, None),
        Err(e) if args.config.is_none() => (BrokerConfig::default(), Some(e)),
        Err(e) => anyhow::bail!(e),
    };
    if !args.listen.is_empty() {
        config.listen = args.listen.clone();
    }

    // 初始化日志 (RUST_LOG 优先)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();
    if let Some(e) = load_error {
        log::warn!("Failed to load config file: {}, using defaults", e);
    }

    init_metrics();

    // 2. 构建 peer 注册表与查询引擎
    let registry = config.build_registry().context("invalid peer configuration")?;
    log::info!("Configuration loaded");
    log::info!("  Peers: {}", registry.len());
    log::info!("  Listen: {}", config.listen.join(", "));

    let engine = Arc::new(QueryEngine::new(
        Arc::new(default_catalog()),
        Arc::new(registry),
    ));

    // 3. 每个监听地址一个前端
    let mut servers = Vec::with_capacity(config.listen.len());
    for listen in &config.listen {
        let frontend = Frontend::new(Arc::clone(&engine), listen.clone());
        let listener = frontend
            .bind()
            .await
            .with_context(|| format!("failed to listen on {}", listen))?;
        servers.push(tokio::spawn(async move {
            frontend
                .serve(listener, async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
        }));
    }

    if let Some(addr) = config.metrics_listen.clone() {
        tokio::spawn(async move {
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            if let Err(e) = run_metrics_server(&addr, shutdown).await {
                log::error!("metrics endpoint on {} failed: {}", addr, e);
            }
        });
    }

    // 任一前端退出 (Ctrl+C 或致命错误) 即结束进程
    let (finished, _, remaining) = select_all(servers).await;
    for server in remaining {
        server.abort();
    }
    finished.context("frontend task panicked")??;

    log::info!("lsbroker stopped");
    Ok(())
}
