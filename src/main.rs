use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use wildscan_core::{api, config::Config, config::TriageConfig, SledStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ----------------------------------------------------------------
    // 0. 日志 & 配置
    // ----------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        db = %config.db_path,
        scanner_version = %config.scanner_version,
        node = %config.processing_node,
        "配置加载完成"
    );

    // ----------------------------------------------------------------
    // 1. 存储 & 分诊配置
    // ----------------------------------------------------------------
    let store = Arc::new(SledStore::open(&config.db_path)?);
    let triage_config = TriageConfig::from_config(&config)?;
    tracing::info!(
        codewords = triage_config.rules.codewords.len(),
        keywords = triage_config.rules.keywords.len(),
        rescan_policy = ?triage_config.rescan_policy,
        scan_concurrency = triage_config.scan_concurrency,
        "证据库与规则表初始化完成"
    );

    let shared_state = Arc::new(api::AppState {
        store: Arc::clone(&store),
        config: Arc::new(triage_config),
    });

    // ----------------------------------------------------------------
    // 2. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let app = api::app(shared_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("API 服务已运行在: http://{}", addr);
    tracing::info!("   - GET  /cases/{{id}}    : 查询案件");
    tracing::info!("   - GET  /evidence/pending : 按重扫策略列出待扫证据");
    tracing::info!("   - GET  /evidence/{{id}} : 查询证据扫描状态");
    tracing::info!("   - POST /score         : 规则打分 (不落库)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // ----------------------------------------------------------------
    // 3. 退出前落盘
    // ----------------------------------------------------------------
    store.flush()?;
    tracing::info!("证据库已落盘，服务退出");

    Ok(())
}
