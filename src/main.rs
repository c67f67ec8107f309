use scanlist_backend::api::{build_router, AppState};
use scanlist_backend::{config, models};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanlist_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration / 加载配置
    let app_config = config::load_config().map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(
        "Server will listen on {}:{}",
        app_config.server.host,
        app_config.server.port
    );

    // Create index output directory if not exists / 创建索引输出目录
    let out_dir = app_config.get_out_dir();
    if !out_dir.exists() {
        std::fs::create_dir_all(&out_dir)?;
        tracing::info!("Created index directory: {:?}", out_dir);
    }

    // Load source descriptors / 加载数据源列表
    let sources = models::read_source_list(&app_config.get_sources_path())?;
    tracing::info!("Loaded {} sources", sources.len());
    for s in &sources {
        tracing::info!(
            "  {} ({}:{}) role={} root={} local={}",
            s.name,
            s.address,
            s.port,
            s.role.as_str(),
            s.root,
            s.use_local_fs
        );
    }

    let state = Arc::new(AppState {
        sources,
        out_dir,
        policy: app_config.policy,
    });
    let app = build_router(state);

    let addr = app_config.get_bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
