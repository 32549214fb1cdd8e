//src/main.rs

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use estoque_backend::{
    config::{connect_pool, AppConfig, AppState},
    routes::app_router,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // Se a configuração falhar, a aplicação não deve iniciar.
    let config = AppConfig::from_env()?;
    let db_pool = connect_pool(&config).await?;

    sqlx::migrate!().run(&db_pool).await?;
    tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

    tracing::info!(
        "Estoque: habilitado={} bloqueia_negativo={}",
        config.inventory.enabled,
        config.inventory.block_negative_stock
    );
    let app_state = AppState::new(db_pool, config.inventory);
    let app = app_router(app_state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
