// src/config.rs

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    db::{InventoryRepository, InventoryStore},
    services::InventoryService,
};

// ---
// Flags do módulo de estoque
// ---
// Lidas uma única vez na inicialização e passadas ao serviço.
// Nada consulta o ambiente depois disso.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryConfig {
    /// FEATURE_INVENTORY: desligado => todas as rotas respondem 503.
    pub enabled: bool,
    /// INVENTORY_BLOCK_NEGATIVE: bloqueia saídas/transferências sem saldo disponível.
    pub block_negative_stock: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self { enabled: true, block_negative_stock: true }
    }
}

impl InventoryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            enabled: parse_flag(lookup("FEATURE_INVENTORY"), defaults.enabled),
            block_negative_stock: parse_flag(lookup("INVENTORY_BLOCK_NEGATIVE"), defaults.block_negative_stock),
        }
    }
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v.is_empty() => default,
        Some(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ---
// Configuração do processo
// ---
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub inventory: InventoryConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL deve ser definida")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let db_max_connections = match env::var("DB_MAX_CONNECTIONS") {
            Ok(v) => v.parse().context("DB_MAX_CONNECTIONS deve ser um número")?,
            Err(_) => 5,
        };

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections,
            inventory: InventoryConfig::from_env(),
        })
    }
}

pub async fn connect_pool(config: &AppConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await
        .context("Falha ao conectar ao banco de dados")?;

    tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");
    Ok(pool)
}

// ---
// Estado compartilhado entre os handlers
// ---
#[derive(Clone)]
pub struct AppState {
    pub inventory_service: InventoryService,
}

impl AppState {
    /// Monta o grafo de dependências sobre o PostgreSQL.
    pub fn new(db_pool: PgPool, inventory: InventoryConfig) -> Self {
        let repo = InventoryRepository::new(db_pool);
        Self::with_store(Arc::new(repo), inventory)
    }

    /// Qualquer implementação de store (o PostgreSQL ou o store em memória dos testes).
    pub fn with_store(store: Arc<dyn InventoryStore>, inventory: InventoryConfig) -> Self {
        Self { inventory_service: InventoryService::new(store, inventory) }
    }
}
