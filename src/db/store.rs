// src/db/store.rs
//
// Fronteira entre o serviço e o armazenamento. Há duas implementações:
// PostgreSQL (InventoryRepository) e memória (MemoryInventoryRepository).

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    common::{
        error::AppError,
        pagination::{Page, PageRequest},
    },
    models::inventory::{
        Category, Location, MovementDetail, MovementHistoryFilter, MovementReason, MovementStatus,
        NewProduct, Product, ReasonDirection, StockKey, StockLevel, StockMovement,
        StockMovementLine, StockPositionFilter, StockPositionRow, Unit,
    },
};
use rust_decimal::Decimal;

/// Uma transação aberta. Tudo que ela escreve só fica visível após `commit`;
/// se for descartada (drop) sem commit, é rollback e os locks são liberados.
#[async_trait]
pub trait StockTx: Send {
    async fn find_unit(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<Unit>, AppError>;
    async fn find_product(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<Product>, AppError>;
    async fn find_location(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<Location>, AppError>;
    async fn find_reason(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<MovementReason>, AppError>;

    /// Busca (criando zerado se não existir) e trava a linha de saldo até o fim da transação.
    async fn lock_stock_level(&mut self, key: StockKey) -> Result<StockLevel, AppError>;

    async fn save_stock_level(&mut self, level: &StockLevel) -> Result<(), AppError>;

    /// Falha com `AppError::DuplicateDocumentRef` se o document_ref já existir no tenant.
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), AppError>;

    async fn insert_line(&mut self, line: &StockMovementLine) -> Result<(), AppError>;

    async fn commit(&mut self) -> Result<(), AppError>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StockTx>, AppError>;

    // --- Catálogo ---
    async fn create_unit(&self, tenant_id: Uuid, name: &str, symbol: &str, factor_to_base: Decimal) -> Result<Unit, AppError>;
    async fn list_units(&self, tenant_id: Uuid) -> Result<Vec<Unit>, AppError>;
    async fn find_unit(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Unit>, AppError>;
    async fn create_category(&self, tenant_id: Uuid, name: &str) -> Result<Category, AppError>;
    async fn list_categories(&self, tenant_id: Uuid) -> Result<Vec<Category>, AppError>;
    async fn find_category(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Category>, AppError>;
    async fn create_product(&self, tenant_id: Uuid, product: &NewProduct) -> Result<Product, AppError>;
    async fn list_products(&self, tenant_id: Uuid) -> Result<Vec<Product>, AppError>;
    async fn create_location(&self, tenant_id: Uuid, name: &str) -> Result<Location, AppError>;
    async fn list_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, AppError>;
    async fn create_reason(&self, tenant_id: Uuid, code: &str, name: &str, direction: ReasonDirection) -> Result<MovementReason, AppError>;
    async fn list_reasons(&self, tenant_id: Uuid) -> Result<Vec<MovementReason>, AppError>;

    // --- Movimentações ---
    async fn find_movement(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<MovementDetail>, AppError>;
    async fn find_movement_by_document_ref(&self, tenant_id: Uuid, document_ref: &str) -> Result<Option<MovementDetail>, AppError>;
    async fn update_movement_meta(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: Option<MovementStatus>,
        notes: Option<&str>,
    ) -> Result<Option<StockMovement>, AppError>;

    // --- Relatórios ---
    async fn stock_position(&self, tenant_id: Uuid, filter: &StockPositionFilter, page: PageRequest) -> Result<Page<StockPositionRow>, AppError>;
    async fn movement_history(&self, tenant_id: Uuid, filter: &MovementHistoryFilter, page: PageRequest) -> Result<Page<StockMovement>, AppError>;
}
