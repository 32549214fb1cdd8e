// src/db/inventory_repo.rs

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Executor, PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::{
    common::{
        error::AppError,
        pagination::{Page, PageRequest},
    },
    db::store::{InventoryStore, StockTx},
    models::inventory::{
        Category, Location, MovementDetail, MovementHistoryFilter, MovementReason, MovementStatus,
        NewProduct, Product, ReasonDirection, StockKey, StockLevel, StockMovement,
        StockMovementLine, StockPositionFilter, StockPositionRow, Unit,
    },
};

const DOCUMENT_REF_CONSTRAINT: &str = "stock_movements_tenant_document_ref_key";

#[derive(Clone)]
pub struct InventoryRepository {
    pool: PgPool,
}

impl InventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Converte violação de chave única num erro amigável; o resto vira DatabaseError.
fn map_unique(e: sqlx::Error, on_unique: impl FnOnce(&str) -> AppError) -> AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return on_unique(db_err.constraint().unwrap_or_default());
        }
    }
    e.into()
}

/// `%termo%` com os curingas do LIKE escapados.
fn like_pattern(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

// ---
// Leituras genéricas (servem para a pool e para a transação)
// ---

async fn fetch_unit<'e, E>(executor: E, tenant_id: Uuid, id: Uuid) -> Result<Option<Unit>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let unit = sqlx::query_as::<_, Unit>("SELECT * FROM units WHERE tenant_id = $1 AND id = $2")
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(unit)
}

async fn fetch_product<'e, E>(executor: E, tenant_id: Uuid, id: Uuid) -> Result<Option<Product>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE tenant_id = $1 AND id = $2")
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(product)
}

async fn fetch_location<'e, E>(executor: E, tenant_id: Uuid, id: Uuid) -> Result<Option<Location>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let location = sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE tenant_id = $1 AND id = $2")
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(location)
}

async fn fetch_reason<'e, E>(executor: E, tenant_id: Uuid, id: Uuid) -> Result<Option<MovementReason>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let reason = sqlx::query_as::<_, MovementReason>(
        "SELECT * FROM movement_reasons WHERE tenant_id = $1 AND id = $2",
    )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(reason)
}

async fn fetch_lines<'e, E>(executor: E, movement_id: Uuid) -> Result<Vec<StockMovementLine>, AppError>
where
    E: Executor<'e, Database = Postgres>,
{
    let lines = sqlx::query_as::<_, StockMovementLine>(
        r#"
        SELECT id, movement_id, line_no, product_id, unit_id, qty, qty_base, unit_price, value_total
        FROM stock_movement_lines
        WHERE movement_id = $1
        ORDER BY line_no ASC
        "#,
    )
        .bind(movement_id)
        .fetch_all(executor)
        .await?;
    Ok(lines)
}

// ---
// Filtros dinâmicos dos relatórios
// ---

fn push_position_filters(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, filter: &StockPositionFilter) {
    qb.push(" WHERE sl.tenant_id = ").push_bind(tenant_id);

    if let Some(term) = filter.search_term() {
        let pattern = like_pattern(&term);
        qb.push(" AND (LOWER(p.name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(p.sku) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(category_id) = filter.category_id {
        qb.push(" AND p.category_id = ").push_bind(category_id);
    }
    if let Some(location_id) = filter.location_id {
        qb.push(" AND sl.location_id = ").push_bind(location_id);
    }
    if filter.below_min_stock {
        qb.push(" AND sl.on_hand < p.min_stock");
    }
}

const POSITION_FROM: &str = r#"
    FROM stock_levels sl
    JOIN products p ON p.id = sl.product_id
    JOIN locations l ON l.id = sl.location_id
    JOIN units u ON u.id = p.base_unit_id
    LEFT JOIN categories c ON c.id = p.category_id
"#;

fn push_history_filters(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, filter: &MovementHistoryFilter) {
    qb.push(" WHERE m.tenant_id = ").push_bind(tenant_id);

    if let Some(movement_type) = filter.movement_type {
        qb.push(" AND m.movement_type = ").push_bind(movement_type);
    }
    if let Some(reason_id) = filter.reason_id {
        qb.push(" AND m.reason_id = ").push_bind(reason_id);
    }
    if let Some(source) = filter.source_location_id {
        qb.push(" AND m.source_location_id = ").push_bind(source);
    }
    if let Some(destination) = filter.destination_location_id {
        qb.push(" AND m.destination_location_id = ").push_bind(destination);
    }
    if let Some(location_id) = filter.location_id {
        qb.push(" AND (m.source_location_id = ")
            .push_bind(location_id)
            .push(" OR m.destination_location_id = ")
            .push_bind(location_id)
            .push(")");
    }
    if let Some(document_ref) = &filter.document_ref {
        qb.push(" AND m.document_ref = ").push_bind(document_ref.clone());
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND m.created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND m.created_at < ").push_bind(to);
    }
    if let Some(created_by) = &filter.created_by {
        qb.push(" AND m.created_by = ").push_bind(created_by.clone());
    }
    if let Some(product_id) = filter.product_id {
        qb.push(" AND EXISTS (SELECT 1 FROM stock_movement_lines sml WHERE sml.movement_id = m.id AND sml.product_id = ")
            .push_bind(product_id)
            .push(")");
    }
}

#[async_trait]
impl InventoryStore for InventoryRepository {
    async fn begin(&self) -> Result<Box<dyn StockTx>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStockTx { tx: Some(tx) }))
    }

    // =========================================================================
    //  CATÁLOGO
    // =========================================================================

    async fn create_unit(&self, tenant_id: Uuid, name: &str, symbol: &str, factor_to_base: Decimal) -> Result<Unit, AppError> {
        sqlx::query_as::<_, Unit>(
            r#"
            INSERT INTO units (tenant_id, name, symbol, factor_to_base)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
            .bind(tenant_id)
            .bind(name)
            .bind(symbol)
            .bind(factor_to_base)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique(e, |_| AppError::UniqueConstraintViolation(format!("A unidade '{}' já existe.", symbol))))
    }

    async fn list_units(&self, tenant_id: Uuid) -> Result<Vec<Unit>, AppError> {
        let units = sqlx::query_as::<_, Unit>("SELECT * FROM units WHERE tenant_id = $1 ORDER BY name ASC")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(units)
    }

    async fn find_unit(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Unit>, AppError> {
        fetch_unit(&self.pool, tenant_id, id).await
    }

    async fn create_category(&self, tenant_id: Uuid, name: &str) -> Result<Category, AppError> {
        sqlx::query_as::<_, Category>(
            "INSERT INTO categories (tenant_id, name) VALUES ($1, $2) RETURNING *",
        )
            .bind(tenant_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique(e, |_| AppError::UniqueConstraintViolation(format!("A categoria '{}' já existe.", name))))
    }

    async fn list_categories(&self, tenant_id: Uuid) -> Result<Vec<Category>, AppError> {
        let categories = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE tenant_id = $1 ORDER BY name ASC")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }

    async fn find_category(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Category>, AppError> {
        let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    async fn create_product(&self, tenant_id: Uuid, product: &NewProduct) -> Result<Product, AppError> {
        sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (tenant_id, category_id, base_unit_id, sku, name, price, min_stock)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
            .bind(tenant_id)
            .bind(product.category_id)
            .bind(product.base_unit_id)
            .bind(&product.sku)
            .bind(&product.name)
            .bind(product.price)
            .bind(product.min_stock)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique(e, |_| AppError::UniqueConstraintViolation(format!("O SKU '{}' já existe.", product.sku))))
    }

    async fn list_products(&self, tenant_id: Uuid) -> Result<Vec<Product>, AppError> {
        let products = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE tenant_id = $1 ORDER BY name ASC")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    async fn create_location(&self, tenant_id: Uuid, name: &str) -> Result<Location, AppError> {
        sqlx::query_as::<_, Location>("INSERT INTO locations (tenant_id, name) VALUES ($1, $2) RETURNING *")
            .bind(tenant_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique(e, |_| AppError::UniqueConstraintViolation(format!("O local '{}' já existe.", name))))
    }

    async fn list_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, AppError> {
        let locations = sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE tenant_id = $1 ORDER BY name ASC")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(locations)
    }

    async fn create_reason(&self, tenant_id: Uuid, code: &str, name: &str, direction: ReasonDirection) -> Result<MovementReason, AppError> {
        sqlx::query_as::<_, MovementReason>(
            r#"
            INSERT INTO movement_reasons (tenant_id, code, name, direction)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
            .bind(tenant_id)
            .bind(code)
            .bind(name)
            .bind(direction)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique(e, |_| AppError::UniqueConstraintViolation(format!("O motivo '{}' já existe.", code))))
    }

    async fn list_reasons(&self, tenant_id: Uuid) -> Result<Vec<MovementReason>, AppError> {
        let reasons = sqlx::query_as::<_, MovementReason>("SELECT * FROM movement_reasons WHERE tenant_id = $1 ORDER BY code ASC")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(reasons)
    }

    // =========================================================================
    //  MOVIMENTAÇÕES
    // =========================================================================

    async fn find_movement(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<MovementDetail>, AppError> {
        let movement = sqlx::query_as::<_, StockMovement>("SELECT * FROM stock_movements WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match movement {
            Some(movement) => {
                let lines = fetch_lines(&self.pool, movement.id).await?;
                Ok(Some(MovementDetail::new(movement, lines)))
            }
            None => Ok(None),
        }
    }

    async fn find_movement_by_document_ref(&self, tenant_id: Uuid, document_ref: &str) -> Result<Option<MovementDetail>, AppError> {
        let movement = sqlx::query_as::<_, StockMovement>(
            "SELECT * FROM stock_movements WHERE tenant_id = $1 AND document_ref = $2",
        )
            .bind(tenant_id)
            .bind(document_ref)
            .fetch_optional(&self.pool)
            .await?;

        match movement {
            Some(movement) => {
                let lines = fetch_lines(&self.pool, movement.id).await?;
                Ok(Some(MovementDetail::new(movement, lines)))
            }
            None => Ok(None),
        }
    }

    async fn update_movement_meta(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: Option<MovementStatus>,
        notes: Option<&str>,
    ) -> Result<Option<StockMovement>, AppError> {
        // COALESCE: campo ausente mantém o valor atual
        let movement = sqlx::query_as::<_, StockMovement>(
            r#"
            UPDATE stock_movements
            SET status = COALESCE($3, status),
                notes = COALESCE($4, notes)
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
            .bind(tenant_id)
            .bind(id)
            .bind(status)
            .bind(notes)
            .fetch_optional(&self.pool)
            .await?;
        Ok(movement)
    }

    // =========================================================================
    //  RELATÓRIOS
    // =========================================================================

    async fn stock_position(&self, tenant_id: Uuid, filter: &StockPositionFilter, page: PageRequest) -> Result<Page<StockPositionRow>, AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        count_qb.push(POSITION_FROM);
        push_position_filters(&mut count_qb, tenant_id, filter);
        let total: i64 = count_qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT
                sl.product_id, p.sku, p.name AS product_name,
                p.category_id, c.name AS category_name,
                sl.location_id, l.name AS location_name,
                u.symbol AS unit_symbol,
                sl.on_hand, sl.reserved,
                (sl.on_hand - sl.reserved) AS available,
                sl.cost_avg,
                (sl.on_hand * sl.cost_avg) AS value_total,
                p.min_stock,
                (sl.on_hand < p.min_stock) AS is_below_min_stock,
                sl.updated_at
            "#,
        );
        qb.push(POSITION_FROM);
        push_position_filters(&mut qb, tenant_id, filter);
        // order_by vem de uma lista fechada (StockOrderBy), nunca do texto do cliente
        qb.push(" ORDER BY ")
            .push(filter.order_by.column())
            .push(" ")
            .push(filter.order_dir.sql())
            .push(", p.name ASC, l.name ASC");
        qb.push(" LIMIT ").push_bind(page.limit());
        qb.push(" OFFSET ").push_bind(page.offset());

        let items = qb.build_query_as::<StockPositionRow>().fetch_all(&self.pool).await?;

        Ok(Page { items, page: page.page, page_size: page.page_size, total })
    }

    async fn movement_history(&self, tenant_id: Uuid, filter: &MovementHistoryFilter, page: PageRequest) -> Result<Page<StockMovement>, AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM stock_movements m");
        push_history_filters(&mut count_qb, tenant_id, filter);
        let total: i64 = count_qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT m.* FROM stock_movements m");
        push_history_filters(&mut qb, tenant_id, filter);
        qb.push(" ORDER BY m.created_at DESC, m.id DESC");
        qb.push(" LIMIT ").push_bind(page.limit());
        qb.push(" OFFSET ").push_bind(page.offset());

        let items = qb.build_query_as::<StockMovement>().fetch_all(&self.pool).await?;

        Ok(Page { items, page: page.page, page_size: page.page_size, total })
    }
}

// ---
// Transação PostgreSQL
// ---
// O sqlx faz rollback sozinho quando a Transaction é descartada sem commit.
pub struct PgStockTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStockTx {
    fn conn(&mut self) -> Result<&mut PgConnection, AppError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| AppError::InternalServerError(anyhow::anyhow!("Transação já finalizada")))
    }
}

#[async_trait]
impl StockTx for PgStockTx {
    async fn find_unit(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<Unit>, AppError> {
        fetch_unit(self.conn()?, tenant_id, id).await
    }

    async fn find_product(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<Product>, AppError> {
        fetch_product(self.conn()?, tenant_id, id).await
    }

    async fn find_location(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<Location>, AppError> {
        fetch_location(self.conn()?, tenant_id, id).await
    }

    async fn find_reason(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<MovementReason>, AppError> {
        fetch_reason(self.conn()?, tenant_id, id).await
    }

    async fn lock_stock_level(&mut self, key: StockKey) -> Result<StockLevel, AppError> {
        let conn = self.conn()?;

        // 1. Garante que a linha existe (criação preguiçosa, saldo zerado)
        sqlx::query(
            r#"
            INSERT INTO stock_levels (tenant_id, product_id, location_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, product_id, location_id) DO NOTHING
            "#,
        )
            .bind(key.tenant_id)
            .bind(key.product_id)
            .bind(key.location_id)
            .execute(&mut *conn)
            .await?;

        // 2. Trava a linha até o fim da transação
        let level = sqlx::query_as::<_, StockLevel>(
            r#"
            SELECT * FROM stock_levels
            WHERE tenant_id = $1 AND product_id = $2 AND location_id = $3
            FOR UPDATE
            "#,
        )
            .bind(key.tenant_id)
            .bind(key.product_id)
            .bind(key.location_id)
            .fetch_one(&mut *conn)
            .await?;

        Ok(level)
    }

    async fn save_stock_level(&mut self, level: &StockLevel) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE stock_levels
            SET on_hand = $2, reserved = $3, cost_avg = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
            .bind(level.id)
            .bind(level.on_hand)
            .bind(level.reserved)
            .bind(level.cost_avg)
            .bind(level.updated_at)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, tenant_id, movement_type, reason_id,
                source_location_id, destination_location_id,
                document_ref, status, notes, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
            .bind(movement.id)
            .bind(movement.tenant_id)
            .bind(movement.movement_type)
            .bind(movement.reason_id)
            .bind(movement.source_location_id)
            .bind(movement.destination_location_id)
            .bind(&movement.document_ref)
            .bind(movement.status)
            .bind(&movement.notes)
            .bind(&movement.created_by)
            .bind(movement.created_at)
            .execute(self.conn()?)
            .await
            .map_err(|e| {
                map_unique(e, |constraint| {
                    if constraint == DOCUMENT_REF_CONSTRAINT {
                        AppError::DuplicateDocumentRef(movement.document_ref.clone().unwrap_or_default())
                    } else {
                        AppError::UniqueConstraintViolation("Movimentação duplicada.".into())
                    }
                })
            })?;
        Ok(())
    }

    async fn insert_line(&mut self, line: &StockMovementLine) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movement_lines (
                id, movement_id, line_no, product_id, unit_id, qty, qty_base, unit_price, value_total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
            .bind(line.id)
            .bind(line.movement_id)
            .bind(line.line_no)
            .bind(line.product_id)
            .bind(line.unit_id)
            .bind(line.qty)
            .bind(line.qty_base)
            .bind(line.unit_price)
            .bind(line.value_total)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }
}
