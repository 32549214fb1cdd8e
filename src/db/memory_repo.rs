// src/db/memory_repo.rs
//
// Store em memória com a mesma semântica transacional do PostgreSQL:
// - cada par (tenant, produto, local) tem um Mutex próprio, que faz o papel
//   do `SELECT ... FOR UPDATE`; o guard fica na transação e é solto no drop;
// - escritas ficam em área de rascunho e só são aplicadas no commit;
// - a unicidade do document_ref é checada de novo no commit (guarda definitiva).

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::{
    common::{
        error::AppError,
        pagination::{Page, PageRequest},
    },
    db::store::{InventoryStore, StockTx},
    models::inventory::{
        Category, Location, MovementDetail, MovementHistoryFilter, MovementReason, MovementStatus,
        NewProduct, Product, ReasonDirection, SortDirection, StockKey, StockLevel, StockMovement,
        StockMovementLine, StockOrderBy, StockPositionFilter, StockPositionRow, Unit,
    },
};

#[derive(Default)]
struct MemoryState {
    units: HashMap<Uuid, Unit>,
    categories: HashMap<Uuid, Category>,
    products: HashMap<Uuid, Product>,
    locations: HashMap<Uuid, Location>,
    reasons: HashMap<Uuid, MovementReason>,
    levels: HashMap<StockKey, StockLevel>,
    // Em ordem de inserção
    movements: Vec<StockMovement>,
    lines: Vec<StockMovementLine>,
}

impl MemoryState {
    fn document_ref_taken(&self, tenant_id: Uuid, document_ref: &str) -> bool {
        self.movements
            .iter()
            .any(|m| m.tenant_id == tenant_id && m.document_ref.as_deref() == Some(document_ref))
    }

    fn detail(&self, movement: &StockMovement) -> MovementDetail {
        let mut lines: Vec<StockMovementLine> = self
            .lines
            .iter()
            .filter(|l| l.movement_id == movement.id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.line_no);
        MovementDetail::new(movement.clone(), lines)
    }
}

type RowLocks = Arc<Mutex<HashMap<StockKey, Arc<Mutex<()>>>>>;

#[derive(Clone, Default)]
pub struct MemoryInventoryRepository {
    state: Arc<RwLock<MemoryState>>,
    row_locks: RowLocks,
}

impl MemoryInventoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saldo atual (fora de transação). Usado em testes e diagnósticos.
    pub async fn stock_level(&self, key: StockKey) -> Option<StockLevel> {
        self.state.read().await.levels.get(&key).cloned()
    }

    pub async fn movement_count(&self, tenant_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .movements
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .count()
    }

    fn unique_violation(message: String) -> AppError {
        AppError::UniqueConstraintViolation(message)
    }
}

fn compare_rows(a: &StockPositionRow, b: &StockPositionRow, order_by: StockOrderBy) -> std::cmp::Ordering {
    match order_by {
        StockOrderBy::ProductName => a.product_name.to_lowercase().cmp(&b.product_name.to_lowercase()),
        StockOrderBy::Sku => a.sku.cmp(&b.sku),
        StockOrderBy::LocationName => a.location_name.to_lowercase().cmp(&b.location_name.to_lowercase()),
        StockOrderBy::OnHand => a.on_hand.cmp(&b.on_hand),
        StockOrderBy::Available => a.available.cmp(&b.available),
        StockOrderBy::CostAvg => a.cost_avg.cmp(&b.cost_avg),
        StockOrderBy::ValueTotal => a.value_total.cmp(&b.value_total),
        StockOrderBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryRepository {
    async fn begin(&self) -> Result<Box<dyn StockTx>, AppError> {
        Ok(Box::new(MemoryStockTx {
            state: self.state.clone(),
            row_locks: self.row_locks.clone(),
            held: HashMap::new(),
            staged_levels: HashMap::new(),
            staged_movements: Vec::new(),
            staged_lines: Vec::new(),
        }))
    }

    // --- Catálogo ---

    async fn create_unit(&self, tenant_id: Uuid, name: &str, symbol: &str, factor_to_base: Decimal) -> Result<Unit, AppError> {
        let mut state = self.state.write().await;
        if state.units.values().any(|u| u.tenant_id == tenant_id && u.symbol == symbol) {
            return Err(Self::unique_violation(format!("A unidade '{}' já existe.", symbol)));
        }
        let unit = Unit {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.to_string(),
            symbol: symbol.to_string(),
            factor_to_base,
            created_at: Utc::now(),
        };
        state.units.insert(unit.id, unit.clone());
        Ok(unit)
    }

    async fn list_units(&self, tenant_id: Uuid) -> Result<Vec<Unit>, AppError> {
        let state = self.state.read().await;
        let mut units: Vec<Unit> = state.units.values().filter(|u| u.tenant_id == tenant_id).cloned().collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    async fn find_unit(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Unit>, AppError> {
        let state = self.state.read().await;
        Ok(state.units.get(&id).filter(|u| u.tenant_id == tenant_id).cloned())
    }

    async fn create_category(&self, tenant_id: Uuid, name: &str) -> Result<Category, AppError> {
        let mut state = self.state.write().await;
        if state.categories.values().any(|c| c.tenant_id == tenant_id && c.name == name) {
            return Err(Self::unique_violation(format!("A categoria '{}' já existe.", name)));
        }
        let category = Category { id: Uuid::new_v4(), tenant_id, name: name.to_string(), created_at: Utc::now() };
        state.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn list_categories(&self, tenant_id: Uuid) -> Result<Vec<Category>, AppError> {
        let state = self.state.read().await;
        let mut categories: Vec<Category> =
            state.categories.values().filter(|c| c.tenant_id == tenant_id).cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn find_category(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Category>, AppError> {
        let state = self.state.read().await;
        Ok(state.categories.get(&id).filter(|c| c.tenant_id == tenant_id).cloned())
    }

    async fn create_product(&self, tenant_id: Uuid, product: &NewProduct) -> Result<Product, AppError> {
        let mut state = self.state.write().await;
        if state.products.values().any(|p| p.tenant_id == tenant_id && p.sku == product.sku) {
            return Err(Self::unique_violation(format!("O SKU '{}' já existe.", product.sku)));
        }
        let now = Utc::now();
        let created = Product {
            id: Uuid::new_v4(),
            tenant_id,
            category_id: product.category_id,
            base_unit_id: product.base_unit_id,
            sku: product.sku.clone(),
            name: product.name.clone(),
            price: product.price,
            min_stock: product.min_stock,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_products(&self, tenant_id: Uuid) -> Result<Vec<Product>, AppError> {
        let state = self.state.read().await;
        let mut products: Vec<Product> =
            state.products.values().filter(|p| p.tenant_id == tenant_id).cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn create_location(&self, tenant_id: Uuid, name: &str) -> Result<Location, AppError> {
        let mut state = self.state.write().await;
        if state.locations.values().any(|l| l.tenant_id == tenant_id && l.name == name) {
            return Err(Self::unique_violation(format!("O local '{}' já existe.", name)));
        }
        let location = Location { id: Uuid::new_v4(), tenant_id, name: name.to_string(), created_at: Utc::now() };
        state.locations.insert(location.id, location.clone());
        Ok(location)
    }

    async fn list_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, AppError> {
        let state = self.state.read().await;
        let mut locations: Vec<Location> =
            state.locations.values().filter(|l| l.tenant_id == tenant_id).cloned().collect();
        locations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(locations)
    }

    async fn create_reason(&self, tenant_id: Uuid, code: &str, name: &str, direction: ReasonDirection) -> Result<MovementReason, AppError> {
        let mut state = self.state.write().await;
        if state.reasons.values().any(|r| r.tenant_id == tenant_id && r.code == code) {
            return Err(Self::unique_violation(format!("O motivo '{}' já existe.", code)));
        }
        let reason = MovementReason {
            id: Uuid::new_v4(),
            tenant_id,
            code: code.to_string(),
            name: name.to_string(),
            direction,
            created_at: Utc::now(),
        };
        state.reasons.insert(reason.id, reason.clone());
        Ok(reason)
    }

    async fn list_reasons(&self, tenant_id: Uuid) -> Result<Vec<MovementReason>, AppError> {
        let state = self.state.read().await;
        let mut reasons: Vec<MovementReason> =
            state.reasons.values().filter(|r| r.tenant_id == tenant_id).cloned().collect();
        reasons.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(reasons)
    }

    // --- Movimentações ---

    async fn find_movement(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<MovementDetail>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .movements
            .iter()
            .find(|m| m.tenant_id == tenant_id && m.id == id)
            .map(|m| state.detail(m)))
    }

    async fn find_movement_by_document_ref(&self, tenant_id: Uuid, document_ref: &str) -> Result<Option<MovementDetail>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .movements
            .iter()
            .find(|m| m.tenant_id == tenant_id && m.document_ref.as_deref() == Some(document_ref))
            .map(|m| state.detail(m)))
    }

    async fn update_movement_meta(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: Option<MovementStatus>,
        notes: Option<&str>,
    ) -> Result<Option<StockMovement>, AppError> {
        let mut state = self.state.write().await;
        let Some(movement) = state.movements.iter_mut().find(|m| m.tenant_id == tenant_id && m.id == id) else {
            return Ok(None);
        };
        if let Some(status) = status {
            movement.status = status;
        }
        if let Some(notes) = notes {
            movement.notes = Some(notes.to_string());
        }
        Ok(Some(movement.clone()))
    }

    // --- Relatórios ---

    async fn stock_position(&self, tenant_id: Uuid, filter: &StockPositionFilter, page: PageRequest) -> Result<Page<StockPositionRow>, AppError> {
        let state = self.state.read().await;
        let term = filter.search_term();

        let mut rows: Vec<StockPositionRow> = state
            .levels
            .values()
            .filter(|level| level.tenant_id == tenant_id)
            .filter(|level| filter.location_id.is_none_or(|l| level.location_id == l))
            .filter_map(|level| {
                let product = state.products.get(&level.product_id)?;
                let location = state.locations.get(&level.location_id)?;
                let unit = state.units.get(&product.base_unit_id)?;
                let category = product.category_id.and_then(|c| state.categories.get(&c));
                Some(StockPositionRow {
                    product_id: product.id,
                    sku: product.sku.clone(),
                    product_name: product.name.clone(),
                    category_id: product.category_id,
                    category_name: category.map(|c| c.name.clone()),
                    location_id: location.id,
                    location_name: location.name.clone(),
                    unit_symbol: unit.symbol.clone(),
                    on_hand: level.on_hand,
                    reserved: level.reserved,
                    available: level.available(),
                    cost_avg: level.cost_avg,
                    value_total: level.on_hand.saturating_mul(level.cost_avg),
                    min_stock: product.min_stock,
                    is_below_min_stock: level.on_hand < product.min_stock,
                    updated_at: level.updated_at,
                })
            })
            .filter(|row| filter.category_id.is_none_or(|c| row.category_id == Some(c)))
            .filter(|row| !filter.below_min_stock || row.is_below_min_stock)
            .filter(|row| {
                term.as_deref().is_none_or(|t| {
                    row.product_name.to_lowercase().contains(t) || row.sku.to_lowercase().contains(t)
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            let primary = match filter.order_dir {
                SortDirection::Asc => compare_rows(a, b, filter.order_by),
                SortDirection::Desc => compare_rows(b, a, filter.order_by),
            };
            primary
                .then_with(|| a.product_name.cmp(&b.product_name))
                .then_with(|| a.location_name.cmp(&b.location_name))
        });

        Ok(page.slice(rows))
    }

    async fn movement_history(&self, tenant_id: Uuid, filter: &MovementHistoryFilter, page: PageRequest) -> Result<Page<StockMovement>, AppError> {
        let state = self.state.read().await;

        let rows: Vec<StockMovement> = state
            .movements
            .iter()
            .rev() // mais recentes primeiro
            .filter(|m| m.tenant_id == tenant_id && filter.matches_header(m))
            .filter(|m| {
                filter.product_id.is_none_or(|p| {
                    state.lines.iter().any(|l| l.movement_id == m.id && l.product_id == p)
                })
            })
            .cloned()
            .collect();

        Ok(page.slice(rows))
    }
}

// ---
// Transação em memória
// ---
pub struct MemoryStockTx {
    state: Arc<RwLock<MemoryState>>,
    row_locks: RowLocks,
    held: HashMap<StockKey, OwnedMutexGuard<()>>,
    staged_levels: HashMap<StockKey, StockLevel>,
    staged_movements: Vec<StockMovement>,
    staged_lines: Vec<StockMovementLine>,
}

impl MemoryStockTx {
    async fn acquire_row(&mut self, key: StockKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let row_lock = {
            let mut locks = self.row_locks.lock().await;
            locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let guard = row_lock.lock_owned().await;
        self.held.insert(key, guard);
    }
}

#[async_trait]
impl StockTx for MemoryStockTx {
    async fn find_unit(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<Unit>, AppError> {
        let state = self.state.read().await;
        Ok(state.units.get(&id).filter(|u| u.tenant_id == tenant_id).cloned())
    }

    async fn find_product(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<Product>, AppError> {
        let state = self.state.read().await;
        Ok(state.products.get(&id).filter(|p| p.tenant_id == tenant_id).cloned())
    }

    async fn find_location(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<Location>, AppError> {
        let state = self.state.read().await;
        Ok(state.locations.get(&id).filter(|l| l.tenant_id == tenant_id).cloned())
    }

    async fn find_reason(&mut self, tenant_id: Uuid, id: Uuid) -> Result<Option<MovementReason>, AppError> {
        let state = self.state.read().await;
        Ok(state.reasons.get(&id).filter(|r| r.tenant_id == tenant_id).cloned())
    }

    async fn lock_stock_level(&mut self, key: StockKey) -> Result<StockLevel, AppError> {
        self.acquire_row(key).await;

        if let Some(level) = self.staged_levels.get(&key) {
            return Ok(level.clone());
        }
        let state = self.state.read().await;
        Ok(state.levels.get(&key).cloned().unwrap_or_else(|| StockLevel::empty(key)))
    }

    async fn save_stock_level(&mut self, level: &StockLevel) -> Result<(), AppError> {
        let key = level.key();
        if !self.held.contains_key(&key) {
            return Err(AppError::InternalServerError(anyhow::anyhow!(
                "Saldo gravado sem lock: produto {} local {}",
                key.product_id,
                key.location_id
            )));
        }
        self.staged_levels.insert(key, level.clone());
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), AppError> {
        if let Some(document_ref) = movement.document_ref.as_deref() {
            let staged_dup = self
                .staged_movements
                .iter()
                .any(|m| m.tenant_id == movement.tenant_id && m.document_ref.as_deref() == Some(document_ref));
            if staged_dup || self.state.read().await.document_ref_taken(movement.tenant_id, document_ref) {
                return Err(AppError::DuplicateDocumentRef(document_ref.to_string()));
            }
        }
        self.staged_movements.push(movement.clone());
        Ok(())
    }

    async fn insert_line(&mut self, line: &StockMovementLine) -> Result<(), AppError> {
        if !self.staged_movements.iter().any(|m| m.id == line.movement_id) {
            return Err(AppError::InternalServerError(anyhow::anyhow!(
                "Linha sem cabeçalho na transação: {}",
                line.movement_id
            )));
        }
        self.staged_lines.push(line.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        {
            let mut state = self.state.write().await;

            // Guarda definitiva: outra transação pode ter gravado o mesmo documento
            for movement in &self.staged_movements {
                if let Some(document_ref) = movement.document_ref.as_deref() {
                    if state.document_ref_taken(movement.tenant_id, document_ref) {
                        return Err(AppError::DuplicateDocumentRef(document_ref.to_string()));
                    }
                }
            }

            for (key, level) in self.staged_levels.drain() {
                state.levels.insert(key, level);
            }
            state.movements.append(&mut self.staged_movements);
            state.lines.append(&mut self.staged_lines);
        }

        // Solta os locks de linha
        self.held.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inventory::MovementType;
    use std::time::Duration;

    async fn seed(repo: &MemoryInventoryRepository, tenant: Uuid) -> (Product, Location) {
        let unit = repo.create_unit(tenant, "Unidade", "un", Decimal::ONE).await.unwrap();
        let product = repo
            .create_product(
                tenant,
                &NewProduct {
                    category_id: None,
                    base_unit_id: unit.id,
                    sku: "SKU-1".into(),
                    name: "Água".into(),
                    price: None,
                    min_stock: Decimal::from(5),
                },
            )
            .await
            .unwrap();
        let location = repo.create_location(tenant, "Bar").await.unwrap();
        (product, location)
    }

    fn movement(tenant_id: Uuid, document_ref: Option<&str>) -> StockMovement {
        StockMovement {
            id: Uuid::new_v4(),
            tenant_id,
            movement_type: MovementType::In,
            reason_id: None,
            source_location_id: None,
            destination_location_id: None,
            document_ref: document_ref.map(str::to_string),
            status: MovementStatus::Posted,
            notes: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes_and_releases_lock() {
        let repo = MemoryInventoryRepository::new();
        let tenant = Uuid::new_v4();
        let (product, location) = seed(&repo, tenant).await;
        let key = StockKey::new(tenant, product.id, location.id);

        {
            let mut tx = repo.begin().await.unwrap();
            let mut level = tx.lock_stock_level(key).await.unwrap();
            level.on_hand = Decimal::from(99);
            tx.save_stock_level(&level).await.unwrap();
            // sem commit
        }

        assert!(repo.stock_level(key).await.is_none());

        // O lock foi liberado: uma nova transação consegue travar a linha
        let mut tx = repo.begin().await.unwrap();
        let level = tokio::time::timeout(Duration::from_secs(1), tx.lock_stock_level(key))
            .await
            .expect("lock deveria estar livre")
            .unwrap();
        assert_eq!(level.on_hand, Decimal::ZERO);
    }

    #[tokio::test]
    async fn second_transaction_waits_for_row_lock() {
        let repo = MemoryInventoryRepository::new();
        let tenant = Uuid::new_v4();
        let (product, location) = seed(&repo, tenant).await;
        let key = StockKey::new(tenant, product.id, location.id);

        let mut first = repo.begin().await.unwrap();
        first.lock_stock_level(key).await.unwrap();

        let mut second = repo.begin().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), second.lock_stock_level(key)).await;
        assert!(blocked.is_err(), "a segunda transação não deveria obter o lock");

        first.commit().await.unwrap();
        let level = tokio::time::timeout(Duration::from_secs(1), second.lock_stock_level(key))
            .await
            .expect("lock deveria ter sido liberado no commit")
            .unwrap();
        assert_eq!(level.key(), key);
    }

    #[tokio::test]
    async fn commit_rejects_document_ref_committed_by_another_tx() {
        let repo = MemoryInventoryRepository::new();
        let tenant = Uuid::new_v4();

        let mut first = repo.begin().await.unwrap();
        let mut second = repo.begin().await.unwrap();
        first.insert_movement(&movement(tenant, Some("NF-1"))).await.unwrap();
        second.insert_movement(&movement(tenant, Some("NF-1"))).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateDocumentRef(ref d) if d == "NF-1"));
        assert_eq!(repo.movement_count(tenant).await, 1);
    }

    #[tokio::test]
    async fn document_ref_is_scoped_by_tenant() {
        let repo = MemoryInventoryRepository::new();
        for tenant in [Uuid::new_v4(), Uuid::new_v4()] {
            let mut tx = repo.begin().await.unwrap();
            tx.insert_movement(&movement(tenant, Some("NF-7"))).await.unwrap();
            tx.commit().await.unwrap();
        }
    }

    #[tokio::test]
    async fn stock_position_filters_and_derives_columns() {
        let repo = MemoryInventoryRepository::new();
        let tenant = Uuid::new_v4();
        let (product, location) = seed(&repo, tenant).await;
        let other_location = repo.create_location(tenant, "Depósito").await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        for (loc, on_hand) in [(location.id, 3), (other_location.id, 40)] {
            let mut level = tx.lock_stock_level(StockKey::new(tenant, product.id, loc)).await.unwrap();
            level.on_hand = Decimal::from(on_hand);
            level.reserved = Decimal::ONE;
            level.cost_avg = Decimal::from(2);
            tx.save_stock_level(&level).await.unwrap();
        }
        tx.commit().await.unwrap();

        let all = repo
            .stock_position(tenant, &StockPositionFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        for row in &all.items {
            assert_eq!(row.available, row.on_hand - row.reserved);
            assert_eq!(row.value_total, row.on_hand * row.cost_avg);
            assert_eq!(row.is_below_min_stock, row.on_hand < row.min_stock);
        }

        let below = StockPositionFilter { below_min_stock: true, ..Default::default() };
        let page = repo.stock_position(tenant, &below, PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].location_name, "Bar");

        let by_text = StockPositionFilter { q: Some("  sku-1 ".into()), ..Default::default() };
        assert_eq!(repo.stock_position(tenant, &by_text, PageRequest::default()).await.unwrap().total, 2);

        let sorted = StockPositionFilter {
            order_by: StockOrderBy::OnHand,
            order_dir: SortDirection::Desc,
            ..Default::default()
        };
        let page = repo.stock_position(tenant, &sorted, PageRequest::new(Some(1), Some(1))).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].on_hand, Decimal::from(40));

        let other_tenant = repo
            .stock_position(Uuid::new_v4(), &StockPositionFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(other_tenant.total, 0);
    }
}
