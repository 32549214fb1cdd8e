// src/services/inventory_service.rs

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    common::{
        error::AppError,
        pagination::{Page, PageRequest},
    },
    config::InventoryConfig,
    db::{InventoryStore, StockTx},
    models::inventory::{
        Category, Location, MovementDetail, MovementHistoryFilter, MovementReason, MovementStatus,
        MovementType, NewMovement, NewProduct, PostedMovement, Product, ReasonDirection, StockKey,
        StockLevel, StockMovement, StockMovementLine, StockPositionFilter, StockPositionRow,
        StockReservation, Unit,
    },
    services::costing::{self, COST_SCALE, MAX_QUANTITY},
};

/// Converte uma quantidade para a unidade base do produto.
/// `None` se o resultado não couber em NUMERIC(18,6).
pub fn to_base(qty: Decimal, unit: &Unit) -> Option<Decimal> {
    let qty_base = qty.checked_mul(unit.factor_to_base)?.round_dp(COST_SCALE);
    (qty_base.abs() < MAX_QUANTITY).then_some(qty_base)
}

// Erros de faixa vindos do custeio são relativos à linha.
fn at_line(idx: usize, err: AppError) -> AppError {
    match err {
        AppError::InvalidRequest { field, message } if field == "qty" || field == "unitPrice" => AppError::InvalidRequest {
            field: format!("lines[{}].{}", idx, field),
            message,
        },
        other => other,
    }
}

// Movimentação já validada: locais resolvidos e quantidades convertidas.
#[derive(Debug)]
struct MovementPlan {
    movement_type: MovementType,
    source: Option<Uuid>,
    destination: Option<Uuid>,
    lines: Vec<PlannedLine>,
}

#[derive(Debug)]
struct PlannedLine {
    product_id: Uuid,
    unit_id: Uuid,
    qty: Decimal,
    qty_base: Decimal,
    unit_price: Option<Decimal>,
}

impl MovementPlan {
    /// Local afetado por entradas/saídas simples. Ajuste usa o destino e, na falta, a origem.
    fn single_location(&self) -> Option<Uuid> {
        match self.movement_type {
            MovementType::In => self.destination,
            MovementType::Out => self.source,
            MovementType::Adjustment => self.destination.or(self.source),
            MovementType::Transfer => None,
        }
    }

    /// Todos os pares (produto, local) tocados, ordenados e sem repetição:
    /// é a ordem em que os locks são adquiridos.
    fn lock_order(&self, tenant_id: Uuid) -> Vec<StockKey> {
        let mut keys: Vec<StockKey> = Vec::new();
        for line in &self.lines {
            match self.movement_type {
                MovementType::Transfer => {
                    keys.extend(self.source.map(|l| StockKey::new(tenant_id, line.product_id, l)));
                    keys.extend(self.destination.map(|l| StockKey::new(tenant_id, line.product_id, l)));
                }
                _ => keys.extend(self.single_location().map(|l| StockKey::new(tenant_id, line.product_id, l))),
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }
}

fn missing_level(key: StockKey) -> AppError {
    AppError::InternalServerError(anyhow::anyhow!(
        "Saldo não travado: produto {} local {}",
        key.product_id,
        key.location_id
    ))
}

fn locked_level<'a>(
    tenant_id: Uuid,
    plan: &MovementPlan,
    line: &PlannedLine,
    levels: &'a mut HashMap<StockKey, StockLevel>,
) -> Result<&'a mut StockLevel, AppError> {
    let location = plan
        .single_location()
        .ok_or_else(|| AppError::invalid("destinationLocationId", "Movimentação sem local."))?;
    let key = StockKey::new(tenant_id, line.product_id, location);
    levels.get_mut(&key).ok_or_else(|| missing_level(key))
}

/// Exigências de local por tipo de movimentação.
fn check_location_requirements(
    movement_type: MovementType,
    source: Option<Uuid>,
    destination: Option<Uuid>,
) -> Result<(), AppError> {
    match movement_type {
        MovementType::Transfer => {
            if source.is_none() {
                return Err(AppError::invalid("sourceLocationId", "Transferência exige local de origem."));
            }
            if destination.is_none() {
                return Err(AppError::invalid("destinationLocationId", "Transferência exige local de destino."));
            }
            if source == destination {
                return Err(AppError::invalid("destinationLocationId", "Origem e destino devem ser diferentes."));
            }
        }
        MovementType::Out if source.is_none() => {
            return Err(AppError::invalid("sourceLocationId", "Saída exige local de origem."));
        }
        MovementType::In if destination.is_none() => {
            return Err(AppError::invalid("destinationLocationId", "Entrada exige local de destino."));
        }
        MovementType::Adjustment if source.is_none() && destination.is_none() => {
            return Err(AppError::invalid("destinationLocationId", "Ajuste exige um local."));
        }
        _ => {}
    }
    Ok(())
}

#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn InventoryStore>,
    config: InventoryConfig,
}

impl InventoryService {
    pub fn new(store: Arc<dyn InventoryStore>, config: InventoryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> InventoryConfig {
        self.config
    }

    fn ensure_enabled(&self) -> Result<(), AppError> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(AppError::FeatureDisabled)
        }
    }

    // =========================================================================
    //  CONVERSÃO DE UNIDADE
    // =========================================================================

    pub async fn convert_quantity(&self, tenant_id: Uuid, qty: Decimal, unit_id: Uuid) -> Result<Decimal, AppError> {
        self.ensure_enabled()?;
        let unit = self
            .store
            .find_unit(tenant_id, unit_id)
            .await?
            .ok_or_else(|| AppError::not_found("unit", unit_id))?;
        to_base(qty, &unit).ok_or_else(|| costing::out_of_range("qty"))
    }

    // =========================================================================
    //  VALIDAÇÃO
    // =========================================================================

    /// Checagens na ordem: motivo, locais, exigências do tipo, linhas.
    /// Para no primeiro erro. Não escreve nada.
    async fn validate_movement(
        &self,
        tx: &mut dyn StockTx,
        tenant_id: Uuid,
        request: &NewMovement,
    ) -> Result<MovementPlan, AppError> {
        let movement_type = request.movement_type;

        // 1. Motivo
        if let Some(reason_id) = request.reason_id {
            let reason = tx
                .find_reason(tenant_id, reason_id)
                .await?
                .ok_or_else(|| AppError::not_found("reason", reason_id))?;
            if !reason.direction.accepts(movement_type) {
                return Err(AppError::invalid(
                    "reasonId",
                    format!("O motivo '{}' não é compatível com movimentação {:?}.", reason.code, movement_type),
                ));
            }
        }

        // 2. Locais
        if let Some(source) = request.source_location_id {
            if tx.find_location(tenant_id, source).await?.is_none() {
                return Err(AppError::not_found("location", source));
            }
        }
        if let Some(destination) = request.destination_location_id {
            if tx.find_location(tenant_id, destination).await?.is_none() {
                return Err(AppError::not_found("location", destination));
            }
        }

        // 3. Exigências do tipo
        check_location_requirements(movement_type, request.source_location_id, request.destination_location_id)?;

        // 4. Linhas
        if request.lines.is_empty() {
            return Err(AppError::invalid("lines", "Informe ao menos uma linha."));
        }

        let mut units: HashMap<Uuid, Unit> = HashMap::new();
        let mut lines = Vec::with_capacity(request.lines.len());
        for (idx, line) in request.lines.iter().enumerate() {
            if line.qty.is_zero() {
                return Err(AppError::invalid(format!("lines[{}].qty", idx), "A quantidade não pode ser zero."));
            }
            if line.qty.is_sign_negative() && movement_type != MovementType::Adjustment {
                return Err(AppError::invalid(
                    format!("lines[{}].qty", idx),
                    "Quantidade negativa só é aceita em ajustes.",
                ));
            }
            if line.qty.abs() >= MAX_QUANTITY {
                return Err(costing::out_of_range(&format!("lines[{}].qty", idx)));
            }
            if let Some(price) = line.unit_price {
                if price.is_sign_negative() {
                    return Err(AppError::invalid(format!("lines[{}].unitPrice", idx), "O preço não pode ser negativo."));
                }
                if price >= MAX_QUANTITY {
                    return Err(costing::out_of_range(&format!("lines[{}].unitPrice", idx)));
                }
            }

            if tx.find_product(tenant_id, line.product_id).await?.is_none() {
                return Err(AppError::not_found("product", line.product_id));
            }

            let unit = match units.get(&line.unit_id) {
                Some(unit) => unit.clone(),
                None => {
                    let unit = tx
                        .find_unit(tenant_id, line.unit_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("unit", line.unit_id))?;
                    units.insert(unit.id, unit.clone());
                    unit
                }
            };

            let qty_base = to_base(line.qty, &unit)
                .ok_or_else(|| costing::out_of_range(&format!("lines[{}].qty", idx)))?;
            if qty_base.is_zero() {
                return Err(AppError::invalid(
                    format!("lines[{}].qty", idx),
                    "A quantidade convertida para a unidade base é zero.",
                ));
            }

            lines.push(PlannedLine {
                product_id: line.product_id,
                unit_id: line.unit_id,
                qty: line.qty,
                qty_base,
                unit_price: line.unit_price,
            });
        }

        Ok(MovementPlan {
            movement_type,
            source: request.source_location_id,
            destination: request.destination_location_id,
            lines,
        })
    }

    // =========================================================================
    //  MUTAÇÃO DO SALDO
    // =========================================================================

    /// Aplica uma linha aos saldos já travados e devolve o valor da linha.
    fn apply_line(
        &self,
        tenant_id: Uuid,
        plan: &MovementPlan,
        line: &PlannedLine,
        levels: &mut HashMap<StockKey, StockLevel>,
    ) -> Result<Option<Decimal>, AppError> {
        let block = self.config.block_negative_stock;
        let value_at = |cost: Decimal, field: &str| {
            costing::line_value(line.qty_base, cost).ok_or_else(|| costing::out_of_range(field))
        };
        let given_value = line.unit_price.map(|p| value_at(p, "unitPrice")).transpose()?;

        let cost_before = match plan.movement_type {
            MovementType::Transfer => {
                let (Some(src), Some(dst)) = (plan.source, plan.destination) else {
                    return Err(AppError::invalid("sourceLocationId", "Transferência exige origem e destino."));
                };
                let src_key = StockKey::new(tenant_id, line.product_id, src);
                let dst_key = StockKey::new(tenant_id, line.product_id, dst);

                let mut source = levels.remove(&src_key).ok_or_else(|| missing_level(src_key))?;
                let mut destination = levels.remove(&dst_key).ok_or_else(|| missing_level(dst_key))?;
                let result = costing::apply_transfer(&mut source, &mut destination, line.qty_base, block);
                levels.insert(src_key, source);
                levels.insert(dst_key, destination);
                result?
            }
            MovementType::In => {
                let level = locked_level(tenant_id, plan, line, levels)?;
                costing::apply_inbound(level, line.qty_base, line.unit_price)?;
                return Ok(given_value);
            }
            // Custo da mercadoria vendida: custo médio antes da baixa
            MovementType::Out => {
                let level = locked_level(tenant_id, plan, line, levels)?;
                costing::apply_outbound(level, line.qty_base, block)?
            }
            MovementType::Adjustment => {
                let level = locked_level(tenant_id, plan, line, levels)?;
                costing::apply_adjustment(level, line.qty_base, line.unit_price)?
            }
        };

        match given_value {
            Some(value) => Ok(Some(value)),
            None => value_at(cost_before, "qty").map(Some),
        }
    }

    // =========================================================================
    //  PERSISTÊNCIA
    // =========================================================================

    /// Registra a movimentação e aplica as linhas aos saldos numa única transação.
    /// Com `document_ref` repetido no mesmo tenant, devolve a movimentação existente.
    pub async fn post_movement(&self, tenant_id: Uuid, mut request: NewMovement) -> Result<PostedMovement, AppError> {
        self.ensure_enabled()?;

        request.document_ref = request
            .document_ref
            .take()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        // Atalho: a checagem definitiva é a constraint única no insert
        if let Some(document_ref) = request.document_ref.as_deref() {
            if let Some(existing) = self.store.find_movement_by_document_ref(tenant_id, document_ref).await? {
                tracing::info!("Movimentação de-duplicada pelo documento '{}' ({})", document_ref, existing.movement.id);
                return Ok(PostedMovement { detail: existing, created: false });
            }
        }

        match self.apply_movement(tenant_id, &request).await {
            Ok(detail) => {
                tracing::info!(
                    "✅ Movimentação {:?} {} registrada: {} linha(s), valor {}",
                    detail.movement.movement_type,
                    detail.movement.id,
                    detail.totals.line_count,
                    detail.totals.value_total
                );
                Ok(PostedMovement { detail, created: true })
            }
            // Outra requisição gravou o mesmo documento entre a checagem e o insert
            Err(AppError::DuplicateDocumentRef(document_ref)) => {
                let existing = self
                    .store
                    .find_movement_by_document_ref(tenant_id, &document_ref)
                    .await?
                    .ok_or(AppError::DuplicateDocumentRef(document_ref))?;
                tracing::info!("Movimentação de-duplicada após corrida ({})", existing.movement.id);
                Ok(PostedMovement { detail: existing, created: false })
            }
            Err(e) => {
                if let AppError::InsufficientStock { product_id, location_id, available, required } = &e {
                    tracing::warn!(
                        "Saída bloqueada: produto {} local {} disponível {} necessário {}",
                        product_id, location_id, available, required
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply_movement(&self, tenant_id: Uuid, request: &NewMovement) -> Result<MovementDetail, AppError> {
        // Qualquer `?` daqui em diante descarta a transação (rollback + locks soltos)
        let mut tx = self.store.begin().await?;

        let plan = self.validate_movement(tx.as_mut(), tenant_id, request).await?;

        let now = Utc::now();
        let movement = StockMovement {
            id: Uuid::new_v4(),
            tenant_id,
            movement_type: plan.movement_type,
            reason_id: request.reason_id,
            source_location_id: plan.source,
            destination_location_id: plan.destination,
            document_ref: request.document_ref.clone(),
            status: MovementStatus::Posted,
            notes: request.notes.clone(),
            created_by: request.created_by.clone(),
            created_at: now,
        };
        tx.insert_movement(&movement).await?;

        // Locks sempre na mesma ordem: duas movimentações com vários pares não se travam mutuamente
        let mut levels: HashMap<StockKey, StockLevel> = HashMap::new();
        for key in plan.lock_order(tenant_id) {
            let level = tx.lock_stock_level(key).await?;
            levels.insert(key, level);
        }

        let mut lines = Vec::with_capacity(plan.lines.len());
        for (idx, planned) in plan.lines.iter().enumerate() {
            let value_total = self
                .apply_line(tenant_id, &plan, planned, &mut levels)
                .map_err(|e| at_line(idx, e))?;
            lines.push(StockMovementLine {
                id: Uuid::new_v4(),
                movement_id: movement.id,
                line_no: idx as i32 + 1,
                product_id: planned.product_id,
                unit_id: planned.unit_id,
                qty: planned.qty,
                qty_base: planned.qty_base,
                unit_price: planned.unit_price,
                value_total,
            });
        }

        for line in &lines {
            tx.insert_line(line).await?;
        }
        for level in levels.values_mut() {
            level.updated_at = now;
            tx.save_stock_level(level).await?;
        }

        tx.commit().await?;
        Ok(MovementDetail::new(movement, lines))
    }

    pub async fn get_movement(&self, tenant_id: Uuid, id: Uuid) -> Result<MovementDetail, AppError> {
        self.ensure_enabled()?;
        self.store
            .find_movement(tenant_id, id)
            .await?
            .ok_or_else(|| AppError::not_found("movement", id))
    }

    /// Só status e observações são editáveis; o resto do histórico é imutável.
    pub async fn update_movement(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: Option<MovementStatus>,
        notes: Option<&str>,
    ) -> Result<StockMovement, AppError> {
        self.ensure_enabled()?;
        if status.is_none() && notes.is_none() {
            return Err(AppError::invalid("status", "Informe status e/ou observações."));
        }
        let movement = self
            .store
            .update_movement_meta(tenant_id, id, status, notes)
            .await?
            .ok_or_else(|| AppError::not_found("movement", id))?;
        tracing::info!("Movimentação {} atualizada (status {:?})", movement.id, movement.status);
        Ok(movement)
    }

    // =========================================================================
    //  RESERVAS
    // =========================================================================

    async fn reservation_context(
        &self,
        tx: &mut dyn StockTx,
        tenant_id: Uuid,
        request: &StockReservation,
    ) -> Result<(StockKey, Decimal), AppError> {
        if request.qty <= Decimal::ZERO {
            return Err(AppError::invalid("qty", "A quantidade deve ser maior que zero."));
        }
        if request.qty >= MAX_QUANTITY {
            return Err(costing::out_of_range("qty"));
        }
        if tx.find_product(tenant_id, request.product_id).await?.is_none() {
            return Err(AppError::not_found("product", request.product_id));
        }
        if tx.find_location(tenant_id, request.location_id).await?.is_none() {
            return Err(AppError::not_found("location", request.location_id));
        }
        let unit = tx
            .find_unit(tenant_id, request.unit_id)
            .await?
            .ok_or_else(|| AppError::not_found("unit", request.unit_id))?;

        let qty_base = to_base(request.qty, &unit).ok_or_else(|| costing::out_of_range("qty"))?;
        if qty_base.is_zero() {
            return Err(AppError::invalid("qty", "A quantidade convertida para a unidade base é zero."));
        }

        let key = StockKey::new(tenant_id, request.product_id, request.location_id);
        Ok((key, qty_base))
    }

    /// Reserva sempre exige disponível, independente do bloqueio de saldo negativo.
    pub async fn reserve_stock(&self, tenant_id: Uuid, request: StockReservation) -> Result<StockLevel, AppError> {
        self.ensure_enabled()?;
        let mut tx = self.store.begin().await?;
        let (key, qty_base) = self.reservation_context(tx.as_mut(), tenant_id, &request).await?;

        let mut level = tx.lock_stock_level(key).await?;
        let available = level.available();
        if available < qty_base {
            return Err(AppError::InsufficientStock {
                product_id: key.product_id,
                location_id: key.location_id,
                available,
                required: qty_base,
            });
        }
        level.reserved = level.reserved.checked_add(qty_base).ok_or_else(|| costing::out_of_range("qty"))?;
        level.updated_at = Utc::now();
        tx.save_stock_level(&level).await?;
        tx.commit().await?;

        tracing::info!("Reserva de {} no produto {} local {}", qty_base, key.product_id, key.location_id);
        Ok(level)
    }

    pub async fn release_stock(&self, tenant_id: Uuid, request: StockReservation) -> Result<StockLevel, AppError> {
        self.ensure_enabled()?;
        let mut tx = self.store.begin().await?;
        let (key, qty_base) = self.reservation_context(tx.as_mut(), tenant_id, &request).await?;

        let mut level = tx.lock_stock_level(key).await?;
        if qty_base > level.reserved {
            return Err(AppError::invalid(
                "qty",
                format!("Liberação de {} maior que o reservado ({}).", qty_base, level.reserved),
            ));
        }
        level.reserved -= qty_base;
        level.updated_at = Utc::now();
        tx.save_stock_level(&level).await?;
        tx.commit().await?;

        tracing::info!("Reserva liberada: {} do produto {} local {}", qty_base, key.product_id, key.location_id);
        Ok(level)
    }

    // =========================================================================
    //  CONSULTAS
    // =========================================================================

    pub async fn stock_position(
        &self,
        tenant_id: Uuid,
        filter: &StockPositionFilter,
        page: PageRequest,
    ) -> Result<Page<StockPositionRow>, AppError> {
        self.ensure_enabled()?;
        self.store.stock_position(tenant_id, filter, page).await
    }

    pub async fn movement_history(
        &self,
        tenant_id: Uuid,
        filter: &MovementHistoryFilter,
        page: PageRequest,
    ) -> Result<Page<StockMovement>, AppError> {
        self.ensure_enabled()?;
        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
            if from > to {
                return Err(AppError::invalid("dateFrom", "dateFrom deve ser anterior a dateTo."));
            }
        }
        self.store.movement_history(tenant_id, filter, page).await
    }

    // =========================================================================
    //  CATÁLOGO
    // =========================================================================

    pub async fn create_unit(&self, tenant_id: Uuid, name: &str, symbol: &str, factor_to_base: Decimal) -> Result<Unit, AppError> {
        self.ensure_enabled()?;
        if factor_to_base <= Decimal::ZERO {
            return Err(AppError::invalid("factorToBase", "O fator deve ser maior que zero."));
        }
        if factor_to_base >= MAX_QUANTITY {
            return Err(costing::out_of_range("factorToBase"));
        }
        self.store.create_unit(tenant_id, name.trim(), symbol.trim(), factor_to_base).await
    }

    pub async fn list_units(&self, tenant_id: Uuid) -> Result<Vec<Unit>, AppError> {
        self.ensure_enabled()?;
        self.store.list_units(tenant_id).await
    }

    pub async fn create_category(&self, tenant_id: Uuid, name: &str) -> Result<Category, AppError> {
        self.ensure_enabled()?;
        self.store.create_category(tenant_id, name.trim()).await
    }

    pub async fn list_categories(&self, tenant_id: Uuid) -> Result<Vec<Category>, AppError> {
        self.ensure_enabled()?;
        self.store.list_categories(tenant_id).await
    }

    pub async fn create_product(&self, tenant_id: Uuid, product: NewProduct) -> Result<Product, AppError> {
        self.ensure_enabled()?;
        if product.min_stock.is_sign_negative() {
            return Err(AppError::invalid("minStock", "O estoque mínimo não pode ser negativo."));
        }

        if self.store.find_unit(tenant_id, product.base_unit_id).await?.is_none() {
            return Err(AppError::not_found("unit", product.base_unit_id));
        }

        if let Some(category_id) = product.category_id {
            if self.store.find_category(tenant_id, category_id).await?.is_none() {
                return Err(AppError::not_found("category", category_id));
            }
        }
        self.store.create_product(tenant_id, &product).await
    }

    pub async fn list_products(&self, tenant_id: Uuid) -> Result<Vec<Product>, AppError> {
        self.ensure_enabled()?;
        self.store.list_products(tenant_id).await
    }

    pub async fn create_location(&self, tenant_id: Uuid, name: &str) -> Result<Location, AppError> {
        self.ensure_enabled()?;
        self.store.create_location(tenant_id, name.trim()).await
    }

    pub async fn list_locations(&self, tenant_id: Uuid) -> Result<Vec<Location>, AppError> {
        self.ensure_enabled()?;
        self.store.list_locations(tenant_id).await
    }

    pub async fn create_reason(&self, tenant_id: Uuid, code: &str, name: &str, direction: ReasonDirection) -> Result<MovementReason, AppError> {
        self.ensure_enabled()?;
        self.store.create_reason(tenant_id, &code.trim().to_uppercase(), name.trim(), direction).await
    }

    pub async fn list_reasons(&self, tenant_id: Uuid) -> Result<Vec<MovementReason>, AppError> {
        self.ensure_enabled()?;
        self.store.list_reasons(tenant_id).await
    }
}
