// src/models/inventory.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "movement_type", rename_all = "SCREAMING_SNAKE_CASE")] // Banco
#[serde(rename_all = "SCREAMING_SNAKE_CASE")] // JSON
pub enum MovementType {
    In,
    Out,
    Transfer,
    Adjustment,
}

/// Direção permitida para um motivo de movimentação.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "reason_direction", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonDirection {
    In,
    Out,
    Both,
}

impl ReasonDirection {
    pub fn allows_inbound(self) -> bool {
        matches!(self, ReasonDirection::In | ReasonDirection::Both)
    }

    pub fn allows_outbound(self) -> bool {
        matches!(self, ReasonDirection::Out | ReasonDirection::Both)
    }

    /// IN e ADJUSTMENT exigem motivo de entrada; OUT exige motivo de saída.
    /// TRANSFER aceita qualquer motivo.
    pub fn accepts(self, movement_type: MovementType) -> bool {
        match movement_type {
            MovementType::In | MovementType::Adjustment => self.allows_inbound(),
            MovementType::Out => self.allows_outbound(),
            MovementType::Transfer => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "movement_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementStatus {
    #[default]
    Posted,
    Audited,
    Disputed,
}

// --- Catálogo ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    #[schema(example = "Caixa com 12")]
    pub name: String,
    #[schema(example = "cx12")]
    pub symbol: String,
    /// Multiplicador para a unidade base do produto. Sempre > 0.
    #[schema(example = 12)]
    pub factor_to_base: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    #[schema(example = "Bebidas")]
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub category_id: Option<Uuid>,
    pub base_unit_id: Uuid,
    #[schema(example = "CERV-LATA-350")]
    pub sku: String,
    #[schema(example = "Cerveja lata 350ml")]
    pub name: String,
    pub price: Option<Decimal>,
    pub min_stock: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Ponto de estoque: "bar", "depósito", ...
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    #[schema(example = "Bar principal")]
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementReason {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    #[schema(example = "QUEBRA")]
    pub code: String,
    #[schema(example = "Quebra / avaria")]
    pub name: String,
    pub direction: ReasonDirection,
    pub created_at: DateTime<Utc>,
}

// --- Saldo ---

/// Saldo de um produto em um local. É a única linha alterada repetidamente,
/// sempre sob lock exclusivo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub on_hand: Decimal,
    pub reserved: Decimal,
    pub cost_avg: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// Saldo zerado, criado na primeira referência ao par (produto, local).
    pub fn empty(key: StockKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: key.tenant_id,
            product_id: key.product_id,
            location_id: key.location_id,
            on_hand: Decimal::ZERO,
            reserved: Decimal::ZERO,
            cost_avg: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.tenant_id, self.product_id, self.location_id)
    }

    pub fn available(&self) -> Decimal {
        self.on_hand.saturating_sub(self.reserved)
    }
}

/// Identifica a linha de saldo. A ordem (Ord) define a ordem de aquisição de locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StockKey {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
}

impl StockKey {
    pub fn new(tenant_id: Uuid, product_id: Uuid, location_id: Uuid) -> Self {
        Self { tenant_id, product_id, location_id }
    }
}

// --- Movimentações (histórico imutável) ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub movement_type: MovementType,
    pub reason_id: Option<Uuid>,
    pub source_location_id: Option<Uuid>,
    pub destination_location_id: Option<Uuid>,
    #[schema(example = "NF-000123")]
    pub document_ref: Option<String>,
    pub status: MovementStatus,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockMovementLine {
    pub id: Uuid,
    pub movement_id: Uuid,
    /// Posição da linha no documento (1, 2, ...).
    pub line_no: i32,
    pub product_id: Uuid,
    pub unit_id: Uuid,
    /// Quantidade como informada, na unidade `unit_id`.
    pub qty: Decimal,
    /// `qty * factor_to_base`, calculado uma vez na criação da linha.
    pub qty_base: Decimal,
    /// Custo por unidade base.
    pub unit_price: Option<Decimal>,
    pub value_total: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementTotals {
    pub line_count: usize,
    pub qty_base_total: Decimal,
    pub value_total: Decimal,
}

impl MovementTotals {
    pub fn from_lines(lines: &[StockMovementLine]) -> Self {
        Self {
            line_count: lines.len(),
            qty_base_total: lines.iter().map(|l| l.qty_base).sum(),
            value_total: lines.iter().filter_map(|l| l.value_total).sum(),
        }
    }
}

/// Cabeçalho + linhas + totais, como a API devolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementDetail {
    #[serde(flatten)]
    pub movement: StockMovement,
    pub lines: Vec<StockMovementLine>,
    pub totals: MovementTotals,
}

impl MovementDetail {
    pub fn new(movement: StockMovement, lines: Vec<StockMovementLine>) -> Self {
        let totals = MovementTotals::from_lines(&lines);
        Self { movement, lines, totals }
    }
}

// --- Entradas do serviço ---

#[derive(Debug, Clone)]
pub struct NewMovementLine {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub qty: Decimal,
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub reason_id: Option<Uuid>,
    pub source_location_id: Option<Uuid>,
    pub destination_location_id: Option<Uuid>,
    pub document_ref: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub lines: Vec<NewMovementLine>,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub category_id: Option<Uuid>,
    pub base_unit_id: Uuid,
    pub sku: String,
    pub name: String,
    pub price: Option<Decimal>,
    pub min_stock: Decimal,
}

/// Reserva (ou liberação) de quantidade num par produto/local.
#[derive(Debug, Clone)]
pub struct StockReservation {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub unit_id: Uuid,
    pub qty: Decimal,
}

/// Resultado do POST: a movimentação e se ela já existia (de-duplicada).
#[derive(Debug, Clone)]
pub struct PostedMovement {
    pub detail: MovementDetail,
    pub created: bool,
}

// --- Consultas ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockPositionRow {
    pub product_id: Uuid,
    pub sku: String,
    pub product_name: String,
    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub location_id: Uuid,
    pub location_name: String,
    pub unit_symbol: String,
    pub on_hand: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
    pub cost_avg: Decimal,
    pub value_total: Decimal,
    pub min_stock: Decimal,
    pub is_below_min_stock: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StockOrderBy {
    #[default]
    ProductName,
    Sku,
    LocationName,
    OnHand,
    Available,
    CostAvg,
    ValueTotal,
    UpdatedAt,
}

impl StockOrderBy {
    /// Coluna SQL correspondente (lista fechada, nunca vem do cliente).
    pub fn column(self) -> &'static str {
        match self {
            StockOrderBy::ProductName => "p.name",
            StockOrderBy::Sku => "p.sku",
            StockOrderBy::LocationName => "l.name",
            StockOrderBy::OnHand => "sl.on_hand",
            StockOrderBy::Available => "(sl.on_hand - sl.reserved)",
            StockOrderBy::CostAvg => "sl.cost_avg",
            StockOrderBy::ValueTotal => "(sl.on_hand * sl.cost_avg)",
            StockOrderBy::UpdatedAt => "sl.updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StockPositionFilter {
    pub q: Option<String>,
    pub category_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub below_min_stock: bool,
    pub order_by: StockOrderBy,
    pub order_dir: SortDirection,
}

impl StockPositionFilter {
    /// Texto de busca normalizado (sem espaços nas pontas; vazio vira None).
    pub fn search_term(&self) -> Option<String> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MovementHistoryFilter {
    pub movement_type: Option<MovementType>,
    pub reason_id: Option<Uuid>,
    pub source_location_id: Option<Uuid>,
    pub destination_location_id: Option<Uuid>,
    /// Origem OU destino.
    pub location_id: Option<Uuid>,
    pub document_ref: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    /// Exclusivo.
    pub date_to: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub product_id: Option<Uuid>,
}

impl MovementHistoryFilter {
    /// Filtros que dependem só do cabeçalho (o de produto exige as linhas).
    pub fn matches_header(&self, m: &StockMovement) -> bool {
        self.movement_type.is_none_or(|t| m.movement_type == t)
            && self.reason_id.is_none_or(|r| m.reason_id == Some(r))
            && self.source_location_id.is_none_or(|l| m.source_location_id == Some(l))
            && self.destination_location_id.is_none_or(|l| m.destination_location_id == Some(l))
            && self.location_id.is_none_or(|l| {
                m.source_location_id == Some(l) || m.destination_location_id == Some(l)
            })
            && self.document_ref.as_deref().is_none_or(|d| m.document_ref.as_deref() == Some(d))
            && self.date_from.is_none_or(|from| m.created_at >= from)
            && self.date_to.is_none_or(|to| m.created_at < to)
            && self.created_by.as_deref().is_none_or(|c| m.created_by.as_deref() == Some(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_direction_compatibility() {
        assert!(ReasonDirection::In.accepts(MovementType::In));
        assert!(ReasonDirection::In.accepts(MovementType::Adjustment));
        assert!(!ReasonDirection::In.accepts(MovementType::Out));
        assert!(ReasonDirection::Out.accepts(MovementType::Out));
        assert!(!ReasonDirection::Out.accepts(MovementType::Adjustment));
        assert!(ReasonDirection::Both.accepts(MovementType::Out));
        assert!(ReasonDirection::Out.accepts(MovementType::Transfer));
    }

    #[test]
    fn totals_sum_only_valued_lines() {
        let movement_id = Uuid::new_v4();
        let line = |qty_base: i64, value: Option<i64>| StockMovementLine {
            id: Uuid::new_v4(),
            movement_id,
            line_no: 1,
            product_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            qty: Decimal::from(qty_base),
            qty_base: Decimal::from(qty_base),
            unit_price: None,
            value_total: value.map(Decimal::from),
        };
        let totals = MovementTotals::from_lines(&[line(4, Some(20)), line(2, None)]);
        assert_eq!(totals.line_count, 2);
        assert_eq!(totals.qty_base_total, Decimal::from(6));
        assert_eq!(totals.value_total, Decimal::from(20));
    }

    #[test]
    fn history_filter_matches_either_side_location() {
        let loc = Uuid::new_v4();
        let movement = StockMovement {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            movement_type: MovementType::Transfer,
            reason_id: None,
            source_location_id: Some(Uuid::new_v4()),
            destination_location_id: Some(loc),
            document_ref: Some("TR-1".into()),
            status: MovementStatus::Posted,
            notes: None,
            created_by: Some("ana".into()),
            created_at: Utc::now(),
        };

        let by_location = MovementHistoryFilter { location_id: Some(loc), ..Default::default() };
        assert!(by_location.matches_header(&movement));

        let wrong_type = MovementHistoryFilter { movement_type: Some(MovementType::In), ..Default::default() };
        assert!(!wrong_type.matches_header(&movement));

        let by_creator = MovementHistoryFilter { created_by: Some("bob".into()), ..Default::default() };
        assert!(!by_creator.matches_header(&movement));
    }
}
