// src/handlers/inventory.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    common::{
        error::{ApiError, AppError},
        pagination::{Page, PageRequest},
    },
    config::AppState,
    middleware::{actor::RequestActor, i18n::Locale, tenancy::TenantContext},
    models::inventory::{
        MovementDetail, MovementHistoryFilter, MovementStatus, MovementType, NewMovement, NewMovementLine,
        SortDirection, StockLevel, StockMovement, StockOrderBy, StockPositionFilter, StockPositionRow,
        StockReservation,
    },
};

fn validate_positive(val: &Decimal) -> Result<(), ValidationError> {
    if *val <= Decimal::ZERO {
        let mut err = ValidationError::new("range");
        err.message = Some("O valor deve ser maior que zero.".into());
        return Err(err);
    }
    Ok(())
}

// ---
// Payload: CreateMovementPayload
// ---
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementLinePayload {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    /// Na unidade `unitId`. Negativa só em ajustes.
    #[schema(example = 10)]
    pub qty: Decimal,
    /// Custo por unidade base.
    #[schema(example = 5.5)]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateMovementPayload {
    pub movement_type: MovementType,
    pub reason_id: Option<Uuid>,
    pub source_location_id: Option<Uuid>,
    pub destination_location_id: Option<Uuid>,

    /// Chave de idempotência: repetir o mesmo documento devolve a movimentação original.
    #[validate(length(max = 120, message = "O documento deve ter no máximo 120 caracteres."))]
    #[schema(example = "NF-000123")]
    pub document_ref: Option<String>,

    #[validate(length(max = 1000, message = "As observações devem ter no máximo 1000 caracteres."))]
    pub notes: Option<String>,

    #[serde(default)]
    pub lines: Vec<MovementLinePayload>,
}

impl CreateMovementPayload {
    fn into_movement(self, created_by: Option<String>) -> NewMovement {
        NewMovement {
            movement_type: self.movement_type,
            reason_id: self.reason_id,
            source_location_id: self.source_location_id,
            destination_location_id: self.destination_location_id,
            document_ref: self.document_ref,
            notes: self.notes,
            created_by,
            lines: self
                .lines
                .into_iter()
                .map(|l| NewMovementLine {
                    product_id: l.product_id,
                    unit_id: l.unit_id,
                    qty: l.qty,
                    unit_price: l.unit_price,
                })
                .collect(),
        }
    }
}

// POST /api/inventory/movements
#[utoipa::path(
    post,
    path = "/api/inventory/movements",
    tag = "Inventory",
    request_body = CreateMovementPayload,
    responses(
        (status = 201, description = "Movimentação registrada", body = MovementDetail),
        (status = 200, description = "Documento já registrado: devolve a movimentação original", body = MovementDetail),
        (status = 404, description = "Produto, unidade, local ou motivo inexistente"),
        (status = 422, description = "Estoque insuficiente"),
        (status = 503, description = "Módulo de estoque desabilitado")
    ),
    params(
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja"),
        ("x-user-id" = Option<String>, Header, description = "Operador")
    )
)]
pub async fn create_movement(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    actor: RequestActor,
    Json(payload): Json<CreateMovementPayload>,
) -> Result<impl IntoResponse, ApiError> {

    payload.validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let posted = app_state
        .inventory_service
        .post_movement(tenant.0, payload.into_movement(actor.0))
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    let status = if posted.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(posted.detail)))
}

// ---
// Query: histórico de movimentações
// ---
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MovementHistoryQuery {
    pub movement_type: Option<MovementType>,
    pub reason_id: Option<Uuid>,
    pub source_location_id: Option<Uuid>,
    pub destination_location_id: Option<Uuid>,
    /// Origem ou destino
    pub location_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub document_ref: Option<String>,
    pub created_by: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    /// Exclusivo
    pub date_to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl MovementHistoryQuery {
    fn split(self) -> (MovementHistoryFilter, PageRequest) {
        let page = PageRequest::new(self.page, self.page_size);
        let filter = MovementHistoryFilter {
            movement_type: self.movement_type,
            reason_id: self.reason_id,
            source_location_id: self.source_location_id,
            destination_location_id: self.destination_location_id,
            location_id: self.location_id,
            document_ref: self.document_ref.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            date_from: self.date_from,
            date_to: self.date_to,
            created_by: self.created_by.filter(|c| !c.trim().is_empty()),
            product_id: self.product_id,
        };
        (filter, page)
    }
}

// GET /api/inventory/movements
#[utoipa::path(
    get,
    path = "/api/inventory/movements",
    tag = "Inventory",
    params(
        MovementHistoryQuery,
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja")
    ),
    responses(
        (status = 200, description = "Histórico paginado, mais recentes primeiro", body = Page<StockMovement>)
    )
)]
pub async fn list_movements(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Query(query): Query<MovementHistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {

    let (filter, page) = query.split();

    let movements = app_state
        .inventory_service
        .movement_history(tenant.0, &filter, page)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(movements)))
}

// GET /api/inventory/movements/{id}
#[utoipa::path(
    get,
    path = "/api/inventory/movements/{id}",
    tag = "Inventory",
    params(
        ("id" = Uuid, Path, description = "ID da Movimentação"),
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja")
    ),
    responses(
        (status = 200, description = "Cabeçalho, linhas e totais", body = MovementDetail),
        (status = 404, description = "Movimentação não encontrada")
    )
)]
pub async fn get_movement(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {

    let detail = app_state
        .inventory_service
        .get_movement(tenant.0, id)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(detail)))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMovementPayload {
    pub status: Option<MovementStatus>,
    #[validate(length(max = 1000, message = "As observações devem ter no máximo 1000 caracteres."))]
    pub notes: Option<String>,
}

// PATCH /api/inventory/movements/{id}
#[utoipa::path(
    patch,
    path = "/api/inventory/movements/{id}",
    tag = "Inventory",
    request_body = UpdateMovementPayload,
    params(
        ("id" = Uuid, Path, description = "ID da Movimentação"),
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja")
    ),
    responses(
        (status = 200, description = "Status/observações atualizados", body = StockMovement),
        (status = 404, description = "Movimentação não encontrada")
    )
)]
pub async fn update_movement(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateMovementPayload>,
) -> Result<impl IntoResponse, ApiError> {

    payload.validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let movement = app_state
        .inventory_service
        .update_movement(tenant.0, id, payload.status, payload.notes.as_deref())
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(movement)))
}

// ---
// Query: posição de estoque
// ---
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StockPositionQuery {
    /// Busca por nome ou SKU
    pub q: Option<String>,
    pub category_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub below_min_stock: Option<bool>,
    #[param(inline)]
    pub order_by: Option<StockOrderBy>,
    #[param(inline)]
    pub order_dir: Option<SortDirection>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl StockPositionQuery {
    fn split(self) -> (StockPositionFilter, PageRequest) {
        let page = PageRequest::new(self.page, self.page_size);
        let filter = StockPositionFilter {
            q: self.q,
            category_id: self.category_id,
            location_id: self.location_id,
            below_min_stock: self.below_min_stock.unwrap_or(false),
            order_by: self.order_by.unwrap_or_default(),
            order_dir: self.order_dir.unwrap_or_default(),
        };
        (filter, page)
    }
}

// GET /api/inventory/stock-position
#[utoipa::path(
    get,
    path = "/api/inventory/stock-position",
    tag = "Inventory",
    params(
        StockPositionQuery,
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja")
    ),
    responses(
        (status = 200, description = "Saldos por produto e local", body = Page<StockPositionRow>)
    )
)]
pub async fn get_stock_position(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Query(query): Query<StockPositionQuery>,
) -> Result<impl IntoResponse, ApiError> {

    let (filter, page) = query.split();

    let position = app_state
        .inventory_service
        .stock_position(tenant.0, &filter, page)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(position)))
}

// ---
// Payload: reservas
// ---
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPayload {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub unit_id: Uuid,
    #[validate(custom(function = "validate_positive"))]
    #[schema(example = 2)]
    pub qty: Decimal,
}

impl From<ReservationPayload> for StockReservation {
    fn from(p: ReservationPayload) -> Self {
        StockReservation { product_id: p.product_id, location_id: p.location_id, unit_id: p.unit_id, qty: p.qty }
    }
}

// POST /api/inventory/reservations
#[utoipa::path(
    post,
    path = "/api/inventory/reservations",
    tag = "Inventory",
    request_body = ReservationPayload,
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses(
        (status = 200, description = "Saldo após a reserva", body = StockLevel),
        (status = 422, description = "Disponível insuficiente")
    )
)]
pub async fn reserve_stock(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Json(payload): Json<ReservationPayload>,
) -> Result<impl IntoResponse, ApiError> {

    payload.validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let level = app_state
        .inventory_service
        .reserve_stock(tenant.0, payload.into())
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(level)))
}

// POST /api/inventory/reservations/release
#[utoipa::path(
    post,
    path = "/api/inventory/reservations/release",
    tag = "Inventory",
    request_body = ReservationPayload,
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses(
        (status = 200, description = "Saldo após a liberação", body = StockLevel),
        (status = 400, description = "Liberação maior que o reservado")
    )
)]
pub async fn release_stock(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Json(payload): Json<ReservationPayload>,
) -> Result<impl IntoResponse, ApiError> {

    payload.validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let level = app_state
        .inventory_service
        .release_stock(tenant.0, payload.into())
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(level)))
}
