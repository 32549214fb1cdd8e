// src/handlers/catalog.rs

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::{i18n::Locale, tenancy::TenantContext},
    models::inventory::{Category, Location, MovementReason, NewProduct, Product, ReasonDirection, Unit},
};

fn validate_not_negative(val: &Decimal) -> Result<(), ValidationError> {
    if val.is_sign_negative() {
        let mut err = ValidationError::new("range");
        err.add_param("min".into(), &0.0);
        err.message = Some("O valor não pode ser negativo.".into());
        return Err(err);
    }
    Ok(())
}

// ---
// Unidades
// ---
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUnitPayload {
    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub name: String,
    #[validate(length(min = 1, max = 16, message = "O símbolo deve ter entre 1 e 16 caracteres."))]
    pub symbol: String,
    #[schema(example = 12)]
    pub factor_to_base: Decimal,
}

#[utoipa::path(
    post,
    path = "/api/inventory/units",
    tag = "Inventory Catalog",
    request_body = CreateUnitPayload,
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses(
        (status = 201, description = "Unidade criada", body = Unit),
        (status = 409, description = "Símbolo já existe")
    )
)]
pub async fn create_unit(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Json(payload): Json<CreateUnitPayload>,
) -> Result<impl IntoResponse, ApiError> {

    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let unit = app_state
        .inventory_service
        .create_unit(tenant.0, &payload.name, &payload.symbol, payload.factor_to_base)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::CREATED, Json(unit)))
}

#[utoipa::path(
    get,
    path = "/api/inventory/units",
    tag = "Inventory Catalog",
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses((status = 200, description = "Lista do catálogo", body = Vec<Unit>))
)]
pub async fn list_units(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
) -> Result<impl IntoResponse, ApiError> {

    let units = app_state
        .inventory_service
        .list_units(tenant.0)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(units)))
}

// ---
// Categorias
// ---
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCategoryPayload {
    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub name: String,
}

#[utoipa::path(
    post,
    path = "/api/inventory/categories",
    tag = "Inventory Catalog",
    request_body = CreateCategoryPayload,
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses((status = 201, description = "Categoria criada", body = Category))
)]
pub async fn create_category(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Json(payload): Json<CreateCategoryPayload>,
) -> Result<impl IntoResponse, ApiError> {

    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let category = app_state
        .inventory_service
        .create_category(tenant.0, &payload.name)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::CREATED, Json(category)))
}

#[utoipa::path(
    get,
    path = "/api/inventory/categories",
    tag = "Inventory Catalog",
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses((status = 200, description = "Lista do catálogo", body = Vec<Category>))
)]
pub async fn list_categories(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
) -> Result<impl IntoResponse, ApiError> {

    let categories = app_state
        .inventory_service
        .list_categories(tenant.0)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(categories)))
}

// ---
// Produtos
// ---
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductPayload {
    pub category_id: Option<Uuid>,
    pub base_unit_id: Uuid,

    #[validate(length(min = 1, message = "O SKU é obrigatório."))]
    pub sku: String,

    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub name: String,

    pub price: Option<Decimal>,

    #[validate(custom(function = "validate_not_negative"))]
    #[serde(default)]
    pub min_stock: Decimal,
}

#[utoipa::path(
    post,
    path = "/api/inventory/products",
    tag = "Inventory Catalog",
    request_body = CreateProductPayload,
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses(
        (status = 201, description = "Produto criado", body = Product),
        (status = 404, description = "Unidade base ou categoria inexistente"),
        (status = 409, description = "SKU já existe")
    )
)]
pub async fn create_product(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Json(payload): Json<CreateProductPayload>,
) -> Result<impl IntoResponse, ApiError> {

    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let product = app_state
        .inventory_service
        .create_product(
            tenant.0,
            NewProduct {
                category_id: payload.category_id,
                base_unit_id: payload.base_unit_id,
                sku: payload.sku.trim().to_string(),
                name: payload.name.trim().to_string(),
                price: payload.price,
                min_stock: payload.min_stock,
            },
        )
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::CREATED, Json(product)))
}

#[utoipa::path(
    get,
    path = "/api/inventory/products",
    tag = "Inventory Catalog",
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses((status = 200, description = "Lista do catálogo", body = Vec<Product>))
)]
pub async fn list_products(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
) -> Result<impl IntoResponse, ApiError> {

    let products = app_state
        .inventory_service
        .list_products(tenant.0)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(products)))
}

// ---
// Locais
// ---
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateLocationPayload {
    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub name: String,
}

#[utoipa::path(
    post,
    path = "/api/inventory/locations",
    tag = "Inventory Catalog",
    request_body = CreateLocationPayload,
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses((status = 201, description = "Local criado", body = Location))
)]
pub async fn create_location(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Json(payload): Json<CreateLocationPayload>,
) -> Result<impl IntoResponse, ApiError> {

    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let location = app_state
        .inventory_service
        .create_location(tenant.0, &payload.name)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::CREATED, Json(location)))
}

#[utoipa::path(
    get,
    path = "/api/inventory/locations",
    tag = "Inventory Catalog",
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses((status = 200, description = "Lista do catálogo", body = Vec<Location>))
)]
pub async fn list_locations(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
) -> Result<impl IntoResponse, ApiError> {

    let locations = app_state
        .inventory_service
        .list_locations(tenant.0)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(locations)))
}

// ---
// Motivos de movimentação
// ---
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateReasonPayload {
    #[validate(length(min = 1, max = 40, message = "O código deve ter entre 1 e 40 caracteres."))]
    #[schema(example = "QUEBRA")]
    pub code: String,
    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub name: String,
    pub direction: ReasonDirection,
}

#[utoipa::path(
    post,
    path = "/api/inventory/reasons",
    tag = "Inventory Catalog",
    request_body = CreateReasonPayload,
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses(
        (status = 201, description = "Motivo criado", body = MovementReason),
        (status = 409, description = "Código já existe")
    )
)]
pub async fn create_reason(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    Json(payload): Json<CreateReasonPayload>,
) -> Result<impl IntoResponse, ApiError> {

    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let reason = app_state
        .inventory_service
        .create_reason(tenant.0, &payload.code, &payload.name, payload.direction)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::CREATED, Json(reason)))
}

#[utoipa::path(
    get,
    path = "/api/inventory/reasons",
    tag = "Inventory Catalog",
    params(("x-tenant-id" = Uuid, Header, description = "ID da Loja")),
    responses((status = 200, description = "Lista do catálogo", body = Vec<MovementReason>))
)]
pub async fn list_reasons(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
) -> Result<impl IntoResponse, ApiError> {

    let reasons = app_state
        .inventory_service
        .list_reasons(tenant.0)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(reasons)))
}
