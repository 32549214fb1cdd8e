// src/docs.rs

use utoipa::OpenApi;
use crate::common::pagination::Page;
use crate::handlers;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- MOVIMENTAÇÕES ---
        handlers::inventory::create_movement,
        handlers::inventory::list_movements,
        handlers::inventory::get_movement,
        handlers::inventory::update_movement,
        handlers::inventory::get_stock_position,
        handlers::inventory::reserve_stock,
        handlers::inventory::release_stock,

        // --- CATÁLOGO ---
        handlers::catalog::create_unit,
        handlers::catalog::list_units,
        handlers::catalog::create_category,
        handlers::catalog::list_categories,
        handlers::catalog::create_product,
        handlers::catalog::list_products,
        handlers::catalog::create_location,
        handlers::catalog::list_locations,
        handlers::catalog::create_reason,
        handlers::catalog::list_reasons,
    ),
    components(
        schemas(
            // --- Inventory ---
            models::inventory::MovementType,
            models::inventory::ReasonDirection,
            models::inventory::MovementStatus,
            models::inventory::Unit,
            models::inventory::Category,
            models::inventory::Product,
            models::inventory::Location,
            models::inventory::MovementReason,
            models::inventory::StockLevel,
            models::inventory::StockMovement,
            models::inventory::StockMovementLine,
            models::inventory::MovementTotals,
            models::inventory::MovementDetail,
            models::inventory::StockPositionRow,
            models::inventory::StockOrderBy,
            models::inventory::SortDirection,
            Page<models::inventory::StockPositionRow>,
            Page<models::inventory::StockMovement>,

            // --- Payloads ---
            handlers::inventory::CreateMovementPayload,
            handlers::inventory::MovementLinePayload,
            handlers::inventory::UpdateMovementPayload,
            handlers::inventory::ReservationPayload,
            handlers::catalog::CreateUnitPayload,
            handlers::catalog::CreateCategoryPayload,
            handlers::catalog::CreateProductPayload,
            handlers::catalog::CreateLocationPayload,
            handlers::catalog::CreateReasonPayload,
        )
    ),
    tags(
        (name = "Inventory", description = "Movimentações, saldos e reservas"),
        (name = "Inventory Catalog", description = "Unidades, categorias, produtos, locais e motivos")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_inventory_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/inventory/movements",
            "/api/inventory/movements/{id}",
            "/api/inventory/stock-position",
            "/api/inventory/reservations",
            "/api/inventory/reservations/release",
            "/api/inventory/units",
            "/api/inventory/products",
            "/api/inventory/reasons",
        ] {
            assert!(doc.paths.paths.contains_key(path), "rota sem documentação: {path}");
        }
    }
}
