// src/routes.rs

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{config::AppState, docs::ApiDoc, handlers};

/// Monta o router completo. Separado do `main` para os testes HTTP.
pub fn app_router(app_state: AppState) -> Router {
    let inventory_routes = Router::new()
        .route("/movements"
               ,post(handlers::inventory::create_movement)
               .get(handlers::inventory::list_movements)
        )
        .route("/movements/{id}"
               ,get(handlers::inventory::get_movement)
               .patch(handlers::inventory::update_movement)
        )
        .route("/stock-position", get(handlers::inventory::get_stock_position))
        .route("/reservations", post(handlers::inventory::reserve_stock))
        .route("/reservations/release", post(handlers::inventory::release_stock))

        // Catálogo
        .route("/units"
               ,post(handlers::catalog::create_unit)
               .get(handlers::catalog::list_units)
        )
        .route("/categories"
               ,post(handlers::catalog::create_category)
               .get(handlers::catalog::list_categories)
        )
        .route("/products"
               ,post(handlers::catalog::create_product)
               .get(handlers::catalog::list_products)
        )
        .route("/locations"
               ,post(handlers::catalog::create_location)
               .get(handlers::catalog::list_locations)
        )
        .route("/reasons"
               ,post(handlers::catalog::create_reason)
               .get(handlers::catalog::list_reasons)
        );

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/api/health", get(|| async { "OK" }))
        .nest("/api/inventory", inventory_routes)
        .with_state(app_state)
}
