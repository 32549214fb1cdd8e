// src/middleware/tenancy.rs

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use uuid::Uuid;

use crate::common::error::ApiError;
use crate::middleware::i18n::Locale;

// Cabeçalho que identifica a loja/evento dona dos dados.
// É também o "escopo" da de-duplicação por document_ref.
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone, Copy)]
pub struct TenantContext(pub Uuid);

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let locale = Locale::from_request_parts(parts, state).await.unwrap_or_default();
        let english = locale.is_english();

        let bad_request = |pt: &str, en: &str| ApiError {
            status: StatusCode::BAD_REQUEST,
            error: if english { en.to_string() } else { pt.to_string() },
            details: None,
        };

        let value = parts.headers.get(TENANT_ID_HEADER).ok_or_else(|| {
            bad_request(
                "O cabeçalho X-Tenant-ID é obrigatório.",
                "The X-Tenant-ID header is required.",
            )
        })?;

        let value_str = value.to_str().map_err(|_| {
            bad_request(
                "Cabeçalho X-Tenant-ID contém caracteres inválidos.",
                "The X-Tenant-ID header contains invalid characters.",
            )
        })?;

        let tenant_id = Uuid::parse_str(value_str.trim()).map_err(|_| {
            bad_request(
                "Cabeçalho X-Tenant-ID inválido (não é um UUID).",
                "Invalid X-Tenant-ID header (not a UUID).",
            )
        })?;

        Ok(TenantContext(tenant_id))
    }
}
