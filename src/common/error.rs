// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::middleware::i18n::Locale;

// Erro de domínio. Os handlers convertem para ApiError (com idioma) antes de responder.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    // entity: "product", "unit", "location", "reason", "movement", "category"
    #[error("{entity} não encontrado(a): {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Requisição inválida em '{field}': {message}")]
    InvalidRequest { field: String, message: String },

    #[error("Estoque insuficiente: disponível {available}, necessário {required}")]
    InsufficientStock {
        product_id: Uuid,
        location_id: Uuid,
        available: Decimal,
        required: Decimal,
    },

    #[error("O módulo de estoque está desabilitado")]
    FeatureDisabled,

    // O banco (ou o store em memória) recusou um document_ref repetido.
    // O serviço intercepta esta variante e devolve a movimentação existente.
    #[error("Já existe uma movimentação com o documento '{0}'")]
    DuplicateDocumentRef(String),

    #[error("{0}")]
    UniqueConstraintViolation(String),

    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        AppError::NotFound { entity, id }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::InvalidRequest { field: field.into(), message: message.into() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::FeatureDisabled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DuplicateDocumentRef(_) | AppError::UniqueConstraintViolation(_) => StatusCode::CONFLICT,
            AppError::DatabaseError(_) | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Converte o erro em resposta HTTP, com a mensagem no idioma do cliente.
    pub fn to_api_error(&self, locale: &Locale) -> ApiError {
        let english = locale.is_english();
        let status = self.status();

        let (error, details) = match self {
            AppError::ValidationError(errors) => {
                let mut details = serde_json::Map::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<Value> = field_errors
                        .iter()
                        .map(|e| match &e.message {
                            Some(m) => Value::String(m.to_string()),
                            None => Value::String(e.code.to_string()),
                        })
                        .collect();
                    details.insert(field.to_string(), Value::Array(messages));
                }
                let msg = if english { "One or more fields are invalid." } else { "Um ou mais campos são inválidos." };
                (msg.to_string(), Some(Value::Object(details)))
            }
            AppError::NotFound { entity, id } => {
                let msg = if english {
                    format!("The {} '{}' was not found.", entity, id)
                } else {
                    format!("{} '{}' não encontrado(a).", entity_label_pt(entity), id)
                };
                (msg, Some(json!({ "entity": entity, "id": id })))
            }
            AppError::InvalidRequest { field, message } => {
                (message.clone(), Some(json!({ "field": field })))
            }
            AppError::InsufficientStock { product_id, location_id, available, required } => {
                let msg = if english {
                    format!("Insufficient stock: available {}, required {}.", available, required)
                } else {
                    format!("Estoque insuficiente: disponível {}, necessário {}.", available, required)
                };
                let details = json!({
                    "productId": product_id,
                    "locationId": location_id,
                    "available": available.to_string(),
                    "required": required.to_string(),
                });
                (msg, Some(details))
            }
            AppError::FeatureDisabled => {
                let msg = if english { "The inventory module is disabled." } else { "O módulo de estoque está desabilitado." };
                (msg.to_string(), None)
            }
            AppError::DuplicateDocumentRef(_) | AppError::UniqueConstraintViolation(_) => (self.to_string(), None),

            // Todos os outros erros viram 500. O detalhe só vai para o log.
            AppError::DatabaseError(e) => {
                tracing::error!("Erro de banco de dados: {:?}", e);
                (Self::unexpected(english), None)
            }
            AppError::InternalServerError(e) => {
                tracing::error!("Erro Interno do Servidor: {:?}", e);
                (Self::unexpected(english), None)
            }
        };

        ApiError { status, error, details }
    }

    fn unexpected(english: bool) -> String {
        if english { "An unexpected error occurred.".into() } else { "Ocorreu um erro inesperado.".into() }
    }
}

fn entity_label_pt(entity: &str) -> &str {
    match entity {
        "product" => "Produto",
        "unit" => "Unidade",
        "location" => "Local",
        "reason" => "Motivo",
        "movement" => "Movimentação",
        "category" => "Categoria",
        other => other,
    }
}

// ---
// ApiError: o formato que sai pela API
// ---
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.error, "details": details }),
            None => json!({ "error": self.error }),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_distinct_statuses() {
        let id = Uuid::new_v4();
        assert_eq!(AppError::not_found("product", id).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::invalid("lines", "vazio").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::FeatureDisabled.status(), StatusCode::SERVICE_UNAVAILABLE);
        let insufficient = AppError::InsufficientStock {
            product_id: id,
            location_id: id,
            available: Decimal::from(6),
            required: Decimal::from(100),
        };
        assert_eq!(insufficient.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn insufficient_stock_message_follows_locale() {
        let id = Uuid::new_v4();
        let err = AppError::InsufficientStock {
            product_id: id,
            location_id: id,
            available: Decimal::from(6),
            required: Decimal::from(100),
        };

        let pt = err.to_api_error(&Locale("pt".into()));
        assert!(pt.error.contains("disponível 6"));

        let en = err.to_api_error(&Locale("en".into()));
        assert!(en.error.contains("available 6, required 100"));
        assert_eq!(en.details.unwrap()["required"], "100");
    }

    #[test]
    fn not_found_names_the_entity() {
        let id = Uuid::new_v4();
        let pt = AppError::not_found("location", id).to_api_error(&Locale("pt".into()));
        assert!(pt.error.starts_with("Local '"));
        assert_eq!(pt.details.unwrap()["entity"], "location");
    }
}
