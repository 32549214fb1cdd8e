// src/middleware/actor.rs

use axum::{extract::FromRequestParts, http::request::Parts};

pub const USER_ID_HEADER: &str = "x-user-id";

/// Quem está operando. Gravado como `created_by` nas movimentações.
/// A autenticação fica fora deste serviço; o gateway repassa o cabeçalho.
#[derive(Debug, Clone, Default)]
pub struct RequestActor(pub Option<String>);

impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| v.chars().take(120).collect::<String>());

        Ok(RequestActor(actor))
    }
}
