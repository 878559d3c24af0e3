use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

/// Claims read from a caller's access token. Tokens are issued elsewhere;
/// either `sub` or `userId` carries the owning account id.
#[derive(Debug, Deserialize)]
pub struct AccessClaims {
    pub sub: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub exp: usize,
}

/// HS256 access token verification.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: Arc<DecodingKey>,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims = ["exp".to_string()].into_iter().collect();

        Self {
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation,
        }
    }

    /// Verify `token` and return the owning account id.
    pub fn verify(&self, token: &str) -> Result<Uuid, AppError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)?;

        let subject = data
            .claims
            .sub
            .or(data.claims.user_id)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Token carries no subject")))?;

        Uuid::parse_str(&subject)
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Token subject is not an account id")))
    }
}

/// Authenticated owner of the invoices a request operates on.
///
/// Extracted from `Authorization: Bearer <token>`; every owned route takes
/// this so an invoice of another account is indistinguishable from a
/// missing one.
#[derive(Debug, Clone, Copy)]
pub struct OwnerContext(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for OwnerContext
where
    S: AsRef<TokenVerifier> + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
            })?;

        let owner_id = state.as_ref().verify(token.trim())?;

        tracing::Span::current().record("owner_id", tracing::field::display(owner_id));

        Ok(OwnerContext(owner_id))
    }
}
