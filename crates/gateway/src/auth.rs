use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::{
    error::{ApiError, AuthFailure},
    state::GatewayState,
};

const BEARER_PREFIX: &str = "Bearer ";

/// Resolve the key forwarded to the agent.
///
/// A present header must be `Bearer <key>`. Without a header the configured
/// fallback key is used, if any.
pub fn resolve_api_key(
    header: Option<&str>,
    fallback: Option<&str>,
) -> Result<String, AuthFailure> {
    match header.filter(|h| !h.is_empty()) {
        Some(value) => {
            let token = value
                .strip_prefix(BEARER_PREFIX)
                .ok_or(AuthFailure::NotBearer)?
                .trim();
            if token.is_empty() {
                return Err(AuthFailure::EmptyToken);
            }
            Ok(token.to_string())
        },
        None => fallback
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .ok_or(AuthFailure::Missing),
    }
}

/// Extractor yielding the caller's agent API key.
#[derive(Debug, Clone)]
pub struct ApiKey(pub String);

impl FromRequestParts<Arc<GatewayState>> for ApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let header = match parts.headers.get(AUTHORIZATION) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| ApiError::Unauthorized(AuthFailure::NotBearer))?,
            ),
            None => None,
        };
        resolve_api_key(header, state.config.server.api_key.as_deref())
            .map(Self)
            .map_err(ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(Some("Bearer sk-123"), None, Ok("sk-123"))]
    #[case(Some("Bearer sk-123"), Some("fallback"), Ok("sk-123"))]
    #[case(None, Some("fallback"), Ok("fallback"))]
    #[case(Some(""), Some("fallback"), Ok("fallback"))]
    #[case(None, None, Err(AuthFailure::Missing))]
    #[case(None, Some(""), Err(AuthFailure::Missing))]
    #[case(Some("Basic dXNlcg=="), Some("fallback"), Err(AuthFailure::NotBearer))]
    #[case(Some("bearer sk-123"), None, Err(AuthFailure::NotBearer))]
    #[case(Some("Bearer   "), None, Err(AuthFailure::EmptyToken))]
    fn resolves_key(
        #[case] header: Option<&str>,
        #[case] fallback: Option<&str>,
        #[case] expected: Result<&str, AuthFailure>,
    ) {
        assert_eq!(
            resolve_api_key(header, fallback),
            expected.map(str::to_string)
        );
    }
}
