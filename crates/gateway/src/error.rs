use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    relaygate_agent::RelayError,
    relaygate_chat::ChatError,
    serde_json::json,
    tracing::{error, warn},
};

/// Every failure an HTTP handler can answer with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{}", .0.message())]
    Unauthorized(AuthFailure),
    #[error("model '{0}' is not available")]
    ModelNotFound(String),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Why a request carried no usable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    NotBearer,
    EmptyToken,
}

impl AuthFailure {
    pub fn message(self) -> &'static str {
        match self {
            Self::Missing => "Missing authentication header",
            Self::NotBearer => "Invalid authentication header",
            Self::EmptyToken => "Empty bearer token",
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::Chat(ChatError::EmptyMessages) => StatusCode::BAD_REQUEST,
            Self::Chat(ChatError::Relay(e)) => match e {
                RelayError::Spawn { .. } => StatusCode::SERVICE_UNAVAILABLE,
                RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                RelayError::Execution { .. }
                | RelayError::MissingSessionId
                | RelayError::Stream(_) => StatusCode::BAD_GATEWAY,
                RelayError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Chat(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the body's `error.type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) | Self::ModelNotFound(_) => "invalid_request_error",
            Self::Unauthorized(_) => "authentication_error",
            Self::Chat(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), kind = self.kind(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), kind = self.kind(), error = %self, "request rejected");
        }
        (
            status,
            Json(json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.kind(),
                }
            })),
        )
            .into_response()
    }
}
