use reqwest::StatusCode;
use thiserror::Error;

use plaza_types::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The server rejected the request body.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Token missing, invalid or expired. Callers should log out.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Timeout, connection failure or a 503. Safe to retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub(crate) fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::BAD_REQUEST => ClientError::Rejected(message),
            StatusCode::UNAUTHORIZED => ClientError::Unauthenticated(message),
            StatusCode::FORBIDDEN => ClientError::Forbidden(message),
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                ClientError::StoreUnavailable(message)
            }
            _ => ClientError::Server {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ClientError::from_status(status, e.to_string())
        } else {
            // Timeouts, refused connections and broken bodies are all transport failures
            ClientError::StoreUnavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (StatusCode::BAD_REQUEST, ClientError::Rejected("m".into())),
            (StatusCode::UNAUTHORIZED, ClientError::Unauthenticated("m".into())),
            (StatusCode::FORBIDDEN, ClientError::Forbidden("m".into())),
            (StatusCode::NOT_FOUND, ClientError::NotFound("m".into())),
            (StatusCode::SERVICE_UNAVAILABLE, ClientError::StoreUnavailable("m".into())),
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ClientError::Server {
                    status: 500,
                    message: "m".into(),
                },
            ),
        ];
        for (status, expected) in cases {
            assert_eq!(ClientError::from_status(status, "m".into()), expected);
        }
    }
}
