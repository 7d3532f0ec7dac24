use plaza_db::Database;
use tracing::{error, warn};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// Run a store call off the async runtime, bounded by the configured timeout.
///
/// On timeout the caller gets `StoreUnavailable`; the blocking call itself
/// cannot be cancelled and may still complete.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let app = state.clone();
    let task = tokio::task::spawn_blocking(move || f(&app.db));

    match tokio::time::timeout(state.store_timeout, task).await {
        Err(_) => {
            warn!("Store call exceeded {:?}", state.store_timeout);
            Err(ApiError::StoreUnavailable)
        }
        Ok(Err(e)) => {
            error!("spawn_blocking join error: {}", e);
            Err(ApiError::Internal(e.into()))
        }
        Ok(Ok(result)) => result.map_err(ApiError::Internal),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use plaza_auth::AuthGate;
    use plaza_gateway::dispatcher::Dispatcher;

    use super::*;
    use crate::auth::AppStateInner;

    fn state(store_timeout: Duration) -> AppState {
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            gate: AuthGate::new("test-secret", chrono::Duration::hours(1)),
            dispatcher: Dispatcher::new(),
            store_timeout,
        })
    }

    #[tokio::test]
    async fn slow_store_call_is_unavailable() {
        let state = state(Duration::from_millis(1));
        let result = blocking(&state, |_| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, ApiError::StoreUnavailable));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn store_errors_are_internal() {
        let state = state(Duration::from_secs(5));
        let result: ApiResult<()> = blocking(&state, |_| anyhow::bail!("disk on fire")).await;
        assert_eq!(
            result.unwrap_err().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
