//! Outbound HTTP policy shared by the gateway adapters: bounded timeout on
//! every call, two attempts with a short backoff. Retried creation calls are
//! idempotent on the gateway side thanks to the idempotency-key headers the
//! adapters send.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};

use crate::error::AppError;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const ATTEMPTS: u32 = 2;
const BACKOFF: Duration = Duration::from_secs(1);

pub fn client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

pub async fn send_with_retry(request: RequestBuilder) -> Result<Response, AppError> {
    for attempt in 1..=ATTEMPTS {
        let prepared = request
            .try_clone()
            .ok_or_else(|| AppError::Internal("gateway request body is not cloneable".to_string()))?;

        match prepared.send().await {
            Ok(response) if response.status().is_server_error() && attempt < ATTEMPTS => {
                tracing::warn!(
                    status = %response.status(),
                    attempt,
                    "gateway returned a server error, retrying"
                );
            }
            Ok(response) => return Ok(response),
            Err(error) if attempt < ATTEMPTS => {
                tracing::warn!(error = %error, attempt, "gateway request failed, retrying");
            }
            Err(error) => return Err(AppError::Gateway(error.to_string())),
        }

        tokio::time::sleep(BACKOFF).await;
    }

    Err(AppError::Gateway("gateway request exhausted retries".to_string()))
}

/// Reads the body of a non-success response into a gateway error, keeping the
/// raw text for the transaction's audit trail.
pub async fn error_for_response(gateway: &str, response: Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    AppError::Gateway(format!("{gateway} returned {status}: {body}"))
}
