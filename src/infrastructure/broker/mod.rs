pub mod auth_client;
pub mod http_adapter;

pub use auth_client::BrokerAuthClient;
pub use http_adapter::HttpBrokerAdapter;

use crate::domain::errors::ServiceError;

/// Map a transport failure from the middleware stack into the adapter
/// error surface. Timeouts and connect failures are classified so the
/// circuit breaker can count them.
pub(crate) fn map_transport_error(e: reqwest_middleware::Error, elapsed_ms: u64) -> ServiceError {
    match &e {
        reqwest_middleware::Error::Reqwest(re) if re.is_timeout() => {
            ServiceError::Timeout { elapsed_ms }
        }
        reqwest_middleware::Error::Reqwest(re) if re.is_connect() => ServiceError::Connection {
            reason: re.to_string(),
        },
        _ => ServiceError::Connection {
            reason: e.to_string(),
        },
    }
}

/// Read a non-success response into `ServiceError::Remote`, preserving the
/// body for diagnostics.
pub(crate) async fn remote_error(response: reqwest::Response) -> ServiceError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    ServiceError::Remote { status, message }
}
