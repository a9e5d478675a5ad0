use actix_web::HttpResponse;
use anyhow::{Context, Result};
use log::error;
use reqwest::Client;

/// Create the HTTP client used for outbound reachability checks
///
/// Per-request timeouts are set by the caller.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .build()
        .context("failed to create HTTP client")
}

/// Trait for converting service results into HTTP responses
pub trait ServiceResultResponse {
    fn into_response(self) -> HttpResponse;
}

impl ServiceResultResponse for crate::api::StatusResponse {
    fn into_response(self) -> HttpResponse {
        match serde_json::to_string(&self) {
            Ok(json) => HttpResponse::Ok()
                .content_type("application/json")
                .body(json),
            Err(e) => {
                error!("failed to serialize StatusResponse: {e:#}");
                HttpResponse::InternalServerError().body("failed to serialize response")
            }
        }
    }
}

/// Convert a service result into a response
///
/// Successful data is rendered through [`ServiceResultResponse`], errors are
/// logged with `operation` and answered with 500.
pub fn handle_service_result<T>(result: Result<T>, operation: &str) -> HttpResponse
where
    T: ServiceResultResponse,
{
    match result {
        Ok(data) => data.into_response(),
        Err(e) => {
            error!("{operation} failed: {e:#}");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}
