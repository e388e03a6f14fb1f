/// Presented refresh token extraction
///
/// Looks for the configured parameter in the query string first, then in a
/// JSON request body. Empty values are treated as absent.

use actix_web::{web, HttpMessage, HttpRequest};
use serde_json::Value;
use std::collections::HashMap;

use super::coordinator::{Payload, RefreshLifecycleCoordinator};
use super::identity::Principal;
use crate::error::AppError;

pub fn extract_refresh_token(req: &HttpRequest, body: &[u8], parameter_name: &str) -> Option<String> {
    from_query(req, parameter_name).or_else(|| from_json_body(req, body, parameter_name))
}

fn from_query(req: &HttpRequest, parameter_name: &str) -> Option<String> {
    let query = web::Query::<HashMap<String, String>>::from_query(req.query_string()).ok()?;
    query
        .get(parameter_name)
        .filter(|value| !value.is_empty())
        .cloned()
}

fn from_json_body(req: &HttpRequest, body: &[u8], parameter_name: &str) -> Option<String> {
    if body.is_empty() || !is_json(req.content_type()) {
        return None;
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(value) => value
            .get(parameter_name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        Err(e) => {
            tracing::debug!(error = %e, "Request body is not valid JSON");
            None
        }
    }
}

fn is_json(content_type: &str) -> bool {
    content_type == "application/json" || content_type.ends_with("+json")
}

/// Glue for login handlers: extracts the presented token from the request and
/// runs the coordinator with it.
pub async fn attach_refresh_token<U>(
    coordinator: &RefreshLifecycleCoordinator<U>,
    req: &HttpRequest,
    body: &[u8],
    principal: &Principal<U>,
    payload: Payload,
) -> Result<Payload, AppError> {
    let presented = extract_refresh_token(req, body, &coordinator.settings().token_parameter_name);
    coordinator
        .handle_authentication_success(principal, presented.as_deref(), payload)
        .await
}
