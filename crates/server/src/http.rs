//! Single-shot adapter: one HTTP request in, one procedure call, one
//! HTTP response out.
//!
//! - CORS headers go on every response
//! - `OPTIONS` short-circuits with 204 before routing
//! - the configured prefix is stripped before matching
//! - body: empty → no input, otherwise JSON
//! - response: `{"data": ..}` on success, `{"error": ..}` otherwise,
//!   with the HTTP status mirroring the procedure status

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use sy_domain::config::CorsConfig;
use sy_domain::FieldError;
use sy_protocol::{single_shot_body, STATUS_METHOD_NOT_ALLOWED};

use crate::context::Context;
use crate::cookies::RequestCookies;
use crate::error::ProcedureError;
use crate::router::Handler;
use crate::server::RpcServer;

/// Fallback handler serving every path that is not the duplex endpoint.
pub async fn single_shot(
    State(server): State<RpcServer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut response = if method == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        dispatch(&server, uri.path(), headers, &body).await
    };
    response.headers_mut().extend(cors_headers(server.cors()));
    response
}

async fn dispatch(server: &RpcServer, raw_path: &str, headers: HeaderMap, body: &[u8]) -> Response {
    let path = strip_prefix(raw_path, server.prefix());

    let Some(matched) = server.routes().match_path(path) else {
        tracing::debug!(path = %raw_path, "no route");
        return error_response(&ProcedureError::NotFound(path.to_string()));
    };
    let handler = match matched.route.handler() {
        Handler::Unary(handler) => handler.clone(),
        Handler::Subscription(_) => {
            return error_response(&ProcedureError::classified(
                STATUS_METHOD_NOT_ALLOWED,
                "Subscriptions require the duplex transport",
            ));
        }
    };

    let input = match parse_body(body) {
        Ok(input) => input,
        Err(err) => return error_response(&err),
    };

    let cookies = Arc::new(RequestCookies::from_headers(&headers));
    let base = Context::new(path)
        .with_params(matched.params)
        .with_headers(headers)
        .with_cookies(cookies.clone());

    let result = handler.call(input, base).await;
    let mut response = json_response(result.status, result.data);

    for cookie in cookies.take_set_cookie_headers() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "dropping unrepresentable Set-Cookie header"),
        }
    }
    response
}

fn strip_prefix<'a>(path: &'a str, prefix: Option<&str>) -> &'a str {
    prefix
        .and_then(|p| path.strip_prefix(p))
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(path)
}

fn parse_body(body: &[u8]) -> Result<Option<Value>, ProcedureError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body).map(Some).map_err(|e| {
        ProcedureError::invalid("Invalid JSON body", vec![FieldError::root(e.to_string())])
    })
}

fn error_response(err: &ProcedureError) -> Response {
    json_response(err.status(), err.to_data())
}

fn json_response(status: u16, data: Value) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(single_shot_body(status, data))).into_response()
}

/// `Access-Control-*` headers for the configured options.  Unset options
/// produce no header.
pub fn cors_headers(cors: &CorsConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut put = |name: HeaderName, value: Option<String>| {
        let Some(value) = value else { return };
        match HeaderValue::from_str(&value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => tracing::warn!(header = %name, "invalid CORS header value, skipped"),
        }
    };

    put(header::ACCESS_CONTROL_ALLOW_ORIGIN, cors.origin.clone());
    put(header::ACCESS_CONTROL_ALLOW_METHODS, cors.methods.clone());
    put(header::ACCESS_CONTROL_ALLOW_HEADERS, cors.allowed_headers.clone());
    put(header::ACCESS_CONTROL_EXPOSE_HEADERS, cors.exposed_headers.clone());
    put(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        cors.credentials.then(|| "true".to_string()),
    );
    put(header::ACCESS_CONTROL_MAX_AGE, cors.max_age.map(|s| s.to_string()));
    headers
}
