//! # Request Router
//!
//! Turns an inbound HTTP request into a `DispatchRequest`, hands it to the shared
//! work queue over a `oneshot` channel, and turns the worker's answer back into an
//! `axum::response::Response`. The dispatch itself — prefix matching, static file
//! serving, the `default` fallback, 404 — runs on the worker thread, not the
//! Tokio task handling the connection, so a slow plugin cannot stall the async
//! runtime.

use crate::manager::PluginManager;
use crate::queue::DispatchRequest;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tokio::sync::oneshot;

/// What a plugin's `handle_request` (or the static file path) produced.
pub struct RouteResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl RouteResponse {
    fn not_found() -> RouteResponse {
        RouteResponse {
            status: 404,
            body: b"Not Found 404".to_vec(),
            headers: vec![],
        }
    }
}

impl IntoResponse for RouteResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = Response::builder().status(status);
        for (key, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                response = response.header(name, value);
            }
        }
        response.body(axum::body::Body::from(self.body)).unwrap()
    }
}

/// axum handler: collects the body (subject to `max_body_size`, enforced by
/// `tower_http::limit::RequestBodyLimitLayer` upstream), submits dispatch to the
/// shared work queue, and awaits the worker's answer.
pub async fn dispatch(
    State(manager): State<Arc<PluginManager>>,
    method: Method,
    uri: axum::http::Uri,
    body: Bytes,
) -> Response {
    let (tx, rx) = oneshot::channel();
    let submitted = manager.job_queue.put_dispatch(DispatchRequest {
        url: uri.path().to_string(),
        method: method.as_str().to_uppercase(),
        body: body.to_vec(),
        reply: tx,
    });

    if !submitted {
        return RouteResponse {
            status: 503,
            body: b"Service Unavailable".to_vec(),
            headers: vec![],
        }
        .into_response();
    }

    match rx.await {
        Ok(response) => response.into_response(),
        Err(_) => RouteResponse {
            status: 500,
            body: b"dispatch worker dropped the response channel".to_vec(),
            headers: vec![],
        }
        .into_response(),
    }
}

/// The URL-dispatch algorithm from spec.md §4.8, run on a worker thread:
/// prefix-match a plugin (skipping `default`), try its `static/` directory, then
/// its `handle_request`; otherwise fall back to `default`; otherwise 404.
pub fn route_request(
    manager: &PluginManager,
    url: String,
    method: String,
    body: Vec<u8>,
) -> RouteResponse {
    let _guard = manager.dispatch_guard();

    for plugin in manager.all_plugins() {
        if plugin.name == "default" {
            continue;
        }
        let prefix = format!("/{}", plugin.name);
        let Some(rest) = url.strip_prefix(&prefix) else {
            continue;
        };
        if !rest.is_empty() && !rest.starts_with('/') {
            continue;
        }

        if let Some(static_path) = rest.strip_prefix("/static/") {
            if let Some(response) = serve_static(&plugin, static_path) {
                return response;
            }
        }

        let sub_url = if rest.is_empty() { "/" } else { rest };
        if let Some(response) = invoke_handler(&plugin, sub_url, &method, &body) {
            return response;
        }
    }

    if let Some(plugin) = manager.find_plugin("default") {
        if let Some(response) = invoke_handler(&plugin, &url, &method, &body) {
            return response;
        }
    }

    RouteResponse::not_found()
}

fn serve_static(plugin: &crate::plugin::Plugin, rel_path: &str) -> Option<RouteResponse> {
    if rel_path.contains("..") {
        return None;
    }
    let path = plugin.path.join("static").join(rel_path);
    let bytes = std::fs::read(&path).ok()?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Some(RouteResponse {
        status: 200,
        body: bytes,
        headers: vec![("Content-Type".to_string(), mime.to_string())],
    })
}

fn invoke_handler(
    plugin: &crate::plugin::Plugin,
    sub_url: &str,
    method: &str,
    body: &[u8],
) -> Option<RouteResponse> {
    let req_value = serde_json::json!({
        "url": sub_url,
        "method": method,
        "body": String::from_utf8_lossy(body),
    });

    match plugin.call_function("handle_request", req_value) {
        Ok(result) => Some(json_to_route_response(&result)),
        Err(e) => {
            tracing::warn!(plugin = %plugin.name, error = %e, "handle_request failed");
            None
        }
    }
}

/// A handler's return value is either the `{status, body, headers}` shape
/// `core`'s response builder produces, a bare string (rendered as `text/html`,
/// matching the "returns `hi`" end-to-end scenario), or any other JSON value
/// (re-encoded as the body, `application/json`) — for a handler that just
/// returns a Lua table of data without going through `core` at all.
fn json_to_route_response(value: &serde_json::Value) -> RouteResponse {
    if let Some(obj) = value.as_object() {
        if obj.contains_key("status") && obj.contains_key("body") {
            let status = obj.get("status").and_then(|v| v.as_u64()).unwrap_or(200) as u16;
            let body = obj
                .get("body")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .as_bytes()
                .to_vec();
            let headers = obj
                .get("headers")
                .and_then(|v| v.as_object())
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            return RouteResponse {
                status,
                body,
                headers,
            };
        }
    }

    if let Some(s) = value.as_str() {
        return RouteResponse {
            status: 200,
            body: s.as_bytes().to_vec(),
            headers: vec![("Content-Type".to_string(), "text/html".to_string())],
        };
    }

    RouteResponse {
        status: 200,
        body: serde_json::to_vec(value).unwrap_or_default(),
        headers: vec![(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use std::sync::Arc;

    fn manager() -> Arc<PluginManager> {
        PluginManager::new(&RuntimeConfig {
            plugins_dir: "/nonexistent".into(),
            worker_count: 1,
            max_recursion_depth: 10,
        })
    }

    #[test]
    fn missing_plugin_and_missing_default_is_404() {
        let manager = manager();
        let response = route_request(&manager, "/nope".into(), "GET".into(), vec![]);
        assert_eq!(response.status, 404);
        assert_eq!(response.body, b"Not Found 404");
    }

    #[test]
    fn json_route_response_defaults_status_to_200() {
        let response = json_to_route_response(&serde_json::json!({"status": 200, "body": "hi"}));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hi");
    }

    #[test]
    fn bare_string_result_is_html_body() {
        let response = json_to_route_response(&serde_json::json!("hi"));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hi");
        assert_eq!(
            response.headers,
            vec![("Content-Type".to_string(), "text/html".to_string())]
        );
    }

    #[test]
    fn bare_object_result_is_json_encoded() {
        let response = json_to_route_response(&serde_json::json!({"a": "1", "b": "two words"}));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"a":"1","b":"two words"}"#);
        assert_eq!(
            response.headers,
            vec![("Content-Type".to_string(), "application/json".to_string())]
        );
    }
}
