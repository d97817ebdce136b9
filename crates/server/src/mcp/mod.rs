// Agent tool endpoint: one JSON-RPC 2.0 request per POST, scoped to a project.
//
// Authentication and project access are HTTP-level failures checked before
// the body is parsed. Everything after that is answered as JSON-RPC, except
// an unknown method which is a 400 and a notification which gets a bare 202.

pub mod dispatch;

use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::{
        header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use teamdocs_common::protocol::jsonrpc::{self, RpcError};
use uuid::Uuid;

use crate::{
    auth::middleware::{require_agent_token, AgentIdentity},
    error::{ErrorCode, ServerError},
    store::Store,
};

const EVENT_STREAM: &str = "text/event-stream";

#[derive(Clone)]
pub struct McpState {
    pub store: Store,
}

pub fn router(store: Store) -> Router {
    Router::new()
        .route("/api/mcp/{project_id}", post(mcp_endpoint))
        .with_state(McpState { store: store.clone() })
        .route_layer(middleware::from_fn_with_state(store, require_agent_token))
}

async fn mcp_endpoint(
    State(state): State<McpState>,
    Extension(agent): Extension<AgentIdentity>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut uow = match state.store.begin().await {
        Ok(uow) => uow,
        Err(error) => return internal_error(error.into()),
    };

    let project = match uow.get_project(project_id).await {
        Ok(Some(project)) => project,
        Ok(None) => return ServerError::new(ErrorCode::NotFound, "Project not found").into_response(),
        Err(error) => return internal_error(error.into()),
    };
    let team_ids = match uow.team_ids_for_user(agent.user_id).await {
        Ok(team_ids) => team_ids,
        Err(error) => return internal_error(error.into()),
    };
    if !team_ids.contains(&project.team_id) {
        return ServerError::new(ErrorCode::AuthForbidden, "You don't have access to this project")
            .into_response();
    }

    let request: jsonrpc::Request = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return ServerError::new(ErrorCode::ValidationFailed, "Invalid JSON").into_response(),
    };

    let streaming = wants_event_stream(&headers);
    let notification = request.is_notification();
    let request_id = request.id.clone();
    tracing::debug!(
        project_id = %project_id,
        token_id = %agent.token_id,
        method = %request.method,
        "agent request received"
    );

    // Tools run on their own task so a panic still yields a JSON-RPC reply.
    let reply = match tokio::spawn(dispatch::handle(uow, project.id, request)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(unknown)) => {
            return ServerError::new(ErrorCode::ValidationFailed, unknown.to_string()).into_response()
        }
        Err(join_error) => {
            tracing::error!(error = ?join_error, project_id = %project_id, "agent dispatch panicked");
            jsonrpc::Response::error(request_id, RpcError::internal("Internal error"))
        }
    };

    if notification && !reply.is_error() {
        return StatusCode::ACCEPTED.into_response();
    }
    respond(&reply, streaming)
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains(EVENT_STREAM))
}

/// Plain JSON, or a single server-sent event frame when the client asked for one.
fn respond(reply: &jsonrpc::Response, streaming: bool) -> Response {
    if !streaming {
        return Json(reply).into_response();
    }

    let payload = match serde_json::to_string(reply) {
        Ok(payload) => payload,
        Err(error) => return internal_error(error.into()),
    };
    let mut response = (StatusCode::OK, format!("data: {payload}\n\n")).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream; charset=utf-8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn internal_error(error: anyhow::Error) -> Response {
    tracing::error!(error = ?error, "agent endpoint internal error");
    ServerError::from_code(ErrorCode::InternalError).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_membership, api_token, body_json, fixture, Fixture};
    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Method, Request},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn mcp_request(project_id: Uuid, token: Option<&str>, accept: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/mcp/{project_id}"))
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        builder.body(Body::from(body.to_string())).expect("request should build")
    }

    async fn send(fx: &Fixture, token: Option<&str>, body: Value) -> Response {
        router(fx.store.clone())
            .oneshot(mcp_request(fx.project.id, token, None, &body.to_string()))
            .await
            .expect("request should return response")
    }

    fn rpc(method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params })
    }

    #[tokio::test]
    async fn missing_and_unknown_tokens_are_unauthorized() {
        let fx = fixture().await;

        let response = send(&fx, None, rpc("initialize", json!({}))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"]["message"], "Authorization header required");

        let response = send(&fx, Some("made-up"), rpc("initialize", json!({}))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"]["message"], "Invalid token");
    }

    #[tokio::test]
    async fn revoked_token_is_unauthorized() {
        let fx = fixture().await;
        let (record, token) = api_token(&fx.store, fx.user_id).await;
        let mut uow = fx.store.begin().await.expect("begin");
        uow.revoke_api_token(record.id).await.expect("revoke");
        uow.commit().await.expect("commit");

        let response = send(&fx, Some(&token), rpc("initialize", json!({}))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "AUTH_TOKEN_REVOKED");
        assert_eq!(body["error"]["message"], "Token has been revoked");
    }

    #[tokio::test]
    async fn project_checks_come_before_body_parsing() {
        let fx = fixture().await;
        let (_, token) = api_token(&fx.store, fx.user_id).await;

        let response = router(fx.store.clone())
            .oneshot(mcp_request(Uuid::new_v4(), Some(&token), None, "not json"))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["message"], "Project not found");

        let outsider = Uuid::new_v4();
        add_membership(&fx.store, Uuid::new_v4(), outsider).await;
        let (_, outsider_token) = api_token(&fx.store, outsider).await;
        let response = router(fx.store.clone())
            .oneshot(mcp_request(fx.project.id, Some(&outsider_token), None, "not json"))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await["error"]["message"],
            "You don't have access to this project"
        );
    }

    #[tokio::test]
    async fn malformed_body_and_unknown_method_are_bad_requests() {
        let fx = fixture().await;
        let (_, token) = api_token(&fx.store, fx.user_id).await;

        let response = router(fx.store.clone())
            .oneshot(mcp_request(fx.project.id, Some(&token), None, "{oops"))
            .await
            .expect("request should return response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["message"], "Invalid JSON");

        let response = send(&fx, Some(&token), rpc("resources/list", json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["message"], "Unknown method: resources/list");
    }

    #[tokio::test]
    async fn initialize_and_tools_list_answer_as_json_rpc() {
        let fx = fixture().await;
        let (_, token) = api_token(&fx.store, fx.user_id).await;

        let response = send(&fx, Some(&token), rpc("initialize", json!({}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["protocolVersion"], "2024-11-05");

        let response = send(&fx, Some(&token), rpc("tools/list", json!({}))).await;
        let body = body_json(response).await;
        assert_eq!(body["result"]["tools"].as_array().map(Vec::len), Some(5));
    }

    #[tokio::test]
    async fn initialized_notification_gets_an_empty_accepted_reply() {
        let fx = fixture().await;
        let (_, token) = api_token(&fx.store, fx.user_id).await;

        let response = send(
            &fx,
            Some(&token),
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = to_bytes(response.into_body(), 1024).await.expect("body");
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn tool_failures_are_json_rpc_errors_with_http_ok() {
        let fx = fixture().await;
        let (_, token) = api_token(&fx.store, fx.user_id).await;

        let response = send(
            &fx,
            Some(&token),
            rpc("tools/call", json!({ "name": "get_document", "arguments": { "id": "nope" } })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32603);
        assert_eq!(body["error"]["message"], "Invalid document ID format");
        assert!(body.get("result").is_none());
    }

    #[tokio::test]
    async fn event_stream_accept_header_gets_one_sse_frame() {
        let fx = fixture().await;
        let (_, token) = api_token(&fx.store, fx.user_id).await;
        let body = rpc("tools/call", json!({ "name": "list_documents", "arguments": {} })).to_string();

        let response = router(fx.store.clone())
            .oneshot(mcp_request(
                fx.project.id,
                Some(&token),
                Some("application/json, text/event-stream"),
                &body,
            ))
            .await
            .expect("request should return response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            Some("text/event-stream; charset=utf-8")
        );
        assert_eq!(
            response.headers().get(CACHE_CONTROL).and_then(|value| value.to_str().ok()),
            Some("no-cache")
        );

        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.expect("body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf-8 body");
        let payload = text
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .expect("single sse frame");
        let frame: Value = serde_json::from_str(payload).expect("frame holds json");
        assert_eq!(frame["id"], 1);
        assert!(frame["result"]["content"][0]["text"].is_string());
    }

    #[tokio::test]
    async fn created_documents_are_committed() {
        let fx = fixture().await;
        let (_, token) = api_token(&fx.store, fx.user_id).await;

        let response = send(
            &fx,
            Some(&token),
            rpc(
                "tools/call",
                json!({
                    "name": "create_document",
                    "arguments": { "title": "From agent", "type": "markdown", "content": "hi" },
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut uow = fx.store.begin().await.expect("begin");
        let docs = uow.list_documents(fx.project.id).await.expect("list");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "From agent");
    }
}
