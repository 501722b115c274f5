use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::RawPathParams,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter},
};

use crate::{codec, observable::StateError, types::Method};

use super::{DispatchTable, HandlerError, Request};

/// Builds one axum route per table path, accepting exactly its declared methods.
///
/// Handlers run on the blocking pool since a state write waits on storage.
pub fn router(table: DispatchTable) -> Router {
    let table = Arc::new(table);
    let mut router = Router::new();
    for (slot, route) in table.routes().iter().enumerate() {
        let mut methods = MethodRouter::new();
        for method in route.methods() {
            let table = Arc::clone(&table);
            methods = methods.on(method_filter(method), move |params: RawPathParams, body: Bytes| {
                dispatch(table, slot, method, params, body)
            });
        }
        tracing::info!(path = route.path(), methods = ?route.methods(), "route installed");
        router = router.route(route.path(), methods);
    }
    router
}

/// Serves `table` on `addr` until the process stops.
pub async fn serve(addr: SocketAddr, table: DispatchTable) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(table)).await
}

fn method_filter(method: Method) -> MethodFilter {
    match method {
        Method::Get => MethodFilter::GET,
        Method::Post => MethodFilter::POST,
        Method::Put => MethodFilter::PUT,
        Method::Patch => MethodFilter::PATCH,
        Method::Delete => MethodFilter::DELETE,
    }
}

async fn dispatch(
    table: Arc<DispatchTable>,
    slot: usize,
    method: Method,
    params: RawPathParams,
    body: Bytes,
) -> Response {
    let mut request = Request::new(method);
    for (name, value) in params.iter() {
        request.params.insert(name.to_string(), value.to_string());
    }
    if !body.is_empty() {
        let decoded = std::str::from_utf8(&body)
            .map_err(|err| err.to_string())
            .and_then(|text| codec::decode(text).map_err(|err| err.to_string()));
        match decoded {
            Ok(value) => request.body = Some(value),
            Err(err) => return error_response(HandlerError::BadRequest(err)),
        }
    }

    let joined = tokio::task::spawn_blocking(move || {
        let route = table
            .routes()
            .get(slot)
            .ok_or_else(|| HandlerError::Internal(format!("route slot {slot} missing")))?;
        route.handle(request)
    })
    .await;

    match joined {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(err)) => error_response(err),
        Err(err) => {
            tracing::error!(%err, "handler task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn status_for(err: &HandlerError) -> StatusCode {
    match err {
        HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        HandlerError::NotFound(_) => StatusCode::NOT_FOUND,
        HandlerError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        HandlerError::State(StateError::SyncFailed { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        HandlerError::State(
            StateError::UnsupportedValueKind(_)
            | StateError::NoSuchField { .. }
            | StateError::Missing(_)
            | StateError::FixedFields { .. }
            | StateError::IndexOutOfBounds { .. }
            | StateError::KeyKind { .. }
            | StateError::WrongKind { .. }
            | StateError::NotContainer(_),
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        HandlerError::State(_) | HandlerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: HandlerError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(%status, %err, "handler failed");
    } else {
        tracing::warn!(%status, %err, "request rejected");
    }
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}
