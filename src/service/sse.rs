//! `GET /query/stream`: Server-Sent Events view of [`RAGPipeline::stream`]
//! (`spec.md` §4.4, §6.1), tracked in the [`ConnectionRegistry`] so a client
//! disconnect or an operator-issued cancel stops generation promptly.
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_core::Stream;
use serde::Deserialize;
use uuid::Uuid;

use crate::rag::{RAGQuery, RAGStreamEvent};

use super::app::AppState;
use super::connections::ConnectionGuard;
use super::error_response::HttpError;

#[derive(Deserialize)]
pub struct StreamParams {
    query: String,
    top_k: Option<usize>,
    score_threshold: Option<f32>,
}

/// Stream one query's answer as `progress` / `sources` / `content` / `error`
/// / `end` SSE events, registering the connection for tracking and cancel.
pub async fn query_stream(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpError> {
    let key = connect_info.map(|info| info.0.ip().to_string()).unwrap_or_else(|| "unknown".to_string());
    state.query_limiter.check(&key).await?;

    let mut query = RAGQuery::default();
    query.query_text = params.query.clone();
    if let Some(top_k) = params.top_k {
        query.top_k = top_k;
    }
    if let Some(score_threshold) = params.score_threshold {
        query.score_threshold = score_threshold;
    }

    let connection_id = Uuid::new_v4().to_string();
    let cancel = state.connections.open(connection_id.clone(), params.query, None, None).await;

    let mut events = state.rag.stream(query, cancel).await.inspect_err(|_| {
        let connections = state.connections.clone();
        let connection_id = connection_id.clone();
        tokio::spawn(async move { connections.close(&connection_id).await });
    })?;

    let connections = state.connections.clone();
    let metrics = state.metrics.clone();
    let guard = ConnectionGuard::new(connections.clone(), connection_id.clone());
    let stream = async_stream::stream! {
        let _guard = guard;
        use futures_util::StreamExt;
        let mut succeeded = true;
        while let Some(event) = events.next().await {
            connections.touch(&connection_id).await;
            let is_end = matches!(event, RAGStreamEvent::End { .. });
            if matches!(event, RAGStreamEvent::Error { .. }) {
                succeeded = false;
            }
            yield Ok(to_sse_event(event));
            if is_end {
                break;
            }
        }
        _guard.close().await;
        metrics.record_request("query_stream", succeeded);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: RAGStreamEvent) -> Event {
    match event {
        RAGStreamEvent::Progress { stage } => Event::default().event("progress").data(stage),
        RAGStreamEvent::Sources { sources } => {
            Event::default().event("sources").data(serde_json::to_string(&sources).unwrap_or_default())
        }
        RAGStreamEvent::Content { delta } => Event::default().event("content").data(delta),
        RAGStreamEvent::Error { message } => Event::default().event("error").data(message),
        RAGStreamEvent::End { truncated } => Event::default().event("end").data(truncated.to_string()),
    }
}
