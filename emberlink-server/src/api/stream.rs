use axum::{
    extract::{Path, Query, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream;
use log::info;
use serde::Deserialize;
use std::convert::Infallible;

use crate::state::AppState;

#[derive(Deserialize, Debug)]
pub struct StreamParams {
    pub rid: String,
}

/// GET /a/{tenant}/oauth/sse?rid=…
///
/// The original device holds this stream open until `loginComplete` (or
/// `consentRequired` first). Closed subscribers are pruned by the broker on
/// the next publish.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<StreamParams>,
) -> Response {
    info!("GET /a/{tenant}/oauth/sse rid={}", params.rid);

    if let Err(error) =
        state.tenant_cache.resolve(&state.db_pool, &tenant).await
    {
        return error.into_response();
    }

    let (_, receiver) = state.sse.subscribe(&params.rid).await;

    let events = stream::unfold(receiver, |mut receiver| async move {
        let message = receiver.recv().await?;
        let event = Event::default()
            .event(message.event)
            .data(message.data.to_string());
        Some((Ok::<Event, Infallible>(event), receiver))
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}
