//! Event Fabric transports (C10, §4.5): an upgraded WebSocket endpoint and a
//! long-polling fallback, both reading the same per-account broadcast
//! channel so an event emitted once is visible on either one.

use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::events::{Event, EventFabric};
use crate::models::DataResponse;

/// Ping cadence for the upgraded transport (§4.5 Transport requirements).
const PING_INTERVAL: Duration = Duration::from_secs(15);
/// A connected client that misses a pong within this window is dropped.
const PONG_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on how long the long-polling fallback waits for the next event
/// before returning an empty batch.
const POLL_TIMEOUT: Duration = Duration::from_secs(25);

/// `GET /events/{account_id}/ws`: the upgraded streaming transport. The
/// heartbeat ticker and the event multiplexing share this one connection
/// task, matching §4.5's "share the same connection task" requirement.
#[get("/events/<account_id>/ws")]
pub fn events_ws(account_id: String, ws: rocket_ws::WebSocket, events: &State<EventFabric>) -> rocket_ws::Channel<'static> {
    let mut rx = events.subscribe(&account_id);

    ws.channel(move |mut stream| {
        Box::pin(async move {
            use rocket::futures::{SinkExt, StreamExt};

            let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
            ping_ticker.tick().await; // first tick fires immediately; skip it

            loop {
                tokio::select! {
                    _ = ping_ticker.tick() => {
                        if tokio::time::timeout(PONG_TIMEOUT, stream.send(rocket_ws::Message::Ping(Vec::new().into())))
                            .await
                            .is_err()
                        {
                            log::debug!("events_ws: pong timeout for {account_id}, closing");
                            break;
                        }
                    }
                    event = rx.recv() => {
                        match event {
                            Ok(event) => {
                                let payload = serde_json::to_string(&event).unwrap_or_default();
                                if stream.send(rocket_ws::Message::Text(payload)).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                log::warn!("events_ws: subscriber for {account_id} lagged, dropped {skipped} events");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(rocket_ws::Message::Close(_))) | None => break,
                            Some(Ok(_)) => {} // pongs and any client text are ignored; this is a push-only channel.
                            Some(Err(_)) => break,
                        }
                    }
                }
            }

            Ok(())
        })
    })
}

/// `GET /events/{account_id}/poll`: long-polling fallback for clients behind
/// restrictive proxies. Waits up to [`POLL_TIMEOUT`] for the next event, then
/// returns whatever arrived (possibly nothing).
#[openapi(tag = "Events")]
#[get("/events/<account_id>/poll")]
pub async fn events_poll(account_id: String, events: &State<EventFabric>) -> Json<DataResponse<Vec<Event>>> {
    let mut rx = events.subscribe(&account_id);
    let mut batch = Vec::new();

    match tokio::time::timeout(POLL_TIMEOUT, rx.recv()).await {
        Ok(Ok(event)) => batch.push(event),
        Ok(Err(_)) | Err(_) => return Json(DataResponse { data: batch }),
    }

    // Drain whatever else has already queued up without blocking further.
    while let Ok(event) = rx.try_recv() {
        batch.push(event);
    }

    Json(DataResponse { data: batch })
}
