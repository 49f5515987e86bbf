//! The relay server: transport surfaces over the encrypted document store.
//!
//! Three surfaces share one dispatch path: a duplex websocket, a half-duplex
//! SSE + POST pair, and nothing else — everything a client can say arrives
//! as a message envelope, and everything stored is fanned out to the
//! document's subscribers. The relay never sees plaintext; it stores, orders,
//! acknowledges, and broadcasts ciphertext.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use veil_store::DocumentStore;

pub mod config;
mod dispatch;
mod hub;
mod sse;
mod stream_lanes;
mod ws;

pub use config::RelayConfig;
pub use hub::Hub;

use stream_lanes::StreamLanes;

/// Shared state behind every surface.
#[derive(Debug)]
pub struct RelayState {
    pub store: DocumentStore,
    pub hub: Hub,
    pub config: RelayConfig,
    next_client_id: AtomicU64,
    stream_lanes: StreamLanes,
}

impl RelayState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            store: DocumentStore::new(),
            hub: Hub::new(config.channel_capacity),
            config,
            next_client_id: AtomicU64::new(1),
            stream_lanes: StreamLanes::default(),
        })
    }

    /// Issues the next client id; the SSE surface announces it as the
    /// stream's first event.
    pub(crate) fn allocate_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// The relay's HTTP application.
#[must_use]
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws/:document", get(ws::handle_upgrade))
        .route("/events/:document", get(sse::handle_events))
        .route("/documents/:document", post(sse::handle_post))
        .route("/out/:document/:client", get(stream_lanes::handle_read))
        .route("/in/:document/:client", post(stream_lanes::handle_write))
        .with_state(state)
}
