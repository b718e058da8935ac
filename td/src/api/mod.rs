//! A minimal local HTTP/1.1 control-plane API over `TcpListener`, grounded
//! on `td::ipc::listener`'s accept-loop and per-connection read/write
//! framing pattern, adapted from line-delimited JSON over a Unix socket to
//! real HTTP request/response framing.

mod request;
mod routes;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use taskstore::QueueStore;

const MAX_REQUEST_SIZE: usize = 1_048_576;

pub struct ApiServer {
    queue: Arc<QueueStore>,
    namespace: String,
    state_dir: String,
}

impl ApiServer {
    pub fn new(queue: Arc<QueueStore>, namespace: String, state_dir: String) -> Self {
        Self { queue, namespace, state_dir }
    }

    pub async fn serve(&self, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        info!(port, "ApiServer::serve: listening");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "ApiServer::serve: accept failed");
                    continue;
                }
            };
            debug!(%peer, "ApiServer::serve: accepted connection");

            let queue = self.queue.clone();
            let namespace = self.namespace.clone();
            let state_dir = self.state_dir.clone();
            let port = port;

            tokio::spawn(async move {
                if let Err(e) = routes::handle_connection(stream, queue, namespace, state_dir, port).await {
                    error!(error = %e, "ApiServer::serve: connection handler failed");
                }
            });
        }
    }
}
