use std::sync::Weak;

use tokio::sync::{mpsc, Mutex};

use crate::session::SessionManager;
use crate::sync::SyncClient;
use crate::{debug_log, log_warn};

use super::registry::{attach_server_id, Registry};
use super::state::ImpressionMetrics;

const ENABLE_LOGS: bool = true;

/// Ordered delivery for one impression.
///
/// The create call goes first; checkpoints and the final update queue behind
/// it because they need the server-issued id.
pub(crate) struct Outbox {
    pub content_id: String,
    pub generation: u64,
    pub sync: SyncClient,
    pub session: SessionManager,
    pub registry: Weak<Mutex<Registry>>,
    pub debug: bool,
}

impl Outbox {
    pub async fn run(self, mut updates: mpsc::UnboundedReceiver<ImpressionMetrics>) {
        let session_id = self.session.current_id().await;
        let impression_id = self
            .sync
            .create_impression(&self.content_id, session_id)
            .await;

        if let Some(id) = &impression_id {
            attach_server_id(&self.registry, &self.content_id, self.generation, id).await;
            debug_log!(self.debug, "Impression started: {} ({id})", self.content_id);
        }

        while let Some(metrics) = updates.recv().await {
            match &impression_id {
                Some(id) => {
                    self.sync.update_impression(id, &metrics).await;
                }
                None => {
                    log_warn!(
                        "Dropping {} for {}: impression was never created",
                        if metrics.end { "final update" } else { "checkpoint" },
                        self.content_id
                    );
                }
            }

            if metrics.end {
                debug_log!(
                    self.debug,
                    "Impression ended: {} (active {}ms, depth {}%)",
                    self.content_id,
                    metrics.active_time_ms,
                    metrics.scroll_depth_pct
                );
                break;
            }
        }
    }
}
