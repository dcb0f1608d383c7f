use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::common::utils::{now_ms, now_secs};
use crate::gateway::ConnectionContext;
use crate::gateway::constants::OP_HEARTBEAT;
use crate::gateway::types::{GatewayMessage, heartbeat_payload};

/// Sends op 3 every `interval_ms` with the epoch-seconds payload,
/// recording the send instant for RTT computation. Runs until the
/// connection is cancelled or the session's writer goes away.
pub(crate) fn spawn_heartbeat(
    tx: UnboundedSender<String>,
    ctx: Arc<ConnectionContext>,
    interval_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = interval.tick() => {
                    ctx.last_heartbeat.store(now_ms(), Ordering::Relaxed);
                    let hb = GatewayMessage {
                        op: OP_HEARTBEAT,
                        d: heartbeat_payload(now_secs()),
                    };
                    if let Ok(json) = serde_json::to_string(&hb) {
                        if tx.send(json).is_err() {
                            break; // channel closed, session ending
                        }
                    }
                }
            }
        }
    })
}
