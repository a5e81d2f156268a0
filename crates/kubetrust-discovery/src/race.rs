//! Endpoint race coordinator
//!
//! One task per candidate endpoint, each retrying full discovery attempts on
//! a fixed interval. The first task to succeed claims the single winner slot
//! and cancels the rest. The coordinator joins every task before returning,
//! so no fetch outlives the call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{cancellable, DiscoveryClient};
use crate::error::{DiscoveryError, Result};
use crate::trust_object::ClusterTrustObject;

/// The winning endpoint and the trust it established
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Endpoint that won the race
    pub endpoint: String,
    /// Validated trust material
    pub trust: ClusterTrustObject,
}

type WinnerSlot = Arc<Mutex<Option<oneshot::Sender<DiscoveryOutcome>>>>;

/// Race discovery across `endpoints` under a global `timeout`
///
/// Attempts that fail are logged and retried after the client's retry
/// interval until one endpoint wins or the timeout fires; a misconfigured
/// endpoint is therefore retried for the whole timeout.
pub async fn race_endpoints(
    client: Arc<DiscoveryClient>,
    endpoints: &[String],
    timeout: Duration,
) -> Result<DiscoveryOutcome> {
    if endpoints.is_empty() {
        return Err(DiscoveryError::NoEndpoints);
    }

    let cancel = CancellationToken::new();
    let (winner_tx, mut winner_rx) = oneshot::channel();
    let winner: WinnerSlot = Arc::new(Mutex::new(Some(winner_tx)));
    let last_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let mut tasks = JoinSet::new();
    for endpoint in endpoints {
        tasks.spawn(run_endpoint(
            client.clone(),
            endpoint.clone(),
            cancel.clone(),
            winner.clone(),
            last_error.clone(),
        ));
    }
    drop(winner);

    let mut outcome = tokio::select! {
        result = &mut winner_rx => result.ok(),
        _ = tokio::time::sleep(timeout) => None,
    };

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "discovery task failed");
        }
    }

    // A winner may have been recorded as the timeout fired
    if outcome.is_none() {
        outcome = winner_rx.try_recv().ok();
    }

    match outcome {
        Some(outcome) => {
            info!(
                endpoint = %outcome.endpoint,
                server = %outcome.trust.server_url,
                "cluster trust discovered"
            );
            Ok(outcome)
        }
        None => Err(DiscoveryError::DiscoveryTimedOut {
            timeout,
            last_error: last_error.lock().await.take(),
        }),
    }
}

async fn run_endpoint(
    client: Arc<DiscoveryClient>,
    endpoint: String,
    cancel: CancellationToken,
    winner: WinnerSlot,
    last_error: Arc<Mutex<Option<String>>>,
) {
    loop {
        match client.attempt(&endpoint, &cancel).await {
            Ok(trust) => {
                if let Some(tx) = winner.lock().await.take() {
                    // Receiver is gone only when the coordinator stopped waiting
                    let _ = tx.send(DiscoveryOutcome {
                        endpoint: endpoint.clone(),
                        trust,
                    });
                }
                cancel.cancel();
                return;
            }
            Err(DiscoveryError::Cancelled) => return,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "discovery attempt failed, retrying");
                let retryable = e.is_retryable();
                *last_error.lock().await = Some(format!("{}: {}", endpoint, e));
                if !retryable {
                    return;
                }
            }
        }

        if cancellable(&cancel, tokio::time::sleep(client.retry_interval()))
            .await
            .is_err()
        {
            return;
        }
    }
}
