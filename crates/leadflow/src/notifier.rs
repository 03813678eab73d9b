use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus};
use crate::storage::StorageBackend;

const MAX_ATTEMPTS: u64 = 3;

/// Subscribes to the bus and forwards every assignment event to the owning
/// organization's notification webhook. Each delivery runs on its own task.
pub fn spawn(storage: Arc<dyn StorageBackend>, events: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    let client = reqwest::Client::new();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.is_assignment() {
                        dispatch(storage.as_ref(), &client, event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notifier fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn dispatch(storage: &dyn StorageBackend, client: &reqwest::Client, event: Event) {
    let org = match storage.get_organization(&event.organization_id) {
        Ok(Some(org)) => org,
        Ok(None) => return,
        Err(e) => {
            warn!(org = %event.organization_id, error = %e, "could not load organization for notification");
            return;
        }
    };
    let url = match org.notify_webhook_url {
        Some(u) if !u.is_empty() => u,
        _ => return,
    };

    let payload = serde_json::json!({
        "event": event.event_type,
        "organization_id": event.organization_id,
        "lead_id": event.lead_id,
        "user_id": event.user_id,
        "data": event.data,
        "timestamp": event.timestamp.to_rfc3339(),
    });

    let client = client.clone();
    tokio::spawn(async move {
        deliver(&client, &url, &payload).await;
    });
}

/// POSTs the payload, retrying with quadratic backoff (1s, 4s).
pub async fn deliver(client: &reqwest::Client, url: &str, payload: &serde_json::Value) -> bool {
    let event = payload["event"].as_str().unwrap_or_default();

    for attempt in 1..=MAX_ATTEMPTS {
        let result = client
            .post(url)
            .json(payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(url, event, attempt, "notification delivered");
                return true;
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let _ = resp.text().await;
                if attempt == MAX_ATTEMPTS {
                    info!(url, event, status, "notification failed after retries");
                }
            }
            Err(e) => {
                if attempt == MAX_ATTEMPTS {
                    info!(url, event, error = %e, "notification failed after retries");
                }
            }
        }

        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(attempt * attempt)).await;
        }
    }
    false
}
