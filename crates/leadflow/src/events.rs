use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const LEAD_CREATED: &str = "lead.created";
pub const LEAD_ASSIGNED: &str = "lead.assigned";
pub const LEAD_REDISTRIBUTED: &str = "lead.redistributed";
pub const LEAD_REASSIGNED: &str = "lead.reassigned";
pub const LEAD_TOUCHED: &str = "lead.touched";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub organization_id: String,
    pub lead_id: Option<String>,
    /// The user the lead now belongs to, when the event moves it.
    pub user_id: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn lead(
        event_type: &str,
        organization_id: &str,
        lead_id: &str,
        user_id: Option<&str>,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            organization_id: organization_id.to_string(),
            lead_id: Some(lead_id.to_string()),
            user_id: user_id.map(str::to_string),
            data,
            timestamp,
        }
    }

    /// Events that change who owns a lead.
    pub fn is_assignment(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            LEAD_ASSIGNED | LEAD_REDISTRIBUTED | LEAD_REASSIGNED
        )
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: Event) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
