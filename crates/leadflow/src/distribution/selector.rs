use chrono::NaiveDateTime;
use leadflow_models::{Lead, Queue, Rule};

use super::matcher;

/// The queue a lead is routed to, and the rule that routed it (None when the
/// pipeline fallback was used).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub queue_id: String,
    pub rule_id: Option<String>,
}

fn active_queue<'a>(queues: &'a [Queue], id: &str) -> Option<&'a Queue> {
    queues.iter().find(|q| q.id == id && q.is_active)
}

/// First matching active rule wins; rules pointing at a missing or inactive
/// queue are ignored. Falls back to `fallback_queue_id` when it names an
/// active queue. None means the lead goes to manual triage.
pub fn select_queue(
    lead: &Lead,
    local_arrival: NaiveDateTime,
    rules: &[Rule],
    queues: &[Queue],
    fallback_queue_id: Option<&str>,
) -> Option<Selection> {
    let mut ordered: Vec<&Rule> = rules.iter().filter(|r| r.is_active).collect();
    ordered.sort_by_key(|r| (r.priority, r.seq));

    for rule in ordered {
        if active_queue(queues, &rule.queue_id).is_none() {
            continue;
        }
        if matcher::matches(&rule.criteria, lead, local_arrival) {
            return Some(Selection {
                queue_id: rule.queue_id.clone(),
                rule_id: Some(rule.id.clone()),
            });
        }
    }

    fallback_queue_id
        .and_then(|id| active_queue(queues, id))
        .map(|queue| Selection {
            queue_id: queue.id.clone(),
            rule_id: None,
        })
}
