use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Utc};
use leadflow_models::{Lead, RuleMatch, Schedule};

/// Converts an instant to organization-local wall time.
pub fn local_time(at: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDateTime {
    match FixedOffset::east_opt(utc_offset_minutes * 60) {
        Some(offset) => at.with_timezone(&offset).naive_local(),
        None => at.naive_utc(),
    }
}

fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

fn any_of(wanted: &Option<Vec<String>>, value: Option<&str>) -> bool {
    let Some(wanted) = wanted.as_ref().filter(|w| !w.is_empty()) else {
        return true;
    };
    match value {
        Some(value) => {
            let value = fold(value);
            wanted.iter().any(|w| fold(w) == value)
        }
        None => false,
    }
}

fn in_schedule(schedule: &Schedule, local_arrival: NaiveDateTime) -> bool {
    let Some((start, end)) = schedule.window() else {
        return false;
    };
    let day = local_arrival.weekday().num_days_from_sunday() as u8;
    let clock = local_arrival.time();
    schedule.days.contains(&day) && clock >= start && clock < end
}

/// True when every present field of `criteria` holds for the lead.
/// `local_arrival` is the lead's arrival in organization-local time.
pub fn matches(criteria: &RuleMatch, lead: &Lead, local_arrival: NaiveDateTime) -> bool {
    if let Some(ref pipeline_id) = criteria.pipeline_id {
        if lead.pipeline_id.as_deref() != Some(pipeline_id.as_str()) {
            return false;
        }
    }

    if !any_of(&criteria.source, Some(&lead.source)) {
        return false;
    }

    if let Some(needle) = criteria
        .campaign_name_contains
        .as_deref()
        .filter(|n| !n.is_empty())
    {
        match lead.campaign_name {
            Some(ref campaign) if campaign.to_lowercase().contains(&needle.to_lowercase()) => {}
            _ => return false,
        }
    }

    if let Some(tags) = criteria.tag_in.as_ref().filter(|t| !t.is_empty()) {
        let hit = lead
            .tags
            .iter()
            .any(|have| tags.iter().any(|want| fold(want) == fold(have)));
        if !hit {
            return false;
        }
    }

    if !any_of(&criteria.city_in, lead.city.as_deref()) {
        return false;
    }

    if let Some(ref schedule) = criteria.schedule {
        if !in_schedule(schedule, local_arrival) {
            return false;
        }
    }

    true
}
