//! Calendar booking with open-hours and conflict checks, plus availability listing

use std::time::Instant;

use serde_json::{json, Value};

use super::http::send;
use super::{append_query, bearer_headers, elapsed_ms, read_response, snapshot, variable_str, ToolTiming};
use crate::domain::{ActionResponse, CalendarSettings, RequestSnapshot};
use crate::error::ChatError;
use crate::oauth::AccessToken;
use crate::timezone::{add_minutes, hour_in_zone, minute_in_zone, to_absolute_instant};

/// Booked length relative to the configured duration. Pending product review.
pub const DURATION_SHRINK_FACTOR: f64 = 0.95;

/// Tolerance around the open/close boundaries. Pending product review.
pub const OPEN_HOURS_BUFFER_MINUTES: i64 = 1;

pub const DEFAULT_DURATION_MINUTES: i64 = 30;

const OUTSIDE_OPEN_HOURS: &str = "Requested time is outside of open hours";

pub(super) fn events_url(api_url: &str, calendar_id: &str) -> String {
    format!(
        "{}/calendars/{}/events",
        api_url.trim_end_matches('/'),
        urlencoding::encode(calendar_id)
    )
}

/// UTC start and end of the booking, end shortened by the shrink factor.
pub fn booking_window(start_time: &str, calendar: &CalendarSettings) -> Option<(String, String)> {
    let start = to_absolute_instant(start_time, &calendar.timezone);
    let duration = calendar.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
    let booked = ((duration as f64 * DURATION_SHRINK_FACTOR).floor() as i64).max(1);
    let end = add_minutes(&start, booked)?;
    Some((start, end))
}

/// Rejects bookings that start or end outside the open window, or whose
/// local time cannot be resolved.
pub fn check_open_hours(start: &str, end: &str, calendar: &CalendarSettings) -> Result<(), ChatError> {
    let Some((open, close)) = calendar.enforced_open_hours() else {
        return Ok(());
    };
    let conflict = || ChatError::SchedulingConflict(OUTSIDE_OPEN_HOURS.to_string());

    let local_minutes = |value: &str| -> Option<i64> {
        let hour = hour_in_zone(value, &calendar.timezone)?;
        let minute = minute_in_zone(value, &calendar.timezone)?;
        Some(hour as i64 * 60 + minute as i64)
    };
    let start_total = local_minutes(start).ok_or_else(conflict)?;
    let end_total = local_minutes(end).ok_or_else(conflict)?;

    let earliest = (open as i64 * 60 - OPEN_HOURS_BUFFER_MINUTES).max(0);
    let latest = (close as i64 * 60 + OPEN_HOURS_BUFFER_MINUTES).min(24 * 60);

    if start_total < earliest || end_total > latest || start_total >= end_total {
        return Err(conflict());
    }
    Ok(())
}

/// Collapses provider events to `{start, end}` pairs, hiding everything else.
pub fn busy_intervals(payload: &Value) -> Vec<Value> {
    payload
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let edge = |key: &str| {
                        item.get(key)
                            .and_then(|e| e.get("dateTime").or_else(|| e.get("date")))
                            .cloned()
                            .unwrap_or(Value::Null)
                    };
                    json!({ "start": edge("start"), "end": edge("end") })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn attendee_emails(variables: &Value) -> Vec<String> {
    let emails: Vec<String> = match variables.get("attendees") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj.get("email").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    emails
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

pub(super) fn create_snapshot(url: &str, token: Option<&AccessToken>, variables: &Value) -> RequestSnapshot {
    let body = json!({
        "start_time": variables.get("start_time").cloned().unwrap_or(Value::Null),
        "attendees": variables.get("attendees").cloned().unwrap_or(Value::Null),
    });
    snapshot("POST", url, &bearer_headers(token), body)
}

pub(super) fn list_snapshot(url: &str, token: Option<&AccessToken>, variables: &Value) -> RequestSnapshot {
    let body = json!({
        "time_min": variables.get("time_min").cloned().unwrap_or(Value::Null),
        "time_max": variables.get("time_max").cloned().unwrap_or(Value::Null),
        "max_results": variables.get("max_results").cloned().unwrap_or(Value::Null),
    });
    snapshot("GET", url, &bearer_headers(token), body)
}

fn availability_pairs(time_min: &str, time_max: &str) -> Vec<(String, String)> {
    vec![
        ("timeMin".to_string(), time_min.to_string()),
        ("timeMax".to_string(), time_max.to_string()),
        ("singleEvents".to_string(), "true".to_string()),
        ("orderBy".to_string(), "startTime".to_string()),
    ]
}

pub(super) async fn create_event(
    http: &reqwest::Client,
    events_url: &str,
    token: &AccessToken,
    calendar: &CalendarSettings,
    variables: &Value,
    intended: RequestSnapshot,
    timing: &mut ToolTiming,
) -> (RequestSnapshot, ActionResponse) {
    let Some(start_time) = variable_str(variables, "start_time") else {
        let err = ChatError::Validation("start_time is required".to_string());
        return (intended, ActionResponse::from_error(&err));
    };
    let Some((start, end)) = booking_window(start_time, calendar) else {
        let err = ChatError::Validation(format!("Invalid start_time: {}", start_time));
        return (intended, ActionResponse::from_error(&err));
    };

    if let Err(err) = check_open_hours(&start, &end, calendar) {
        return (intended, ActionResponse::from_error(&err));
    }

    // Availability must be confirmed free before anything is booked.
    let availability_url = append_query(events_url, &availability_pairs(&start, &end));
    let availability_request = snapshot("GET", &availability_url, &bearer_headers(Some(token)), Value::Null);
    let started = Instant::now();
    let availability = http
        .get(&availability_url)
        .header("Authorization", token.authorization())
        .send()
        .await;
    timing.calendar_availability_ms = Some(elapsed_ms(started));

    let availability = match availability {
        Ok(response) => read_response(response).await,
        Err(e) => {
            tracing::warn!(error = %e, "calendar availability check failed");
            let err = ChatError::Upstream("Calendar availability check failed".to_string());
            return (availability_request, ActionResponse::from_error(&err));
        }
    };
    if !availability.ok {
        return (availability_request, availability);
    }

    let busy = availability.body.as_ref().map(busy_intervals).unwrap_or_default();
    if !busy.is_empty() {
        let err = ChatError::SchedulingConflict("Requested time is not available".to_string());
        let mut response = ActionResponse::from_error(&err);
        response.body = Some(json!({ "busy": busy }));
        return (availability_request, response);
    }

    let mut event = json!({
        "summary": calendar.event_type.as_deref().unwrap_or("Event"),
        "start": { "dateTime": start, "timeZone": calendar.timezone },
        "end": { "dateTime": end, "timeZone": calendar.timezone },
    });
    if let Some(location) = &calendar.location {
        event["location"] = json!(location);
    }
    let attendees = attendee_emails(variables);
    if !attendees.is_empty() {
        event["attendees"] = attendees.iter().map(|email| json!({ "email": email })).collect();
    }

    let request = snapshot("POST", events_url, &bearer_headers(Some(token)), event.clone());
    let builder = http
        .post(events_url)
        .header("Authorization", token.authorization())
        .json(&event);
    let response = send(builder, timing).await;
    (request, response)
}

pub(super) async fn list_events(
    http: &reqwest::Client,
    events_url: &str,
    token: &AccessToken,
    calendar: &CalendarSettings,
    variables: &Value,
    intended: RequestSnapshot,
    timing: &mut ToolTiming,
) -> (RequestSnapshot, ActionResponse) {
    let (Some(time_min), Some(time_max)) = (variable_str(variables, "time_min"), variable_str(variables, "time_max")) else {
        let err = ChatError::Validation("time_min and time_max are required".to_string());
        return (intended, ActionResponse::from_error(&err));
    };

    let mut pairs = availability_pairs(
        &to_absolute_instant(time_min, &calendar.timezone),
        &to_absolute_instant(time_max, &calendar.timezone),
    );
    let max_results = match variables.get("max_results") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    if let Some(max) = max_results.filter(|m| *m > 0) {
        pairs.push(("maxResults".to_string(), max.to_string()));
    }

    let url = append_query(events_url, &pairs);
    let request = snapshot("GET", &url, &bearer_headers(Some(token)), Value::Null);
    let builder = http.get(&url).header("Authorization", token.authorization());
    let mut response = send(builder, timing).await;

    if response.ok {
        let busy = response.body.as_ref().map(busy_intervals).unwrap_or_default();
        response.body = Some(json!({ "busy": busy }));
    }
    (request, response)
}
