//! Resource addressing.
//!
//! Grammar:
//! - `gtasks:///{taskId}`: exactly one segment, no decoding.
//! - `gcalendar:///events/{calendarId}/{eventId}`: exactly two segments after
//!   the `events/` prefix. `calendarId` is percent-decoded, `eventId` is not.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const TASK_SCHEME: &str = "gtasks";
pub const CALENDAR_SCHEME: &str = "gcalendar";

const TASK_PREFIX: &str = "gtasks:///";
const CALENDAR_PREFIX: &str = "gcalendar:///";
const CALENDAR_EVENTS_PATH: &str = "events/";

pub const TASK_URI_FORMAT: &str = "gtasks:///{taskId}";
pub const CALENDAR_URI_FORMAT: &str = "gcalendar:///events/{calendarId}/{eventId}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid resource URI '{uri}': {reason}. Expected format: {expected}")]
    Malformed {
        uri: String,
        reason: String,
        expected: &'static str,
    },
    #[error("Resource not found: '{0}'")]
    UnknownScheme(String),
}

/// Which backend owns a resource (and therefore its listing cursor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Task,
    Calendar,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceUri {
    Task {
        task_id: String,
    },
    CalendarEvent {
        calendar_id: String,
        event_id: String,
    },
}

impl ResourceUri {
    pub fn task(task_id: impl Into<String>) -> Self {
        ResourceUri::Task {
            task_id: task_id.into(),
        }
    }

    pub fn calendar_event(calendar_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        ResourceUri::CalendarEvent {
            calendar_id: calendar_id.into(),
            event_id: event_id.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceUri::Task { .. } => ResourceKind::Task,
            ResourceUri::CalendarEvent { .. } => ResourceKind::Calendar,
        }
    }

    pub fn parse(uri: &str) -> Result<Self, AddressError> {
        let scheme = uri.split_once(':').map(|(scheme, _)| scheme);
        match scheme {
            Some(TASK_SCHEME) => parse_task(uri),
            Some(CALENDAR_SCHEME) => parse_calendar(uri),
            _ => Err(AddressError::UnknownScheme(uri.to_string())),
        }
    }
}

fn malformed(uri: &str, reason: impl Into<String>, expected: &'static str) -> AddressError {
    AddressError::Malformed {
        uri: uri.to_string(),
        reason: reason.into(),
        expected,
    }
}

fn parse_task(uri: &str) -> Result<ResourceUri, AddressError> {
    let rest = uri
        .strip_prefix(TASK_PREFIX)
        .ok_or_else(|| malformed(uri, "missing ':///' separator", TASK_URI_FORMAT))?;
    let segments: Vec<&str> = rest.split('/').collect();
    match segments.as_slice() {
        [task_id] if !task_id.is_empty() => Ok(ResourceUri::task(*task_id)),
        [_] => Err(malformed(uri, "task id is empty", TASK_URI_FORMAT)),
        _ => Err(malformed(
            uri,
            format!("expected 1 path segment, found {}", segments.len()),
            TASK_URI_FORMAT,
        )),
    }
}

fn parse_calendar(uri: &str) -> Result<ResourceUri, AddressError> {
    let rest = uri
        .strip_prefix(CALENDAR_PREFIX)
        .ok_or_else(|| malformed(uri, "missing ':///' separator", CALENDAR_URI_FORMAT))?;
    let rest = rest
        .strip_prefix(CALENDAR_EVENTS_PATH)
        .ok_or_else(|| malformed(uri, "missing 'events/' prefix", CALENDAR_URI_FORMAT))?;
    let segments: Vec<&str> = rest.split('/').collect();
    let [calendar_id, event_id] = segments.as_slice() else {
        return Err(malformed(
            uri,
            format!("expected 2 path segments, found {}", segments.len()),
            CALENDAR_URI_FORMAT,
        ));
    };
    if calendar_id.is_empty() || event_id.is_empty() {
        return Err(malformed(uri, "empty path segment", CALENDAR_URI_FORMAT));
    }
    let calendar_id = urlencoding::decode(calendar_id).map_err(|_| {
        malformed(
            uri,
            "calendar id is not valid percent-encoded UTF-8",
            CALENDAR_URI_FORMAT,
        )
    })?;
    Ok(ResourceUri::calendar_event(calendar_id.into_owned(), *event_id))
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceUri::Task { task_id } => write!(f, "{TASK_PREFIX}{task_id}"),
            ResourceUri::CalendarEvent {
                calendar_id,
                event_id,
            } => write!(
                f,
                "{CALENDAR_PREFIX}{CALENDAR_EVENTS_PATH}{}/{event_id}",
                urlencoding::encode(calendar_id)
            ),
        }
    }
}

impl FromStr for ResourceUri {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceUri::parse(s)
    }
}
