//! Resource addressing: URI resolution, single-item reads and paged listings.
//!
//! The registry is stateless. Cursors come in from the caller and go back out
//! untouched, and one listing call always targets exactly one backend.

use std::sync::Arc;

use gtasks_core::uri::{AddressError, ResourceKind, ResourceUri};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::backend::{
    BackendError, Backends, CalendarBackend, CalendarListEntry, DEFAULT_TASK_LIST,
    MAX_TASK_RESULTS, Page, PageRequest, Task, TasksBackend,
};

pub const RESOURCE_PAGE_SIZE: u32 = 10;
pub const CALENDAR_PAGE_SIZE: u32 = 100;

pub const TEXT_MIME: &str = "text/plain";
pub const JSON_MIME: &str = "application/json";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Backend(BackendError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    pub address: ResourceUri,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: &'static str,
    pub text: String,
}

impl ResourceContents {
    pub fn to_value(&self) -> Value {
        json!({
            "uri": self.uri,
            "mimeType": self.mime_type,
            "text": self.text,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceListing {
    Tasks(Page<Task>),
    Calendars(Page<CalendarListEntry>),
}

impl ResourceListing {
    pub fn next_cursor(&self) -> Option<&str> {
        match self {
            ResourceListing::Tasks(page) => page.next_cursor.as_deref(),
            ResourceListing::Calendars(page) => page.next_cursor.as_deref(),
        }
    }
}

pub struct ResourceAddressRegistry {
    tasks: Arc<dyn TasksBackend>,
    calendar: Arc<dyn CalendarBackend>,
}

impl ResourceAddressRegistry {
    pub fn new(backends: &Backends) -> Self {
        Self {
            tasks: backends.tasks.clone(),
            calendar: backends.calendar.clone(),
        }
    }

    pub fn resolve(&self, uri: &str) -> Result<ResolvedResource, RegistryError> {
        let address = ResourceUri::parse(uri)?;
        Ok(ResolvedResource {
            kind: address.kind(),
            address,
        })
    }

    /// Parse first; a malformed URI never reaches a backend.
    pub async fn read(&self, uri: &str) -> Result<ResourceContents, RegistryError> {
        let resolved = self.resolve(uri)?;
        match &resolved.address {
            ResourceUri::Task { task_id } => {
                let task = self.find_task(uri, task_id).await?;
                Ok(ResourceContents {
                    uri: uri.to_string(),
                    mime_type: TEXT_MIME,
                    text: task_details(&task),
                })
            }
            ResourceUri::CalendarEvent {
                calendar_id,
                event_id,
            } => {
                let event = self
                    .calendar
                    .get_event(calendar_id, event_id)
                    .await
                    .map_err(|err| not_found_or_backend(uri, err))?;
                let text = serde_json::to_string_pretty(&event)
                    .map_err(|e| RegistryError::Backend(BackendError::Transport(e.to_string())))?;
                Ok(ResourceContents {
                    uri: uri.to_string(),
                    mime_type: JSON_MIME,
                    text,
                })
            }
        }
    }

    pub async fn list(
        &self,
        kind: ResourceKind,
        cursor: Option<String>,
    ) -> Result<ResourceListing, RegistryError> {
        match kind {
            ResourceKind::Task => self
                .tasks
                .list_tasks(
                    DEFAULT_TASK_LIST,
                    &PageRequest::after(cursor, RESOURCE_PAGE_SIZE),
                )
                .await
                .map(ResourceListing::Tasks)
                .map_err(RegistryError::Backend),
            ResourceKind::Calendar => self
                .calendar
                .list_calendars(&PageRequest::after(cursor, CALENDAR_PAGE_SIZE))
                .await
                .map(ResourceListing::Calendars)
                .map_err(RegistryError::Backend),
        }
    }

    /// Task ids are only unique per list, so every list is tried in order.
    async fn find_task(&self, uri: &str, task_id: &str) -> Result<Task, RegistryError> {
        let mut cursor = None;
        loop {
            let lists = self
                .tasks
                .list_task_lists(&PageRequest::after(cursor, MAX_TASK_RESULTS))
                .await
                .map_err(RegistryError::Backend)?;
            for list in &lists.items {
                match self.tasks.get_task(&list.id, task_id).await {
                    Ok(task) => return Ok(task),
                    Err(err) if err.is_not_found() => {
                        debug!(task_list = %list.id, %task_id, "task not in list");
                    }
                    Err(err) => return Err(RegistryError::Backend(err)),
                }
            }
            match lists.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Err(RegistryError::NotFound(uri.to_string())),
            }
        }
    }
}

fn not_found_or_backend(uri: &str, err: BackendError) -> RegistryError {
    if err.is_not_found() {
        RegistryError::NotFound(uri.to_string())
    } else {
        RegistryError::Backend(err)
    }
}

/// Plain-text rendering used for task resource reads.
pub fn task_details(task: &Task) -> String {
    let or = |value: &Option<String>, fallback: &str| {
        value.clone().unwrap_or_else(|| fallback.to_string())
    };
    let flag = |value: Option<bool>| value.map_or_else(|| "Unknown".to_string(), |v| v.to_string());
    let links = if task.links.is_empty() {
        "Unknown".to_string()
    } else {
        task.links
            .iter()
            .filter_map(|link| link.get("link").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(", ")
    };

    [
        format!("Title: {}", or(&task.title, "No title")),
        format!("Status: {}", or(&task.status, "Unknown")),
        format!("Due: {}", or(&task.due, "Not set")),
        format!("Notes: {}", or(&task.notes, "No notes")),
        format!("Hidden: {}", flag(task.hidden)),
        format!("Parent: {}", or(&task.parent, "Unknown")),
        format!("Deleted?: {}", flag(task.deleted)),
        format!("Completed Date: {}", or(&task.completed, "Unknown")),
        format!("Position: {}", or(&task.position, "Unknown")),
        format!("ETag: {}", or(&task.etag, "Unknown")),
        format!("Links: {links}"),
        format!("Kind: {}", or(&task.kind, "Unknown")),
        format!("Updated: {}", or(&task.updated, "Unknown")),
    ]
    .join("\n")
}
