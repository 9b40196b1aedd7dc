//! Tool surface: definitions, typed arguments and the dispatcher.
//!
//! Argument problems are caller bugs and fail hard with a [`ToolError`].
//! Provider failures are operational and come back as `isError` envelopes.

use std::sync::Arc;

use gtasks_core::envelope::ResultEnvelope;
use gtasks_core::error::codes;
use gtasks_core::uri::{ResourceKind, ResourceUri, TASK_SCHEME};
use serde_json::{Map, Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::backend::{
    BackendError, Backends, CalendarBackend, CalendarEvent, CalendarListEntry, DEFAULT_TASK_LIST,
    EventDateTime, EventQuery, MAX_TASK_RESULTS, PRIMARY_CALENDAR, PageRequest, Task, TaskFields,
    TasksBackend,
};
use crate::registry::{RESOURCE_PAGE_SIZE, ResourceAddressRegistry, ResourceListing};
use crate::util::{
    ToolError, arg_bool, arg_clamped_limit, arg_optional_string, arg_string, required_string,
};

pub const DEFAULT_EVENT_RESULTS: u32 = 10;
pub const MAX_EVENT_RESULTS: u32 = 250;
const TASK_STATUSES: [&str; 2] = ["needsAction", "completed"];

#[derive(Debug)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "search",
            description: "Search for tasks across every Google Tasks list by title or notes.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Case-insensitive search text" }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "list",
            description: "List one page of tasks from a Google Tasks list.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cursor": { "type": "string", "description": "nextCursor from a previous call" },
                    "taskListId": { "type": "string", "description": "Task list ID (default: @default)" }
                }
            }),
        },
        ToolDefinition {
            name: "create",
            description: "Create a new task in Google Tasks.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "taskListId": { "type": "string", "description": "Task list ID (default: @default)" },
                    "title": { "type": "string", "description": "Task title" },
                    "notes": { "type": "string", "description": "Task notes" },
                    "due": { "type": "string", "description": "Due date (RFC 3339)" }
                },
                "required": ["title"]
            }),
        },
        ToolDefinition {
            name: "update",
            description: "Update a task in Google Tasks. Only supplied fields change.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "taskListId": { "type": "string", "description": "Task list ID" },
                    "id": { "type": "string", "description": "Task ID" },
                    "uri": { "type": "string", "description": "Task URI (gtasks:///{taskId} or the task selfLink)" },
                    "title": { "type": "string", "description": "Task title" },
                    "notes": { "type": "string", "description": "Task notes" },
                    "status": {
                        "type": "string",
                        "enum": TASK_STATUSES,
                        "description": "Task status (needsAction or completed)"
                    },
                    "due": { "type": "string", "description": "Due date (RFC 3339)" }
                },
                "required": ["id", "uri"]
            }),
        },
        ToolDefinition {
            name: "delete",
            description: "Delete a task in Google Tasks.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "taskListId": { "type": "string", "description": "Task list ID (default: @default)" },
                    "id": { "type": "string", "description": "Task ID" }
                },
                "required": ["id"]
            }),
        },
        ToolDefinition {
            name: "clear",
            description: "Clear completed tasks from a Google Tasks list.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "taskListId": { "type": "string", "description": "Task list ID" }
                },
                "required": ["taskListId"]
            }),
        },
        ToolDefinition {
            name: "calendar_list_events",
            description: "List events from a Google Calendar, expanded and ordered by start time.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "calendarId": { "type": "string", "description": "Calendar ID (default: primary)" },
                    "maxResults": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_EVENT_RESULTS,
                        "description": "Maximum results to return (default 10, clamped to 1..250)"
                    },
                    "timeMin": { "type": "string", "description": "Minimum time (ISO 8601)" },
                    "timeMax": { "type": "string", "description": "Maximum time (ISO 8601)" },
                    "query": { "type": "string", "description": "Free text search terms" }
                }
            }),
        },
        ToolDefinition {
            name: "calendar_create_event",
            description: "Create a new event in Google Calendar, optionally with a Google Meet link.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "calendarId": { "type": "string", "description": "Calendar ID (default: primary)" },
                    "summary": { "type": "string", "description": "Event title/summary" },
                    "description": { "type": "string", "description": "Event description" },
                    "location": { "type": "string", "description": "Event location" },
                    "startTime": { "type": "string", "description": "Start time (ISO 8601)" },
                    "endTime": { "type": "string", "description": "End time (ISO 8601)" },
                    "createMeet": { "type": "boolean", "description": "Create a Google Meet link" }
                },
                "required": ["summary", "startTime", "endTime"]
            }),
        },
        ToolDefinition {
            name: "calendar_update_event",
            description: "Update an existing event in Google Calendar. Only supplied fields change.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "calendarId": { "type": "string", "description": "Calendar ID (default: primary)" },
                    "eventId": { "type": "string", "description": "Event ID to update" },
                    "summary": { "type": "string", "description": "New title/summary" },
                    "description": { "type": "string", "description": "New description" },
                    "location": { "type": "string", "description": "New location" },
                    "startTime": { "type": "string", "description": "New start time (ISO 8601)" },
                    "endTime": { "type": "string", "description": "New end time (ISO 8601)" }
                },
                "required": ["eventId"]
            }),
        },
        ToolDefinition {
            name: "calendar_delete_event",
            description: "Delete an event from Google Calendar.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "calendarId": { "type": "string", "description": "Calendar ID (default: primary)" },
                    "eventId": { "type": "string", "description": "Event ID to delete" }
                },
                "required": ["eventId"]
            }),
        },
        ToolDefinition {
            name: "calendar_list_calendars",
            description: "List the calendars on the user's calendar list.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cursor": { "type": "string", "description": "nextCursor from a previous call" }
                }
            }),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SearchArgs {
    query: String,
}

impl SearchArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            query: required_string(args, "query")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListArgs {
    cursor: Option<String>,
    task_list_id: String,
}

impl ListArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            cursor: arg_optional_string(args, "cursor")?,
            task_list_id: arg_string(args, "taskListId", DEFAULT_TASK_LIST)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CreateArgs {
    task_list_id: String,
    fields: TaskFields,
}

impl CreateArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            task_list_id: arg_string(args, "taskListId", DEFAULT_TASK_LIST)?,
            fields: TaskFields {
                title: Some(required_string(args, "title")?),
                notes: arg_optional_string(args, "notes")?,
                status: None,
                due: arg_optional_string(args, "due")?,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UpdateArgs {
    id: String,
    task_list_id: String,
    fields: TaskFields,
}

impl UpdateArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        let id = required_string(args, "id")?;
        let uri = required_string(args, "uri")?;
        let task_list_id = match arg_optional_string(args, "taskListId")? {
            Some(explicit) => explicit,
            None => task_list_from_uri(&id, &uri)?,
        };
        let status = arg_optional_string(args, "status")?;
        if let Some(status) = &status {
            if !TASK_STATUSES.contains(&status.as_str()) {
                return Err(ToolError::validation(format!(
                    "'status' must be one of {TASK_STATUSES:?}, got '{status}'"
                ))
                .with_field("status"));
            }
        }
        Ok(Self {
            id,
            task_list_id,
            fields: TaskFields {
                title: arg_optional_string(args, "title")?,
                notes: arg_optional_string(args, "notes")?,
                status,
                due: arg_optional_string(args, "due")?,
            },
        })
    }
}

/// The list owning a task, read from its URI: a `gtasks:///` address names no
/// list, a selfLink (`.../lists/{listId}/tasks/{taskId}`) does.
fn task_list_from_uri(id: &str, uri: &str) -> Result<String, ToolError> {
    let mismatch = |found: &str| {
        ToolError::validation(format!("'uri' addresses task '{found}' but 'id' is '{id}'"))
            .with_field("uri")
    };

    if uri.starts_with(&format!("{TASK_SCHEME}:")) {
        let address = ResourceUri::parse(uri).map_err(|err| {
            ToolError::new(codes::ADDRESS_PARSE_ERROR, err.to_string()).with_field("uri")
        })?;
        if let ResourceUri::Task { task_id } = &address {
            if task_id != id {
                return Err(mismatch(task_id));
            }
        }
        return Ok(DEFAULT_TASK_LIST.to_string());
    }

    let Ok(parsed) = url::Url::parse(uri) else {
        return Ok(DEFAULT_TASK_LIST.to_string());
    };
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.collect())
        .unwrap_or_default();
    let owner = segments
        .windows(4)
        .find(|w| w[0] == "lists" && w[2] == "tasks" && !w[1].is_empty());
    match owner {
        Some(window) if window[3] != id => Err(mismatch(window[3])),
        Some(window) => Ok(urlencoding::decode(window[1])
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| window[1].to_string())),
        None => Ok(DEFAULT_TASK_LIST.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeleteArgs {
    id: String,
    task_list_id: String,
}

impl DeleteArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            id: required_string(args, "id")?,
            task_list_id: arg_string(args, "taskListId", DEFAULT_TASK_LIST)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClearArgs {
    task_list_id: String,
}

impl ClearArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            task_list_id: required_string(args, "taskListId")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListEventsArgs {
    calendar_id: String,
    query: EventQuery,
}

impl ListEventsArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            calendar_id: arg_string(args, "calendarId", PRIMARY_CALENDAR)?,
            query: EventQuery {
                max_results: arg_clamped_limit(
                    args,
                    "maxResults",
                    DEFAULT_EVENT_RESULTS,
                    MAX_EVENT_RESULTS,
                )?,
                time_min: arg_optional_string(args, "timeMin")?,
                time_max: arg_optional_string(args, "timeMax")?,
                query: arg_optional_string(args, "query")?,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CreateEventArgs {
    calendar_id: String,
    summary: String,
    start_time: String,
    end_time: String,
    description: Option<String>,
    location: Option<String>,
    create_meet: bool,
}

impl CreateEventArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            calendar_id: arg_string(args, "calendarId", PRIMARY_CALENDAR)?,
            summary: required_string(args, "summary")?,
            start_time: required_string(args, "startTime")?,
            end_time: required_string(args, "endTime")?,
            description: arg_optional_string(args, "description")?,
            location: arg_optional_string(args, "location")?,
            create_meet: arg_bool(args, "createMeet", false)?,
        })
    }

    fn to_event(&self) -> CalendarEvent {
        let conference_data = self.create_meet.then(|| {
            json!({
                "createRequest": {
                    "requestId": meet_request_id(),
                    "conferenceSolutionKey": { "type": "hangoutsMeet" }
                }
            })
        });
        CalendarEvent {
            summary: Some(self.summary.clone()),
            description: self.description.clone(),
            location: self.location.clone(),
            start: Some(EventDateTime::at(self.start_time.as_str())),
            end: Some(EventDateTime::at(self.end_time.as_str())),
            conference_data,
            ..CalendarEvent::default()
        }
    }
}

fn meet_request_id() -> String {
    format!("meet-{}", Uuid::now_v7().simple())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UpdateEventArgs {
    calendar_id: String,
    event_id: String,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
}

impl UpdateEventArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            calendar_id: arg_string(args, "calendarId", PRIMARY_CALENDAR)?,
            event_id: required_string(args, "eventId")?,
            summary: arg_optional_string(args, "summary")?,
            description: arg_optional_string(args, "description")?,
            location: arg_optional_string(args, "location")?,
            start_time: arg_optional_string(args, "startTime")?,
            end_time: arg_optional_string(args, "endTime")?,
        })
    }

    fn to_patch(&self) -> CalendarEvent {
        CalendarEvent {
            summary: self.summary.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            start: self.start_time.as_deref().map(EventDateTime::at),
            end: self.end_time.as_deref().map(EventDateTime::at),
            ..CalendarEvent::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeleteEventArgs {
    calendar_id: String,
    event_id: String,
}

impl DeleteEventArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            calendar_id: arg_string(args, "calendarId", PRIMARY_CALENDAR)?,
            event_id: required_string(args, "eventId")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListCalendarsArgs {
    cursor: Option<String>,
}

impl ListCalendarsArgs {
    fn from_args(args: &Map<String, Value>) -> Result<Self, ToolError> {
        Ok(Self {
            cursor: arg_optional_string(args, "cursor")?,
        })
    }
}

pub struct ToolDispatcher {
    tasks: Arc<dyn TasksBackend>,
    calendar: Arc<dyn CalendarBackend>,
    registry: Arc<ResourceAddressRegistry>,
}

impl ToolDispatcher {
    pub fn new(backends: &Backends, registry: Arc<ResourceAddressRegistry>) -> Self {
        Self {
            tasks: backends.tasks.clone(),
            calendar: backends.calendar.clone(),
            registry,
        }
    }

    /// Validate, call the backend, render one envelope.
    pub async fn invoke(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<ResultEnvelope, ToolError> {
        let envelope = match name {
            "search" => self.search(SearchArgs::from_args(args)?).await,
            "list" => self.list(ListArgs::from_args(args)?).await,
            "create" => self.create(CreateArgs::from_args(args)?).await,
            "update" => self.update(UpdateArgs::from_args(args)?).await,
            "delete" => self.delete(DeleteArgs::from_args(args)?).await,
            "clear" => self.clear(ClearArgs::from_args(args)?).await,
            "calendar_list_events" => self.list_events(ListEventsArgs::from_args(args)?).await,
            "calendar_create_event" => self.create_event(CreateEventArgs::from_args(args)?).await,
            "calendar_update_event" => self.update_event(UpdateEventArgs::from_args(args)?).await,
            "calendar_delete_event" => self.delete_event(DeleteEventArgs::from_args(args)?).await,
            "calendar_list_calendars" => {
                self.list_calendars(ListCalendarsArgs::from_args(args)?).await
            }
            _ => {
                return Err(ToolError::new(codes::UNKNOWN_TOOL, format!("Unknown tool: {name}"))
                    .with_field("name")
                    .with_docs_hint("Call tools/list for the available tool names."));
            }
        };
        Ok(envelope)
    }

    async fn search(&self, args: SearchArgs) -> ResultEnvelope {
        let needle = args.query.to_lowercase();
        let matches = |text: &Option<String>| {
            text.as_deref()
                .is_some_and(|value| value.to_lowercase().contains(&needle))
        };
        match all_tasks(self.tasks.as_ref()).await {
            Ok(tasks) => {
                let found: Vec<Task> = tasks
                    .into_iter()
                    .filter(|task| matches(&task.title) || matches(&task.notes))
                    .collect();
                ResultEnvelope::text(format!(
                    "Found {} tasks matching '{}':\n{}",
                    found.len(),
                    args.query,
                    format_task_list(&found)
                ))
            }
            Err(err) => soft_error("searching tasks", &err),
        }
    }

    async fn list(&self, args: ListArgs) -> ResultEnvelope {
        let page = PageRequest::after(args.cursor, RESOURCE_PAGE_SIZE);
        match self.tasks.list_tasks(&args.task_list_id, &page).await {
            Ok(page) => {
                let mut text = format!(
                    "Found {} tasks:\n{}",
                    page.items.len(),
                    format_task_list(&page.items)
                );
                if let Some(cursor) = &page.next_cursor {
                    text.push_str(&format!("\n\nNext cursor: {cursor}"));
                }
                ResultEnvelope::text(text)
            }
            Err(err) => soft_error("listing tasks", &err),
        }
    }

    async fn create(&self, args: CreateArgs) -> ResultEnvelope {
        match self.tasks.insert_task(&args.task_list_id, &args.fields).await {
            Ok(task) => ResultEnvelope::text(format!(
                "Task created: {} (ID: {})",
                task.title.as_deref().unwrap_or("No title"),
                task.id.as_deref().unwrap_or("unknown")
            )),
            Err(err) => soft_error("creating task", &err),
        }
    }

    async fn update(&self, args: UpdateArgs) -> ResultEnvelope {
        match self
            .tasks
            .patch_task(&args.task_list_id, &args.id, &args.fields)
            .await
        {
            Ok(task) => ResultEnvelope::text(format!(
                "Task updated: {} (ID: {})",
                task.title.as_deref().unwrap_or("No title"),
                args.id
            )),
            Err(err) => soft_error("updating task", &err),
        }
    }

    async fn delete(&self, args: DeleteArgs) -> ResultEnvelope {
        match self.tasks.delete_task(&args.task_list_id, &args.id).await {
            Ok(()) => ResultEnvelope::text(format!("Task {} deleted", args.id)),
            Err(err) => soft_error("deleting task", &err),
        }
    }

    async fn clear(&self, args: ClearArgs) -> ResultEnvelope {
        match self.tasks.clear_completed(&args.task_list_id).await {
            Ok(()) => ResultEnvelope::text(format!(
                "Completed tasks cleared from list {}",
                args.task_list_id
            )),
            Err(err) => soft_error("clearing tasks", &err),
        }
    }

    async fn list_events(&self, args: ListEventsArgs) -> ResultEnvelope {
        match self.calendar.list_events(&args.calendar_id, &args.query).await {
            Ok(events) => ResultEnvelope::text(format!(
                "Found {} events in '{}':\n\n{}",
                events.len(),
                args.calendar_id,
                events.iter().map(format_event).collect::<Vec<_>>().join("\n\n")
            )),
            Err(err) => soft_error("listing events", &err),
        }
    }

    async fn create_event(&self, args: CreateEventArgs) -> ResultEnvelope {
        let event = args.to_event();
        let conference_data_version = u8::from(args.create_meet);
        match self
            .calendar
            .insert_event(&args.calendar_id, &event, conference_data_version)
            .await
        {
            Ok(created) => {
                let mut text = format!(
                    "Event created: {}",
                    created.html_link.as_deref().unwrap_or("(no link)")
                );
                if let Some(meet) = created.meet_link() {
                    text.push_str(&format!("\nGoogle Meet: {meet}"));
                }
                ResultEnvelope::text(text)
            }
            Err(err) => soft_error("creating event", &err),
        }
    }

    async fn update_event(&self, args: UpdateEventArgs) -> ResultEnvelope {
        match self
            .calendar
            .patch_event(&args.calendar_id, &args.event_id, &args.to_patch())
            .await
        {
            Ok(updated) => ResultEnvelope::text(format!(
                "Event updated: {} ({})",
                updated.summary.as_deref().unwrap_or("Untitled"),
                updated.html_link.as_deref().unwrap_or("no link")
            )),
            Err(err) => soft_error("updating event", &err),
        }
    }

    async fn delete_event(&self, args: DeleteEventArgs) -> ResultEnvelope {
        match self
            .calendar
            .delete_event(&args.calendar_id, &args.event_id)
            .await
        {
            Ok(()) => ResultEnvelope::text(format!(
                "Event with ID {} deleted successfully.",
                args.event_id
            )),
            Err(err) => soft_error("deleting event", &err),
        }
    }

    async fn list_calendars(&self, args: ListCalendarsArgs) -> ResultEnvelope {
        match self.registry.list(ResourceKind::Calendar, args.cursor).await {
            Ok(ResourceListing::Calendars(page)) => {
                let mut text = format!(
                    "Found {} calendars:\n{}",
                    page.items.len(),
                    page.items
                        .iter()
                        .map(format_calendar)
                        .collect::<Vec<_>>()
                        .join("\n")
                );
                if let Some(cursor) = &page.next_cursor {
                    text.push_str(&format!("\n\nNext cursor: {cursor}"));
                }
                ResultEnvelope::text(text)
            }
            Ok(ResourceListing::Tasks(_)) => {
                ResultEnvelope::error("Error listing calendars: unexpected listing kind")
            }
            Err(err) => ResultEnvelope::error(format!("Error listing calendars: {err}")),
        }
    }
}

fn soft_error(action: &str, err: &BackendError) -> ResultEnvelope {
    warn!(action, error = %err, "backend call failed");
    ResultEnvelope::error(format!("Error {action}: {err}"))
}

/// Every task of every list, following both levels of cursors to the end.
async fn all_tasks(tasks: &dyn TasksBackend) -> Result<Vec<Task>, BackendError> {
    let mut found = Vec::new();
    let mut list_cursor = None;
    loop {
        let lists = tasks
            .list_task_lists(&PageRequest::after(list_cursor, MAX_TASK_RESULTS))
            .await?;
        for list in &lists.items {
            let mut task_cursor = None;
            loop {
                let page = tasks
                    .list_tasks(&list.id, &PageRequest::after(task_cursor, MAX_TASK_RESULTS))
                    .await?;
                found.extend(page.items);
                match page.next_cursor {
                    Some(next) => task_cursor = Some(next),
                    None => break,
                }
            }
        }
        match lists.next_cursor {
            Some(next) => list_cursor = Some(next),
            None => return Ok(found),
        }
    }
}

fn format_task(task: &Task) -> String {
    format!(
        "- {} (ID: {})\n  Status: {}\n  Due: {}\n  Notes: {}",
        task.title.as_deref().unwrap_or("No title"),
        task.id.as_deref().unwrap_or("unknown"),
        task.status.as_deref().unwrap_or("Unknown"),
        task.due.as_deref().unwrap_or("Not set"),
        task.notes.as_deref().unwrap_or("No notes"),
    )
}

fn format_task_list(tasks: &[Task]) -> String {
    tasks.iter().map(format_task).collect::<Vec<_>>().join("\n")
}

fn format_event(event: &CalendarEvent) -> String {
    let start = event
        .start
        .as_ref()
        .and_then(EventDateTime::display)
        .unwrap_or("Unknown");
    let end = event
        .end
        .as_ref()
        .and_then(EventDateTime::display)
        .unwrap_or("Unknown");
    format!(
        "Event: {}\nTime: {start} - {end}\nDescription: {}\nLocation: {}\nID: {}\nLink: {}\nStatus: {}",
        event.summary.as_deref().unwrap_or("Untitled"),
        event.description.as_deref().unwrap_or("None"),
        event.location.as_deref().unwrap_or("None"),
        event.id.as_deref().unwrap_or("unknown"),
        event.html_link.as_deref().unwrap_or("None"),
        event.status.as_deref().unwrap_or("Unknown"),
    )
}

fn format_calendar(entry: &CalendarListEntry) -> String {
    let primary = if entry.primary == Some(true) { " [primary]" } else { "" };
    format!(
        "- {} (ID: {}){primary}",
        entry.summary.as_deref().unwrap_or("Untitled"),
        entry.id
    )
}
