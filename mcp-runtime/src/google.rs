//! Google Tasks and Google Calendar REST clients.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::backend::{
    BackendError, Backends, CalendarBackend, CalendarEvent, CalendarListEntry, EventQuery, Page,
    PageRequest, Task, TaskFields, TaskList, TasksBackend,
};
use crate::oauth::OAuthSession;

pub const TASKS_API_BASE: &str = "https://tasks.googleapis.com/tasks/v1";
pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleEndpoints {
    pub tasks_base: String,
    pub calendar_base: String,
    /// Overrides the keyfile's `token_uri` for refresh when set.
    pub token_uri: Option<String>,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            tasks_base: TASKS_API_BASE.to_string(),
            calendar_base: CALENDAR_API_BASE.to_string(),
            token_uri: None,
        }
    }
}

impl GoogleEndpoints {
    /// Every endpoint rooted at one base URL, for mock servers.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            tasks_base: format!("{base}/tasks/v1"),
            calendar_base: format!("{base}/calendar/v3"),
            token_uri: Some(format!("{base}/token")),
        }
    }
}

/// Authenticated client capability produced once at startup and handed to
/// dispatch. Cloning shares the underlying session.
#[derive(Clone)]
pub struct AuthenticatedClientFactory {
    http: reqwest::Client,
    session: Arc<OAuthSession>,
    endpoints: GoogleEndpoints,
}

impl AuthenticatedClientFactory {
    pub fn new(http: reqwest::Client, session: Arc<OAuthSession>, endpoints: GoogleEndpoints) -> Self {
        Self {
            http,
            session,
            endpoints,
        }
    }

    pub fn session(&self) -> &Arc<OAuthSession> {
        &self.session
    }

    pub fn backends(&self) -> Backends {
        let api = GoogleApi {
            http: self.http.clone(),
            session: self.session.clone(),
        };
        Backends {
            tasks: Arc::new(GoogleTasks {
                api: api.clone(),
                base: self.endpoints.tasks_base.clone(),
            }),
            calendar: Arc::new(GoogleCalendar {
                api,
                base: self.endpoints.calendar_base.clone(),
            }),
        }
    }
}

#[derive(Clone)]
struct GoogleApi {
    http: reqwest::Client,
    session: Arc<OAuthSession>,
}

impl GoogleApi {
    /// Send an authorized request. A 401 triggers one refresh and one retry.
    /// Success with an empty body yields `None`.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<T>, BackendError> {
        let token = self
            .session
            .access_token()
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?;
        let mut resp = self.execute(&method, url, query, body, &token).await?;

        if resp.status() == StatusCode::UNAUTHORIZED && self.session.can_refresh() {
            debug!(%url, "access token rejected; refreshing and retrying once");
            let token = self
                .session
                .refresh_now()
                .await
                .map_err(|e| BackendError::Auth(e.to_string()))?;
            resp = self.execute(&method, url, query, body, &token).await?;
        }

        let status = resp.status();
        if status.is_success() {
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| BackendError::Transport(e.to_string()))?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(None);
            }
            return serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| BackendError::Transport(format!("unexpected response body: {e}")));
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let message = google_error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        debug!(%url, status = status.as_u16(), %message, "google api call failed");
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(BackendError::NotFound(message)),
            StatusCode::UNAUTHORIZED => Err(BackendError::Auth(message)),
            _ => Err(BackendError::Provider {
                status: status.as_u16(),
                message,
            }),
        }
    }

    async fn send_required<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T, BackendError> {
        self.send(method, url, query, body)
            .await?
            .ok_or_else(|| BackendError::Transport("empty response body".to_string()))
    }

    async fn execute(
        &self,
        method: &Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: &str,
    ) -> Result<reqwest::Response, BackendError> {
        let mut req = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))
    }
}

/// Google error bodies look like `{"error": {"code": 404, "message": "..."}}`.
fn google_error_message(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, BackendError> {
    serde_json::to_value(value).map_err(|e| BackendError::Transport(format!("unserializable body: {e}")))
}

fn seg(raw: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(raw)
}

fn page_query(page: &PageRequest) -> Vec<(&'static str, String)> {
    let mut query = vec![("maxResults", page.page_size.to_string())];
    if let Some(cursor) = &page.cursor {
        query.push(("pageToken", cursor.clone()));
    }
    query
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl<T> ListResponse<T> {
    fn into_page(self) -> Page<T> {
        Page {
            items: self.items,
            next_cursor: self.next_page_token.filter(|token| !token.is_empty()),
        }
    }
}

struct GoogleTasks {
    api: GoogleApi,
    base: String,
}

#[async_trait]
impl TasksBackend for GoogleTasks {
    async fn list_task_lists(&self, page: &PageRequest) -> Result<Page<TaskList>, BackendError> {
        let url = format!("{}/users/@me/lists", self.base);
        let resp: Option<ListResponse<TaskList>> =
            self.api.send(Method::GET, &url, &page_query(page), None).await?;
        Ok(resp.map(ListResponse::into_page).unwrap_or(Page {
            items: Vec::new(),
            next_cursor: None,
        }))
    }

    async fn list_tasks(&self, task_list: &str, page: &PageRequest) -> Result<Page<Task>, BackendError> {
        let url = format!("{}/lists/{}/tasks", self.base, seg(task_list));
        let resp: Option<ListResponse<Task>> =
            self.api.send(Method::GET, &url, &page_query(page), None).await?;
        Ok(resp.map(ListResponse::into_page).unwrap_or(Page {
            items: Vec::new(),
            next_cursor: None,
        }))
    }

    async fn get_task(&self, task_list: &str, task_id: &str) -> Result<Task, BackendError> {
        let url = format!("{}/lists/{}/tasks/{}", self.base, seg(task_list), seg(task_id));
        self.api.send_required(Method::GET, &url, &[], None).await
    }

    async fn insert_task(&self, task_list: &str, fields: &TaskFields) -> Result<Task, BackendError> {
        let url = format!("{}/lists/{}/tasks", self.base, seg(task_list));
        let body = to_body(fields)?;
        self.api.send_required(Method::POST, &url, &[], Some(&body)).await
    }

    async fn patch_task(
        &self,
        task_list: &str,
        task_id: &str,
        fields: &TaskFields,
    ) -> Result<Task, BackendError> {
        let url = format!("{}/lists/{}/tasks/{}", self.base, seg(task_list), seg(task_id));
        let body = to_body(fields)?;
        self.api.send_required(Method::PATCH, &url, &[], Some(&body)).await
    }

    async fn delete_task(&self, task_list: &str, task_id: &str) -> Result<(), BackendError> {
        let url = format!("{}/lists/{}/tasks/{}", self.base, seg(task_list), seg(task_id));
        self.api
            .send::<Value>(Method::DELETE, &url, &[], None)
            .await
            .map(|_| ())
    }

    async fn clear_completed(&self, task_list: &str) -> Result<(), BackendError> {
        let url = format!("{}/lists/{}/clear", self.base, seg(task_list));
        self.api
            .send::<Value>(Method::POST, &url, &[], None)
            .await
            .map(|_| ())
    }
}

struct GoogleCalendar {
    api: GoogleApi,
    base: String,
}

#[async_trait]
impl CalendarBackend for GoogleCalendar {
    async fn list_calendars(
        &self,
        page: &PageRequest,
    ) -> Result<Page<CalendarListEntry>, BackendError> {
        let url = format!("{}/users/me/calendarList", self.base);
        let resp: Option<ListResponse<CalendarListEntry>> =
            self.api.send(Method::GET, &url, &page_query(page), None).await?;
        Ok(resp.map(ListResponse::into_page).unwrap_or(Page {
            items: Vec::new(),
            next_cursor: None,
        }))
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<CalendarEvent>, BackendError> {
        let url = format!("{}/calendars/{}/events", self.base, seg(calendar_id));
        let mut params = vec![
            ("maxResults", query.max_results.to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        if let Some(time_min) = &query.time_min {
            params.push(("timeMin", time_min.clone()));
        }
        if let Some(time_max) = &query.time_max {
            params.push(("timeMax", time_max.clone()));
        }
        if let Some(q) = &query.query {
            params.push(("q", q.clone()));
        }
        let resp: Option<ListResponse<CalendarEvent>> =
            self.api.send(Method::GET, &url, &params, None).await?;
        Ok(resp.map(|r| r.items).unwrap_or_default())
    }

    async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<CalendarEvent, BackendError> {
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base,
            seg(calendar_id),
            seg(event_id)
        );
        self.api.send_required(Method::GET, &url, &[], None).await
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &CalendarEvent,
        conference_data_version: u8,
    ) -> Result<CalendarEvent, BackendError> {
        let url = format!("{}/calendars/{}/events", self.base, seg(calendar_id));
        let body = to_body(event)?;
        let query = [("conferenceDataVersion", conference_data_version.to_string())];
        self.api
            .send_required(Method::POST, &url, &query, Some(&body))
            .await
    }

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &CalendarEvent,
    ) -> Result<CalendarEvent, BackendError> {
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base,
            seg(calendar_id),
            seg(event_id)
        );
        let body = to_body(event)?;
        self.api
            .send_required(Method::PATCH, &url, &[], Some(&body))
            .await
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), BackendError> {
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base,
            seg(calendar_id),
            seg(event_id)
        );
        self.api
            .send::<Value>(Method::DELETE, &url, &[], None)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{AuthError, TokenRefresher};
    use gtasks_core::credentials::{CredentialBundle, TokenUpdate, now_millis};
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticRefresher(&'static str);

    #[async_trait]
    impl TokenRefresher for StaticRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenUpdate, AuthError> {
            Ok(TokenUpdate {
                access_token: Some(self.0.to_string()),
                expiry_date: Some(now_millis() + 3_600_000),
                ..TokenUpdate::default()
            })
        }
    }

    fn factory(server: &MockServer, refresher: Option<Arc<dyn TokenRefresher>>) -> AuthenticatedClientFactory {
        let bundle = CredentialBundle::new("old")
            .with_refresh_token("r")
            .with_expiry_date(now_millis() + 3_600_000);
        AuthenticatedClientFactory::new(
            reqwest::Client::new(),
            Arc::new(OAuthSession::new(bundle, refresher)),
            GoogleEndpoints::rooted_at(&server.uri()),
        )
    }

    #[tokio::test]
    async fn list_tasks_forwards_the_cursor_and_returns_the_next_one() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/v1/lists/L1/tasks"))
            .and(query_param("maxResults", "10"))
            .and(query_param("pageToken", "c1"))
            .and(header("authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "id": "t1", "title": "Buy milk" }],
                "nextPageToken": "c2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backends = factory(&server, None).backends();
        let page = backends
            .tasks
            .list_tasks("L1", &PageRequest::after(Some("c1".to_string()), 10))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].title.as_deref(), Some("Buy milk"));
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn unauthorized_response_refreshes_once_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/v1/users/@me/lists"))
            .and(header("authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "code": 401, "message": "Invalid Credentials" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/v1/users/@me/lists"))
            .and(header("authorization", "Bearer renewed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "id": "L1", "title": "Inbox" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let factory = factory(&server, Some(Arc::new(StaticRefresher("renewed"))));
        let observed = Arc::new(Mutex::new(0));
        let counter = observed.clone();
        factory.session().on_refresh(move |_| *counter.lock().unwrap() += 1);

        let page = factory
            .backends()
            .tasks
            .list_task_lists(&PageRequest::first(100))
            .await
            .unwrap();
        assert_eq!(page.items[0].id, "L1");
        assert_eq!(page.next_cursor, None);
        assert_eq!(*observed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn not_found_is_distinguished_from_other_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/v1/lists/L1/tasks/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": 404, "message": "Task not found." }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks/v1/lists/L1/tasks"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "Invalid task title." }
            })))
            .mount(&server)
            .await;

        let tasks = factory(&server, None).backends().tasks;
        let missing = tasks.get_task("L1", "missing").await.unwrap_err();
        assert_eq!(missing, BackendError::NotFound("Task not found.".to_string()));

        let rejected = tasks
            .insert_task("L1", &TaskFields::default())
            .await
            .unwrap_err();
        assert_eq!(
            rejected,
            BackendError::Provider {
                status: 400,
                message: "Invalid task title.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn patch_sends_only_supplied_fields_and_delete_accepts_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/tasks/v1/lists/L1/tasks/t1"))
            .and(body_json(json!({ "notes": "hi" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "t1", "title": "Buy milk", "notes": "hi"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/tasks/v1/lists/L1/tasks/t1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let tasks = factory(&server, None).backends().tasks;
        let fields = TaskFields {
            notes: Some("hi".to_string()),
            ..TaskFields::default()
        };
        let patched = tasks.patch_task("L1", "t1", &fields).await.unwrap();
        assert_eq!(patched.notes.as_deref(), Some("hi"));
        tasks.delete_task("L1", "t1").await.unwrap();
    }

    #[tokio::test]
    async fn calendar_ids_are_percent_encoded_in_paths() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/team%40example.com/events/e1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "e1", "summary": "Planning"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let calendar = factory(&server, None).backends().calendar;
        let event = calendar.get_event("team@example.com", "e1").await.unwrap();
        assert_eq!(event.summary.as_deref(), Some("Planning"));
    }

    #[tokio::test]
    async fn list_events_expands_recurring_events_in_start_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("orderBy", "startTime"))
            .and(query_param("maxResults", "5"))
            .and(query_param("q", "standup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "id": "e1" }, { "id": "e2" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let calendar = factory(&server, None).backends().calendar;
        let events = calendar
            .list_events(
                "primary",
                &EventQuery {
                    max_results: 5,
                    query: Some("standup".to_string()),
                    ..EventQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn insert_event_sends_the_conference_data_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(query_param("conferenceDataVersion", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "e9",
                "htmlLink": "https://calendar.example/e9",
                "conferenceData": { "entryPoints": [{ "uri": "https://meet.google.com/x" }] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let calendar = factory(&server, None).backends().calendar;
        let created = calendar
            .insert_event("primary", &CalendarEvent::default(), 1)
            .await
            .unwrap();
        assert_eq!(created.meet_link(), Some("https://meet.google.com/x"));
    }
}
