//! Request/response endpoints of the web application: history pages,
//! attachment uploads, user search, room management, likes and bookmarks.
//!
//! Every mutating request carries the CSRF token and the AJAX marker header;
//! the server rejects them otherwise.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::client::models::attachments::StagedAttachments;
use crate::client::models::messages::{HistoryPage, MessageId, RoomId, UserId, UserSummary};
use crate::client::services::history_pager::{HistorySource, PageRequest};

pub const MIN_SEARCH_CHARS: usize = 2;

#[derive(Debug)]
pub enum ApiError {
    Http(reqwest::Error),
    UnexpectedStatus { status: StatusCode, body: String },
    /// The server answered but refused the action.
    Rejected(String),
    Decode(serde_json::Error),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Http(e) => write!(f, "HTTP request failed: {}", e),
            ApiError::UnexpectedStatus { status, body } => write!(f, "Unexpected status {}: {}", status, body),
            ApiError::Rejected(msg) => write!(f, "{}", msg),
            ApiError::Decode(e) => write!(f, "Invalid response: {}", e),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Http(e)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e)
    }
}

/// An object that can be liked or bookmarked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ReactionTarget {
    pub app_name: String,
    pub model_name: String,
    pub object_id: i64,
}

impl ReactionTarget {
    pub fn new(app_name: impl Into<String>, model_name: impl Into<String>, object_id: i64) -> Self {
        ReactionTarget { app_name: app_name.into(), model_name: model_name.into(), object_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookmarkState {
    pub is_bookmarked: bool,
    pub bookmark_count: i64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    body: T,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, ApiError> {
        if self.status == "success" {
            Ok(self.body)
        } else {
            Err(ApiError::Rejected(self.message.unwrap_or(self.status)))
        }
    }
}

#[derive(Debug, Deserialize)]
struct LikeBody {
    #[serde(default)]
    liked: bool,
    #[serde(default)]
    like_count: i64,
}

#[derive(Debug, Deserialize)]
struct BookmarkBody {
    #[serde(default)]
    is_bookmarked: bool,
    #[serde(default)]
    bookmark_count: i64,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message_id: Option<MessageId>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    users: Vec<UserSummary>,
}

#[derive(Debug, Deserialize)]
struct CreateRoomResponse {
    #[serde(default)]
    id: Option<RoomId>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    privacy_error: bool,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    csrf_token: Option<String>,
    session_cookie: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, csrf_token: Option<String>, session_cookie: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            csrf_token,
            session_cookie,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn cookie_header(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(session) = &self.session_cookie {
            parts.push(format!("sessionid={}", session));
        }
        if let Some(csrf) = &self.csrf_token {
            parts.push(format!("csrftoken={}", csrf));
        }
        (!parts.is_empty()).then(|| parts.join("; "))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let mut req = self.http.get(self.url(path)).header("X-Requested-With", "XMLHttpRequest");
        if let Some(cookies) = self.cookie_header() {
            req = req.header(reqwest::header::COOKIE, cookies);
        }
        req
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let mut req = self
            .http
            .post(self.url(path))
            .header("X-Requested-With", "XMLHttpRequest")
            .header(reqwest::header::REFERER, self.url("/"));
        if let Some(csrf) = &self.csrf_token {
            req = req.header("X-CSRFToken", csrf);
        }
        if let Some(cookies) = self.cookie_header() {
            req = req.header(reqwest::header::COOKIE, cookies);
        }
        req
    }

    async fn read_json<T: DeserializeOwned>(res: Response) -> Result<T, ApiError> {
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(ApiError::UnexpectedStatus { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn fetch_messages(
        &self,
        room_id: RoomId,
        before_id: Option<MessageId>,
        page_size: u32,
    ) -> Result<HistoryPage, ApiError> {
        let mut query = vec![("page_size", page_size.to_string())];
        if let Some(before) = before_id {
            query.push(("before_id", before.to_string()));
        }
        debug!("[HTTP] GET history room={} before={:?}", room_id, before_id);
        let res = self.get(&format!("/chat/{}/messages/", room_id)).query(&query).send().await?;
        Self::read_json(res).await
    }

    /// Upload staged images with an optional caption. Returns the id of the
    /// message the server created.
    pub async fn upload_attachments(
        &self,
        room_id: RoomId,
        text: &str,
        staged: &StagedAttachments,
    ) -> Result<MessageId, ApiError> {
        let mut form = reqwest::multipart::Form::new()
            .text("chat_room_id", room_id.to_string())
            .text("message", text.to_string());
        for (i, file) in staged.files().iter().enumerate() {
            let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.name.clone())
                .mime_str(&file.mime_type)?;
            form = form.part(format!("image_{}", i), part);
        }
        info!("[HTTP] Uploading {} attachment(s) to room {}", staged.len(), room_id);
        let res = self.post("/chat/upload-attachments/").multipart(form).send().await?;
        let upload: UploadResponse = Self::read_json(res).await?;
        match (upload.success, upload.message_id) {
            (true, Some(id)) => Ok(id),
            _ => Err(ApiError::Rejected(upload.error.unwrap_or_else(|| "Upload failed".to_string()))),
        }
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>, ApiError> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_CHARS {
            return Ok(Vec::new());
        }
        let res = self.get("/chat/users/search/").query(&[("q", query)]).send().await?;
        let found: SearchResponse = Self::read_json(res).await?;
        Ok(found.users)
    }

    pub async fn create_room(&self, user_id: UserId) -> Result<RoomId, ApiError> {
        let res = self
            .post("/chat/rooms/")
            .json(&serde_json::json!({ "user_id": user_id }))
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if status == StatusCode::FORBIDDEN {
            if let Ok(refused) = serde_json::from_str::<CreateRoomResponse>(&body) {
                if refused.privacy_error || refused.error.is_some() {
                    let msg = refused.error.unwrap_or_else(|| "Not allowed".to_string());
                    warn!("[HTTP] Room creation refused: {}", msg);
                    return Err(ApiError::Rejected(msg));
                }
            }
        }
        if !status.is_success() {
            return Err(ApiError::UnexpectedStatus { status, body });
        }
        let created: CreateRoomResponse = serde_json::from_str(&body)?;
        created
            .id
            .ok_or_else(|| ApiError::Rejected(created.error.unwrap_or_else(|| "No room id returned".to_string())))
    }

    pub async fn delete_room(&self, room_id: RoomId) -> Result<String, ApiError> {
        let res = self.post(&format!("/chat/{}/delete/", room_id)).send().await?;
        let deleted: StatusResponse = Self::read_json(res).await?;
        Ok(deleted.status)
    }

    pub async fn toggle_like(&self, target: &ReactionTarget) -> Result<LikeState, ApiError> {
        let res = self.post("/like/like/").form(target).send().await?;
        let body = Self::read_json::<Envelope<LikeBody>>(res).await?.into_result()?;
        Ok(LikeState { liked: body.liked, like_count: body.like_count })
    }

    pub async fn like_status(&self, target: &ReactionTarget) -> Result<LikeState, ApiError> {
        let res = self.get("/like/status/").query(target).send().await?;
        let body = Self::read_json::<Envelope<LikeBody>>(res).await?.into_result()?;
        Ok(LikeState { liked: body.liked, like_count: body.like_count })
    }

    pub async fn toggle_bookmark(&self, target: &ReactionTarget) -> Result<BookmarkState, ApiError> {
        let res = self.post("/bookmark/bookmark/").form(target).send().await?;
        let body = Self::read_json::<Envelope<BookmarkBody>>(res).await?.into_result()?;
        Ok(BookmarkState { is_bookmarked: body.is_bookmarked, bookmark_count: body.bookmark_count })
    }

    pub async fn bookmark_status(&self, target: &ReactionTarget) -> Result<BookmarkState, ApiError> {
        let res = self.get("/bookmark/status/").query(target).send().await?;
        let body = Self::read_json::<Envelope<BookmarkBody>>(res).await?.into_result()?;
        Ok(BookmarkState { is_bookmarked: body.is_bookmarked, bookmark_count: body.bookmark_count })
    }
}

#[async_trait]
impl HistorySource for ApiClient {
    async fn fetch_page(&self, request: PageRequest) -> Result<HistoryPage, ApiError> {
        self.fetch_messages(request.room_id, request.before_id, request.page_size).await
    }
}

/// Like/bookmark button state for one target: the last known value and
/// whether a toggle is in flight (button disabled).
#[derive(Debug, Clone)]
pub struct ReactionToggle<S> {
    state: Option<S>,
    in_flight: bool,
}

impl<S> Default for ReactionToggle<S> {
    fn default() -> Self {
        ReactionToggle { state: None, in_flight: false }
    }
}

impl<S: Copy> ReactionToggle<S> {
    pub fn state(&self) -> Option<S> {
        self.state
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// `false` if a toggle is already running.
    pub fn begin(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn set_state(&mut self, state: S) {
        self.state = Some(state);
    }

    /// Re-enable and keep the previous state unless the toggle succeeded.
    pub fn finish(&mut self, result: &Result<S, ApiError>) {
        self.in_flight = false;
        if let Ok(state) = result {
            self.state = Some(*state);
        }
    }
}

/// All reaction buttons a client is showing. Clones share the same state,
/// so a toggle started from one task is seen as in flight by the others.
#[derive(Debug, Clone, Default)]
pub struct ReactionBoard {
    inner: Arc<Mutex<Reactions>>,
}

#[derive(Debug, Default)]
struct Reactions {
    likes: HashMap<ReactionTarget, ReactionToggle<LikeState>>,
    bookmarks: HashMap<ReactionTarget, ReactionToggle<BookmarkState>>,
}

impl ReactionBoard {
    pub async fn like(&self, target: &ReactionTarget) -> Option<LikeState> {
        self.inner.lock().await.likes.get(target).and_then(|t| t.state())
    }

    pub async fn bookmark(&self, target: &ReactionTarget) -> Option<BookmarkState> {
        self.inner.lock().await.bookmarks.get(target).and_then(|t| t.state())
    }

    /// `None` if a like toggle for `target` is already running.
    pub async fn toggle_like(&self, api: &ApiClient, target: &ReactionTarget) -> Option<Result<LikeState, ApiError>> {
        if !self.inner.lock().await.likes.entry(target.clone()).or_default().begin() {
            return None;
        }
        let result = api.toggle_like(target).await;
        self.inner.lock().await.likes.entry(target.clone()).or_default().finish(&result);
        Some(result)
    }

    pub async fn toggle_bookmark(
        &self,
        api: &ApiClient,
        target: &ReactionTarget,
    ) -> Option<Result<BookmarkState, ApiError>> {
        if !self.inner.lock().await.bookmarks.entry(target.clone()).or_default().begin() {
            return None;
        }
        let result = api.toggle_bookmark(target).await;
        self.inner.lock().await.bookmarks.entry(target.clone()).or_default().finish(&result);
        Some(result)
    }

    /// Load the current like state of a button shown for the first time.
    pub async fn refresh_like(&self, api: &ApiClient, target: &ReactionTarget) -> Result<LikeState, ApiError> {
        let state = api.like_status(target).await?;
        self.inner.lock().await.likes.entry(target.clone()).or_default().set_state(state);
        Ok(state)
    }
}
