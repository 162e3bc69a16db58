use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Duration;
use url::Url;

use social_realtime::client::config::ClientConfig;
use social_realtime::client::models::attachments::{StagedAttachments, StagedFile};
use social_realtime::client::services::chat_service::{send_with_attachments, ChatService};
use social_realtime::client::services::history_pager::{HistoryPager, HistorySource};
use social_realtime::client::services::http_api::{ApiClient, ApiError, ReactionBoard, ReactionTarget};
use social_realtime::client::services::realtime_channel::{self, ChannelConfig};
use social_realtime::client::services::websocket_client::WsConnector;

fn has_csrf(headers: &HeaderMap) -> bool {
    headers.get("x-csrftoken").map_or(false, |v| v == "tok")
        && headers.get("x-requested-with").map_or(false, |v| v == "XMLHttpRequest")
}

async fn messages(Path(room): Path<i64>, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    assert_eq!(room, 4);
    assert_eq!(q.get("page_size").map(String::as_str), Some("3"));
    // ids 1..=7 exist; pages of 3, newest first
    let before: i64 = q.get("before_id").and_then(|b| b.parse().ok()).unwrap_or(8);
    let ids: Vec<i64> = (1..before).rev().take(3).collect();
    let messages: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "text": format!("m{}", id), "is_mine": false,
                         "sender": {"id": 2, "username": "zeynep"}, "attachments": []}))
        .collect();
    Json(json!({
        "messages": messages,
        "pagination": {"has_more": ids.last().map_or(false, |&last| last > 1), "oldest_message_id": ids.last()}
    }))
}

async fn upload(headers: HeaderMap, mut multipart: Multipart) -> (StatusCode, Json<Value>) {
    if !has_csrf(&headers) {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "CSRF"})));
    }
    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        fields.push(field.name().unwrap_or_default().to_string());
    }
    assert_eq!(fields, vec!["chat_room_id", "message", "image_0", "image_1"]);
    (StatusCode::OK, Json(json!({"success": true, "message_id": 77, "files": []})))
}

async fn search(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    assert_eq!(q.get("q").map(String::as_str), Some("ze"));
    Json(json!({"users": [{"id": 2, "username": "zeynep", "full_name": "Zeynep K", "avatar": null}]}))
}

async fn create_room(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    assert!(has_csrf(&headers));
    if body["user_id"] == 13 {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "This user only accepts messages from followers", "privacy_error": true})));
    }
    (StatusCode::OK, Json(json!({"id": 5, "status": "created"})))
}

async fn like(headers: HeaderMap, Form(form): Form<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
    if !has_csrf(&headers) {
        return (StatusCode::FORBIDDEN, Json(json!({})));
    }
    assert_eq!(form.get("app_name").map(String::as_str), Some("blog"));
    assert_eq!(form.get("object_id").map(String::as_str), Some("9"));
    (StatusCode::OK, Json(json!({"status": "success", "liked": true, "like_count": 4, "message": "Liked"})))
}

async fn bookmark_status() -> Json<Value> {
    Json(json!({"status": "error", "message": "Login required"}))
}

async fn serve() -> String {
    let app = Router::new()
        .route("/chat/:room/messages/", get(messages))
        .route("/chat/upload-attachments/", post(upload))
        .route("/chat/users/search/", get(search))
        .route("/chat/rooms/", post(create_room))
        .route("/chat/:room/delete/", post(|| async { Json(json!({"status": "success"})) }))
        .route("/like/like/", post(like))
        .route(
            "/like/status/",
            get(|| async { Json(json!({"status": "success", "liked": false, "like_count": 3})) }),
        )
        .route("/bookmark/status/", get(bookmark_status));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base: &str) -> ApiClient {
    ApiClient::new(format!("{}/", base), Some("tok".into()), Some("sess".into()))
}

#[tokio::test]
async fn pager_walks_history_to_the_beginning() {
    let api = client(&serve().await);
    let mut pager = HistoryPager::new(3);
    let mut pages = 0;
    while let Some(request) = pager.begin(4) {
        let page = api.fetch_page(request).await.unwrap();
        pager.complete(request, page);
        pages += 1;
    }
    assert_eq!(pages, 3);
    let ids: Vec<i64> = pager.messages(4).iter().map(|m| m.id).collect();
    assert_eq!(ids, (1..=7).collect::<Vec<_>>());
    assert_eq!(pager.cursor(4), Some(1));
    assert_eq!(pager.messages(4)[0].sender_name, "zeynep");
}

#[tokio::test]
async fn seeded_pager_only_fetches_older_history() {
    let api = client(&serve().await);
    let mut pager = HistoryPager::new(3);
    pager.seed_from_ids(4, [6, 5]);
    while let Some(request) = pager.begin(4) {
        let page = api.fetch_page(request).await.unwrap();
        pager.complete(request, page);
    }
    let ids: Vec<i64> = pager.messages(4).iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn upload_sends_multipart_with_csrf() {
    let api = client(&serve().await);
    let mut staged = StagedAttachments::default();
    staged
        .add(vec![
            StagedFile::new("a.png", "image/png", vec![1, 2, 3]),
            StagedFile::new("b.jpg", "image/jpeg", vec![4, 5]),
        ])
        .unwrap();
    assert_eq!(api.upload_attachments(4, "caption", &staged).await.unwrap(), 77);

    let anonymous = ApiClient::new(serve().await, None, None);
    match anonymous.upload_attachments(4, "", &staged).await {
        Err(ApiError::UnexpectedStatus { status, .. }) => assert_eq!(status, 403),
        other => panic!("expected 403, got {:?}", other),
    }
}

#[tokio::test]
async fn upload_is_reported_when_chat_channel_is_gone() {
    let api = client(&serve().await);
    let config = ClientConfig::default();
    let (tx, _events) = mpsc::unbounded_channel();
    let chat = realtime_channel::spawn(
        ChatService::new(&config, Arc::new(api.clone()), tx),
        ChannelConfig {
            url: Url::parse("ws://127.0.0.1:9/ws/chat/").unwrap(),
            reconnect_delay: Duration::from_secs(30),
            liveness_interval: Duration::from_secs(30),
        },
        WsConnector::default(),
    );
    let sender = chat.sender();
    chat.shutdown().await;

    let mut staged = StagedAttachments::default();
    staged
        .add(vec![
            StagedFile::new("a.png", "image/png", vec![1]),
            StagedFile::new("b.png", "image/png", vec![2]),
        ])
        .unwrap();
    let err = send_with_attachments(&api, &sender, 4, "caption", config.max_message_chars, &mut staged)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("77"), "{}", err);
    // the upload itself went through
    assert!(staged.is_empty());
}

#[tokio::test]
async fn search_and_room_management() {
    let api = client(&serve().await);
    let users = api.search_users("ze").await.unwrap();
    assert_eq!(users[0].full_name, "Zeynep K");

    assert_eq!(api.create_room(2).await.unwrap(), 5);
    match api.create_room(13).await {
        Err(ApiError::Rejected(msg)) => assert!(msg.contains("followers")),
        other => panic!("expected privacy rejection, got {:?}", other),
    }
    assert_eq!(api.delete_room(5).await.unwrap(), "success");
}

#[tokio::test]
async fn reactions_update_board_and_surface_rejections() {
    let api = client(&serve().await);
    let board = ReactionBoard::default();
    let post = ReactionTarget::new("blog", "post", 9);

    let current = board.refresh_like(&api, &post).await.unwrap();
    assert_eq!(current.like_count, 3);
    assert_eq!(board.like(&post).await, Some(current));

    let liked = board.toggle_like(&api, &post).await.unwrap().unwrap();
    assert!(liked.liked);
    assert_eq!(board.like(&post).await.unwrap().like_count, 4);

    match api.bookmark_status(&post).await {
        Err(ApiError::Rejected(msg)) => assert_eq!(msg, "Login required"),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(board.bookmark(&post).await.is_none());
}

#[tokio::test]
async fn second_toggle_while_first_in_flight_is_refused() {
    let api = client(&serve().await);
    let board = ReactionBoard::default();
    let other_task = board.clone();
    let post = ReactionTarget::new("blog", "post", 9);

    let (first, second) = tokio::join!(board.toggle_like(&api, &post), other_task.toggle_like(&api, &post));
    assert!(matches!(first, Some(Ok(_))));
    assert!(second.is_none());

    // re-enabled once the first one finished
    assert!(board.toggle_like(&api, &post).await.is_some());
}
