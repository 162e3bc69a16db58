pub mod chat_service;
pub mod history_pager;
pub mod http_api;
pub mod message_parser;
pub mod notification_service;
pub mod realtime_channel;
pub mod websocket_client;
