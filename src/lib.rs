//! Headless client for the social app's real-time channels.
//!
//! Two sockets (chat and notifications) each run in their own task, driven by
//! a `ChannelHandler`; history paging and the other request/response endpoints
//! go through `ApiClient`.
pub mod client;
