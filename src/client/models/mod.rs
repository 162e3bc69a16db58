pub mod app_state;
pub mod attachments;
pub mod messages;
pub mod ui_state;
