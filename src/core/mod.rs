pub mod app;
pub mod builtin_providers;
pub mod chat_stream;
pub mod chatbot;
pub mod config;
pub mod dispatch;
pub mod message;
pub mod providers;
pub mod ui_stream;
