pub mod count_tokens;
pub mod create_chat_completions;
pub mod create_response;
pub mod get_model;
pub mod list_models;
pub mod types;

pub use types::*;
