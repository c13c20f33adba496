pub use crate::openai::count_tokens::request::{
    InputTokenCountRequest, InputTokenCountRequestBody,
};
pub use crate::openai::count_tokens::response::InputTokenCountResponse;
pub use crate::openai::count_tokens::types::InputTokenCount;
pub use crate::openai::create_chat_completions::request::{
    CreateChatCompletionRequest, CreateChatCompletionRequestBody, StopConfiguration,
};
pub use crate::openai::create_chat_completions::response::CreateChatCompletionResponse;
pub use crate::openai::create_chat_completions::stream::CreateChatCompletionStreamResponse;
pub use crate::openai::create_response::request::{
    CreateResponseRequest, CreateResponseRequestBody,
};
pub use crate::openai::create_response::response::Response;
pub use crate::openai::create_response::stream::ResponseStreamEvent;
pub use crate::openai::create_response::types::*;
pub use crate::openai::get_model::{GetModelPath, GetModelRequest, GetModelResponse, Model};
pub use crate::openai::list_models::{ListModelsRequest, ListModelsResponse};
