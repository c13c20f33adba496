use crate::gemini::generate_content::response::GenerateContentResponse;

/// Each streamed chunk shares `GenerateContentResponse`'s schema; only
/// `candidates` is typically populated per chunk.
pub type StreamGenerateContentResponse = GenerateContentResponse;
