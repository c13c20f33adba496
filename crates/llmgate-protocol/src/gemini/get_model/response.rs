use crate::gemini::get_model::types::Model;

pub type GetModelResponse = Model;
