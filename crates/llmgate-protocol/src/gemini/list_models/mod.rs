pub mod request;
pub mod response;

pub use request::{ListModelsQuery, ListModelsRequest};
pub use response::ListModelsResponse;
