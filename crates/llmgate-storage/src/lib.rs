pub mod db;
pub mod entities;
pub mod seaorm;
pub mod snapshot;
pub mod storage;

pub use seaorm::SeaOrmStorage;
pub use snapshot::StorageSnapshot;
pub use storage::{
    LogCleanupFilter, NewAuthKey, NewBinding, NewChatLog, NewModel, NewProvider, Page, PagedResult,
    Storage, StorageError, StorageResult,
};
