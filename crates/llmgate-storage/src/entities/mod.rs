pub mod auth_keys;
pub mod bindings;
pub mod chat_io;
pub mod chat_logs;
pub mod global_config;
pub mod models;
pub mod providers;

pub use auth_keys::Entity as AuthKeys;
pub use bindings::Entity as Bindings;
pub use chat_io::Entity as ChatIo;
pub use chat_logs::Entity as ChatLogs;
pub use global_config::Entity as GlobalConfig;
pub use models::Entity as Models;
pub use providers::Entity as Providers;
