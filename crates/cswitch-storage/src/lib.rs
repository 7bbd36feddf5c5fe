pub mod bus;
pub mod entities;
pub mod settings;
pub mod storage;

pub use bus::{StorageBus, StorageBusConfig};
pub use settings::{BlacklistSettings, SettingsError};
pub use storage::{RelayStorage, StorageError, StorageResult};
pub use sea_orm::DbErr;
