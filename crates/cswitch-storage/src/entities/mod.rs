pub mod app_settings;
pub mod provider_blacklist;
pub mod request_log;

pub use app_settings::Entity as AppSettings;
pub use provider_blacklist::Entity as ProviderBlacklist;
pub use request_log::Entity as RequestLog;
