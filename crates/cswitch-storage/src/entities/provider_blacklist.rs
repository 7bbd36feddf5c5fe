use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "provider_blacklist")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "blacklist_scope")]
    pub platform: String,
    #[sea_orm(unique_key = "blacklist_scope")]
    pub provider_name: String,
    pub failure_count: i32,
    pub blacklist_level: i32,
    pub blacklisted_at: Option<OffsetDateTime>,
    pub blacklisted_until: Option<OffsetDateTime>,
    pub last_failure_at: Option<OffsetDateTime>,
    pub last_recovered_at: Option<OffsetDateTime>,
    pub last_degrade_hour: i64,
    pub last_failure_window_start: Option<OffsetDateTime>,
    pub auto_recovered: bool,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
