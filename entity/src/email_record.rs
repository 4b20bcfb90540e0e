use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::EmailStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_record")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub internal_date: i64,
    pub status: EmailStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub llm_request: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub llm_response: Option<String>,
    pub llm_sent: bool,
    pub filter_created: bool,
    pub confirmed: bool,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
