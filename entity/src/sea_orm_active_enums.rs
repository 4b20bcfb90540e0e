use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "email_status")]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    #[sea_orm(string_value = "ignore")]
    Ignore,
    #[sea_orm(string_value = "not_spam")]
    NotSpam,
    #[sea_orm(string_value = "spam")]
    Spam,
    #[sea_orm(string_value = "whitelist")]
    Whitelist,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Ignore => "ignore",
            EmailStatus::NotSpam => "not_spam",
            EmailStatus::Spam => "spam",
            EmailStatus::Whitelist => "whitelist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "task_kind")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[sea_orm(string_value = "refresh")]
    Refresh,
    #[sea_orm(string_value = "scan")]
    Scan,
}
