pub mod prelude;

pub mod email_record;
pub mod scan_task;
pub mod sea_orm_active_enums;
pub mod sender_rule;
