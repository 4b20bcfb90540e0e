pub use super::email_record::Entity as EmailRecord;
pub use super::scan_task::Entity as ScanTask;
pub use super::sender_rule::Entity as SenderRule;
