pub mod prelude {
    pub use entity::prelude::*;
    pub use entity::sea_orm_active_enums::{EmailStatus, TaskKind};
    pub use entity::{email_record, scan_task, sender_rule};
    pub use sea_orm::sea_query::OnConflict;
    pub use sea_orm::{
        ActiveValue, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, Order,
        PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    };
}
