pub mod prelude {
    pub use entity::{email_summary, prelude::*, user};
    pub use sea_orm::{
        prelude::*, ActiveValue, Database, DatabaseConnection, DbErr, QueryOrder, QuerySelect,
        SqlErr,
    };
}
