use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_summary")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub message_id: String,
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub received_at: DateTimeWithTimeZone,
    pub category: String,
    pub priority_score: i32,
    #[sea_orm(column_type = "Text")]
    pub ai_summary: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub key_points: Json,
    #[sea_orm(column_type = "JsonBinary")]
    pub action_items: Json,
    pub is_fallback: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
