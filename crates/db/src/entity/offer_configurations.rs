//! Per-offer configuration blobs owned by gateway providers.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "virtual_provider_offer_configurations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub offer_id: i64,
    pub protocol_id: i32,
    /// Backend-defined configuration; schema is contributed by the concrete
    /// service backend.
    pub configuration: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
