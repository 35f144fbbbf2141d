//! Provider identities served by this daemon, physical and virtual.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    /// Chain-assigned provider id.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    /// Lowercased 0x-address of the provider owner.
    #[sea_orm(unique)]
    pub owner_address: String,
    pub is_virtual: bool,
    /// Set for virtual providers: the id of the gateway fronting them.
    pub gateway_provider_id: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
