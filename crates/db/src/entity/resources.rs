//! Local projection of active agreements.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Backend-reported lifecycle state of a provisioned resource.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum DeploymentStatus {
    #[sea_orm(string_value = "Deploying")]
    Deploying,
    #[sea_orm(string_value = "Running")]
    Running,
    #[sea_orm(string_value = "Failed")]
    Failed,
    #[sea_orm(string_value = "Closed")]
    Closed,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "resources")]
pub struct Model {
    /// Agreement id on-chain.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub protocol_id: i32,
    pub name: String,
    /// Lowercased 0x-address of the agreement user.
    pub owner_address: String,
    /// Backend detail mapping; keys starting with `_` are private.
    pub details: Json,
    pub deployment_status: DeploymentStatus,
    pub group_name: String,
    pub offer_id: i64,
    pub is_active: bool,
    pub provider_id: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
