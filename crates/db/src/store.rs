use anyhow::{Context, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Database, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, TransactionTrait,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::entity::{config, detail_files, offer_configurations, protocols, providers, resources};
use crate::{DeploymentStatus, normalize_address};

/// A content-addressed detail blob as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailFile {
    pub cid: String,
    pub content: String,
}

/// Fields for a freshly observed agreement's resource row.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub id: i64,
    pub protocol_address: String,
    pub name: String,
    pub owner_address: String,
    pub details: serde_json::Value,
    pub deployment_status: DeploymentStatus,
    pub offer_id: i64,
    pub provider_id: i64,
}

/// Partial update applied to an existing resource row.
#[derive(Debug, Clone, Default)]
pub struct ResourceUpdate {
    pub name: Option<String>,
    pub deployment_status: Option<DeploymentStatus>,
    pub details: Option<serde_json::Value>,
}

/// Transactional access to the daemon's relational state.
#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = Database::connect(database_url)
            .await
            .with_context(|| format!("failed to connect to database at {}", database_url))?;
        info!("Connected to database");
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // --- detail blobs ---

    /// Replace the detail-file table with the given set, in one transaction.
    ///
    /// After this returns the table and the on-disk set agree exactly on CIDs:
    /// rows whose CID is absent from `files` are deleted, the rest upserted.
    pub async fn sync_detail_files(&self, files: &[DetailFile]) -> Result<()> {
        let txn = self.db.begin().await?;

        let keep: Vec<String> = files.iter().map(|f| f.cid.clone()).collect();
        let deleted = detail_files::Entity::delete_many()
            .filter(detail_files::Column::Cid.is_not_in(keep.clone()))
            .exec(&txn)
            .await?;

        for file in files {
            let model = detail_files::ActiveModel {
                cid: Set(file.cid.clone()),
                content: Set(file.content.clone()),
                ..Default::default()
            };
            detail_files::Entity::insert(model)
                .on_conflict(
                    OnConflict::column(detail_files::Column::Cid)
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }

        txn.commit().await?;
        debug!(
            "Synced detail files: {} kept, {} removed",
            files.len(),
            deleted.rows_affected
        );
        Ok(())
    }

    pub async fn insert_detail_file(&self, cid: &str, content: &str) -> Result<()> {
        let model = detail_files::ActiveModel {
            cid: Set(cid.to_string()),
            content: Set(content.to_string()),
            ..Default::default()
        };
        detail_files::Entity::insert(model)
            .on_conflict(
                OnConflict::column(detail_files::Column::Cid)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    pub async fn get_detail_file(&self, cid: &str) -> Result<Option<String>> {
        let row = detail_files::Entity::find()
            .filter(detail_files::Column::Cid.eq(cid))
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.content))
    }

    pub async fn get_detail_files(&self, cids: &[String]) -> Result<Vec<DetailFile>> {
        let rows = detail_files::Entity::find()
            .filter(detail_files::Column::Cid.is_in(cids.to_vec()))
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| DetailFile {
                cid: r.cid,
                content: r.content,
            })
            .collect())
    }

    pub async fn all_detail_cids(&self) -> Result<Vec<String>> {
        let rows = detail_files::Entity::find().all(&self.db).await?;
        Ok(rows.into_iter().map(|r| r.cid).collect())
    }

    // --- protocols ---

    pub async fn find_protocol(&self, address: &str) -> Result<Option<protocols::Model>> {
        let row = protocols::Entity::find()
            .filter(protocols::Column::Address.eq(normalize_address(address)))
            .one(&self.db)
            .await?;
        Ok(row)
    }

    pub async fn find_protocol_by_id(&self, id: i32) -> Result<Option<protocols::Model>> {
        Ok(protocols::Entity::find_by_id(id).one(&self.db).await?)
    }

    /// Protocols are stable: created on first reference, never mutated.
    pub async fn ensure_protocol(&self, address: &str) -> Result<protocols::Model> {
        if let Some(existing) = self.find_protocol(address).await? {
            return Ok(existing);
        }
        let model = protocols::ActiveModel {
            address: Set(normalize_address(address)),
            ..Default::default()
        };
        let inserted = model.insert(&self.db).await?;
        debug!("Registered protocol {}", inserted.address);
        Ok(inserted)
    }

    // --- providers ---

    pub async fn save_provider(
        &self,
        id: i64,
        owner_address: &str,
        is_virtual: bool,
        gateway_provider_id: Option<i64>,
    ) -> Result<providers::Model> {
        if let Some(existing) = providers::Entity::find_by_id(id).one(&self.db).await? {
            let mut active = existing.into_active_model();
            active.owner_address = Set(normalize_address(owner_address));
            active.is_virtual = Set(is_virtual);
            active.gateway_provider_id = Set(gateway_provider_id);
            return Ok(active.update(&self.db).await?);
        }
        let model = providers::ActiveModel {
            id: Set(id),
            owner_address: Set(normalize_address(owner_address)),
            is_virtual: Set(is_virtual),
            gateway_provider_id: Set(gateway_provider_id),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn get_provider(&self, id: i64) -> Result<Option<providers::Model>> {
        Ok(providers::Entity::find_by_id(id).one(&self.db).await?)
    }

    pub async fn get_provider_by_owner(&self, owner: &str) -> Result<Option<providers::Model>> {
        let row = providers::Entity::find()
            .filter(providers::Column::OwnerAddress.eq(normalize_address(owner)))
            .one(&self.db)
            .await?;
        Ok(row)
    }

    pub async fn virtual_children(&self, gateway_id: i64) -> Result<Vec<providers::Model>> {
        let rows = providers::Entity::find()
            .filter(providers::Column::IsVirtual.eq(true))
            .filter(providers::Column::GatewayProviderId.eq(gateway_id))
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    // --- resources ---

    pub async fn create_resource(&self, new: NewResource) -> Result<resources::Model> {
        let protocol = self.ensure_protocol(&new.protocol_address).await?;
        let model = resources::ActiveModel {
            id: Set(new.id),
            protocol_id: Set(protocol.id),
            name: Set(new.name),
            owner_address: Set(normalize_address(&new.owner_address)),
            details: Set(new.details),
            deployment_status: Set(new.deployment_status),
            group_name: Set("default".to_string()),
            offer_id: Set(new.offer_id),
            is_active: Set(true),
            provider_id: Set(new.provider_id),
            created_at: Set(chrono::Utc::now()),
        };
        Ok(model.insert(&self.db).await?)
    }

    /// Look up a resource by `(agreement id, protocol address)`.
    ///
    /// When `owner` is given the row must also belong to that address; the
    /// filter lives here so request handlers get authorization at the query
    /// layer.
    pub async fn get_resource(
        &self,
        id: i64,
        protocol_address: &str,
        owner: Option<&str>,
    ) -> Result<Option<resources::Model>> {
        let Some(protocol) = self.find_protocol(protocol_address).await? else {
            return Ok(None);
        };
        let row = resources::Entity::find_by_id((id, protocol.id))
            .one(&self.db)
            .await?;
        Ok(match (row, owner) {
            (Some(r), Some(owner)) if r.owner_address == normalize_address(owner) => Some(r),
            (Some(_), Some(_)) => None,
            (None, Some(_)) => None,
            (row, None) => row,
        })
    }

    pub async fn get_resources_by_owner(&self, owner: &str) -> Result<Vec<resources::Model>> {
        let rows = resources::Entity::find()
            .filter(resources::Column::OwnerAddress.eq(normalize_address(owner)))
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    /// Apply a partial update to a resource.
    ///
    /// An unknown protocol address drops the update: a blind write against a
    /// protocol the daemon never registered must not create state.
    pub async fn update_resource(
        &self,
        id: i64,
        protocol_address: &str,
        update: ResourceUpdate,
    ) -> Result<()> {
        let Some(protocol) = self.find_protocol(protocol_address).await? else {
            warn!(
                "Dropping update for resource {}: unknown protocol {}",
                id, protocol_address
            );
            return Ok(());
        };
        let Some(row) = resources::Entity::find_by_id((id, protocol.id))
            .one(&self.db)
            .await?
        else {
            warn!("Dropping update for resource {}: no such row", id);
            return Ok(());
        };

        let mut active = row.into_active_model();
        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(status) = update.deployment_status {
            active.deployment_status = Set(status);
        }
        if let Some(details) = update.details {
            active.details = Set(details);
        }
        active.update(&self.db).await?;
        Ok(())
    }

    /// Close a resource: mark inactive, status `Closed`, details wiped.
    pub async fn delete_resource(&self, id: i64, protocol_address: &str) -> Result<()> {
        let Some(protocol) = self.find_protocol(protocol_address).await? else {
            warn!(
                "Dropping delete for resource {}: unknown protocol {}",
                id, protocol_address
            );
            return Ok(());
        };
        let Some(row) = resources::Entity::find_by_id((id, protocol.id))
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };
        let mut active = row.into_active_model();
        active.is_active = Set(false);
        active.deployment_status = Set(DeploymentStatus::Closed);
        active.details = Set(json!({}));
        active.update(&self.db).await?;
        Ok(())
    }

    // --- config ---

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let row = config::Entity::find()
            .filter(config::Column::Key.eq(key))
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.value))
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        if let Some(existing) = config::Entity::find()
            .filter(config::Column::Key.eq(key))
            .one(&self.db)
            .await?
        {
            let mut active = existing.into_active_model();
            active.value = Set(value.to_string());
            active.update(&self.db).await?;
        } else {
            let model = config::ActiveModel {
                key: Set(key.to_string()),
                value: Set(value.to_string()),
                ..Default::default()
            };
            model.insert(&self.db).await?;
        }
        Ok(())
    }

    // --- virtual-provider offer configuration ---

    pub async fn get_offer_configuration(
        &self,
        offer_id: i64,
        protocol_address: &str,
    ) -> Result<Option<serde_json::Value>> {
        let Some(protocol) = self.find_protocol(protocol_address).await? else {
            return Ok(None);
        };
        let row = offer_configurations::Entity::find()
            .filter(offer_configurations::Column::OfferId.eq(offer_id))
            .filter(offer_configurations::Column::ProtocolId.eq(protocol.id))
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.configuration))
    }

    pub async fn upsert_offer_configuration(
        &self,
        offer_id: i64,
        protocol_address: &str,
        configuration: serde_json::Value,
    ) -> Result<()> {
        let protocol = self.ensure_protocol(protocol_address).await?;
        if let Some(existing) = offer_configurations::Entity::find()
            .filter(offer_configurations::Column::OfferId.eq(offer_id))
            .filter(offer_configurations::Column::ProtocolId.eq(protocol.id))
            .one(&self.db)
            .await?
        {
            let mut active = existing.into_active_model();
            active.configuration = Set(configuration);
            active.update(&self.db).await?;
        } else {
            let model = offer_configurations::ActiveModel {
                offer_id: Set(offer_id),
                protocol_id: Set(protocol.id),
                configuration: Set(configuration),
                ..Default::default()
            };
            model.insert(&self.db).await?;
        }
        Ok(())
    }
}
