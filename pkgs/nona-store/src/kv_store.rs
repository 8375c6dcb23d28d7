//! String key-value store over the `local_storage` table

use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use tracing::debug;

use crate::entities::local_storage;

/// Local storage with the semantics of a browser `localStorage`
#[derive(Clone)]
pub struct KeyValueStore {
    db: DatabaseConnection,
}

impl KeyValueStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a value by key
    pub async fn get(&self, key: &str) -> Result<Option<String>, DbErr> {
        let result = local_storage::Entity::find()
            .filter(local_storage::Column::Key.eq(key))
            .one(&self.db)
            .await?;

        Ok(result.map(|model| model.value))
    }

    /// Insert or overwrite the value under `key` in one upsert
    pub async fn set(&self, key: &str, value: &str) -> Result<(), DbErr> {
        let entry = local_storage::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            updated_at: Set(chrono::Utc::now().timestamp_millis()),
        };

        local_storage::Entity::insert(entry)
            .on_conflict(
                OnConflict::column(local_storage::Column::Key)
                    .update_columns([
                        local_storage::Column::Value,
                        local_storage::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        debug!("Stored {} bytes under '{}'", value.len(), key);
        Ok(())
    }

    /// Delete a key; returns whether it existed
    pub async fn delete(&self, key: &str) -> Result<bool, DbErr> {
        let result = local_storage::Entity::delete_many()
            .filter(local_storage::Column::Key.eq(key))
            .exec(&self.db)
            .await?;

        debug!("Deleted '{}'", key);
        Ok(result.rows_affected > 0)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, DbErr> {
        Ok(self.get(key).await?.is_some())
    }

    /// All keys, sorted
    pub async fn keys(&self) -> Result<Vec<String>, DbErr> {
        let mut keys: Vec<String> = local_storage::Entity::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| m.key)
            .collect();
        keys.sort();
        Ok(keys)
    }
}
