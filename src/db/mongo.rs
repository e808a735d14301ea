//! MongoDB client and collection wrapper
//!
//! Typed collections apply their schema indexes on first use and translate
//! driver errors into [`StoreError`], keeping duplicate-key failures apart
//! from transport failures.

use bson::{doc, oid::ObjectId, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::db::schemas::Metadata;
use crate::db::{ConflictField, StoreError};

/// MongoDB duplicate key error code
const DUPLICATE_KEY: i32 = 11000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        info!("Connecting to MongoDB at {}", uri);

        // Bound server selection so an unreachable MongoDB fails fast
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| StoreError::Transient(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Transient(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + Default + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, StoreError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), StoreError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| StoreError::Transient(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, item: &mut T) -> Result<ObjectId, StoreError> {
        item.mut_metadata().stamp_created();

        let result = self.inner.insert_one(&*item).await.map_err(map_write_error)?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| StoreError::Transient("Failed to get inserted ID".into()))
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, StoreError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| StoreError::Transient(format!("Find failed: {}", e)))
    }

    /// Find a page of documents
    pub async fn find_page(
        &self,
        filter: Document,
        sort: Document,
        skip: u64,
        limit: Option<i64>,
    ) -> Result<Vec<T>, StoreError> {
        let mut find = self.inner.find(filter).sort(sort).skip(skip);
        if let Some(limit) = limit {
            find = find.limit(limit);
        }

        let cursor = find
            .await
            .map_err(|e| StoreError::Transient(format!("Find failed: {}", e)))?;

        // A document that fails to decode is a store fault, not a missing row
        cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Serialization(format!("Reading documents failed: {}", e)))
    }

    /// Update one document
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, StoreError> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(map_write_error)
    }

    /// Update one document, inserting it when nothing matches
    pub async fn upsert_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, StoreError> {
        self.inner
            .update_one(filter, update.into())
            .upsert(true)
            .await
            .map_err(map_write_error)
    }

    pub async fn count(&self, filter: Document) -> Result<u64, StoreError> {
        self.inner
            .count_documents(filter)
            .await
            .map_err(|e| StoreError::Transient(format!("Count failed: {}", e)))
    }

    /// Run an aggregation pipeline returning raw documents
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .inner
            .aggregate(pipeline)
            .await
            .map_err(|e| StoreError::Transient(format!("Aggregate failed: {}", e)))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Transient(format!("Aggregate read failed: {}", e)))
    }
}

/// Convert a value to BSON for use inside an update document
pub fn to_bson<V: Serialize>(value: &V) -> Result<Bson, StoreError> {
    bson::to_bson(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Map a driver error from a write, surfacing duplicate keys as conflicts
fn map_write_error(err: mongodb::error::Error) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
        if write_error.code == DUPLICATE_KEY {
            return conflict_from_message(&write_error.message);
        }
    }
    StoreError::Transient(format!("Write failed: {}", err))
}

/// Work out which unique index fired from the server's E11000 message
fn conflict_from_message(message: &str) -> StoreError {
    let field = if message.contains("slug_unique") {
        ConflictField::Slug
    } else if message.contains("share_id_unique") {
        ConflictField::ShareId
    } else if message.contains("project_id_unique") {
        ConflictField::ProjectId
    } else {
        ConflictField::Address
    };

    let value = message
        .split("dup key:")
        .nth(1)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    StoreError::Conflict { field, value }
}
