// src/store/mongo.rs

use std::sync::RwLock;

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::{ClientOptions, Credential};
use mongodb::Client;
use serde_json::{Map, Value};

use super::config::{StoreConfig, StoreKind};
use super::driver::StoreDriver;
use super::types::{Query, QueryOptions, Record, RecordStream, SortOrder, StoreError, StoreOp};

/// MongoDB driver. `Find` queries map onto collection `find` calls.
pub struct MongoStore {
    uri: String,
    database: String,
    user: Option<String>,
    pass: Option<String>,
    client: RwLock<Option<Client>>,
}

impl MongoStore {
    pub fn new(config: &StoreConfig) -> Self {
        MongoStore {
            uri: format!(
                "mongodb://{}:{}",
                config.host(),
                config.port_or_default(StoreKind::MongoDb)
            ),
            database: config.name.clone(),
            user: config.user.clone().filter(|u| !u.is_empty()),
            pass: config.pass.clone(),
            client: RwLock::new(None),
        }
    }

    fn database(&self) -> Result<mongodb::Database, StoreError> {
        self.client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|client| client.database(&self.database))
            .ok_or_else(|| StoreError::NotConnected(StoreKind::MongoDb.to_string()))
    }

    fn find_parts<'q>(query: &'q Query, op: StoreOp) -> Result<(&'q str, Document), StoreError> {
        match query {
            Query::Find { collection, filter } => Ok((collection.as_str(), to_document(filter)?)),
            Query::Sql { .. } => Err(StoreError::Unsupported {
                kind: StoreKind::MongoDb.as_str(),
                op,
            }),
        }
    }

    async fn find(
        &self,
        query: &Query,
        options: &QueryOptions,
        op: StoreOp,
    ) -> Result<mongodb::Cursor<Document>, StoreError> {
        let (collection, filter) = Self::find_parts(query, op)?;
        let collection = self.database()?.collection::<Document>(collection);
        let mut find = collection.find(filter).sort(sort_document(options));
        if let Some(limit) = options.limit {
            find = find.limit(find_limit(limit));
        }
        if let Some(offset) = options.offset {
            find = find.skip(offset);
        }
        Ok(find.await?)
    }
}

fn to_document(fields: &Map<String, Value>) -> Result<Document, StoreError> {
    bson::to_document(fields).map_err(|e| StoreError::InvalidRecord(e.to_string()))
}

fn record_document(record: &Record) -> Result<Document, StoreError> {
    record
        .as_object()
        .ok_or_else(|| StoreError::InvalidRecord("mongodb writes require an object".to_string()))
        .and_then(to_document)
}

/// MongoDB reads a negative limit as a single-batch request, so large
/// values saturate instead of wrapping.
fn find_limit(limit: u64) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn sort_document(options: &QueryOptions) -> Document {
    options
        .sort
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                SortOrder::Asc => 1,
                SortOrder::Desc => -1,
            };
            (field.clone(), Bson::Int32(dir))
        })
        .collect()
}

fn to_record(document: Document) -> Record {
    Bson::Document(document).into_relaxed_extjson()
}

#[async_trait]
impl StoreDriver for MongoStore {
    fn kind(&self) -> StoreKind {
        StoreKind::MongoDb
    }

    async fn connect(&self) -> Result<(), StoreError> {
        let mut options = ClientOptions::parse(self.uri.as_str())
            .await
            .map_err(StoreError::connection)?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        if let Some(user) = &self.user {
            let mut credential = Credential::default();
            credential.username = Some(user.clone());
            credential.password = self.pass.clone();
            credential.source = Some(self.database.clone());
            options.credential = Some(credential);
        }

        let client = Client::with_options(options).map_err(StoreError::connection)?;
        client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(StoreError::connection)?;
        *self.client.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(client);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let client = self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(client) = client {
            client.shutdown().await;
        }
        Ok(())
    }

    async fn query(&self, query: &Query, options: &QueryOptions) -> Result<Vec<Record>, StoreError> {
        let mut cursor = self.find(query, options, StoreOp::Query).await?;
        let mut records = Vec::new();
        while let Some(document) = cursor.next().await {
            records.push(to_record(document?));
        }
        Ok(records)
    }

    async fn stream(
        &self,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<RecordStream, StoreError> {
        let cursor = self.find(query, options, StoreOp::Stream).await?;
        Ok(cursor
            .map(|document| document.map(to_record).map_err(StoreError::from))
            .boxed())
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        let document = record_document(record)?;
        self.database()?
            .collection::<Document>(collection)
            .insert_one(document)
            .await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        key: &[String],
        record: &Record,
    ) -> Result<(), StoreError> {
        let document = record_document(record)?;
        let mut filter = Document::new();
        for field in key {
            let value = document
                .get(field)
                .ok_or_else(|| StoreError::InvalidRecord(format!("missing key field '{field}'")))?;
            filter.insert(field.clone(), value.clone());
        }

        self.database()?
            .collection::<Document>(collection)
            .update_one(filter, doc! { "$set": document })
            .upsert(true)
            .await?;
        Ok(())
    }
}
