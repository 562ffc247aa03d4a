//! The operation layer: insert, find, update, delete, count, aggregate
//!
//! Every operation runs the same gauntlet: identifier validation, filter
//! sanitisation, (optional) schema validation, conversion, then exactly one
//! driver call under the operation's deadline. Nothing here retries; retry
//! policy belongs to the caller. Nothing here touches host-runtime values —
//! inputs arrive as extracted field lists or BSON, outputs leave the same
//! way.

use crate::connection::Connection;
use crate::convert::{
    bson_doc_to_fields, decode_batch, encode_batch, fields_to_bson_document, DocumentFields,
};
use crate::schema::lookup_schema;
use crate::security::{
    sanitize_filter_document, validate_update_operators, ValidatedCollectionName,
};
use crate::validate::validate_document;
use bson::{doc, Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongobolt_common::{BoltError, Result};
use std::future::Future;
use std::time::Duration;

/// Cursor query options shared by the find operations
#[derive(Debug, Clone, Default)]
pub struct FindSpec {
    pub filter: BsonDocument,
    pub sort: Option<BsonDocument>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

/// Run a driver interaction under the operation's deadline. The host lock is
/// never held here; expiry cancels the driver call and surfaces `Timeout`.
async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BoltError::Timeout(format!("operation exceeded {}ms", limit.as_millis())))?,
        None => fut.await,
    }
}

fn effective_deadline(conn: &Connection, timeout: Option<Duration>) -> Option<Duration> {
    timeout.or_else(|| conn.operation_timeout())
}

fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Wrap a plain update document in `$set`; documents already carrying
/// operators pass the allowlist check instead.
pub fn prepare_update(update: BsonDocument) -> Result<BsonDocument> {
    if update.keys().any(|k| k.starts_with('$')) {
        validate_update_operators(&update)?;
        Ok(update)
    } else {
        Ok(doc! { "$set": update })
    }
}

fn validate_against_class(docs: &[BsonDocument], class_name: Option<&str>) -> Result<()> {
    let class = class_name.unwrap_or_default();
    let schema = lookup_schema(class).ok_or_else(|| BoltError::SchemaNotFound(class.to_string()))?;
    let mut errors = Vec::new();
    for doc in docs {
        errors.extend(validate_document(doc, &schema));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(BoltError::InvalidDocument { errors })
    }
}

/// Insert one document; returns its id (generated or provided) as a string.
pub async fn insert_one(
    conn: &Connection,
    collection: &str,
    fields: DocumentFields,
    class_name: Option<&str>,
    timeout: Option<Duration>,
) -> Result<String> {
    let name = ValidatedCollectionName::new(collection)?;
    let bson_doc = fields_to_bson_document(fields);

    if class_name.is_some() {
        validate_against_class(std::slice::from_ref(&bson_doc), class_name)?;
    }

    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    with_deadline(deadline, async move {
        let result = coll.insert_one(bson_doc).await.map_err(BoltError::from)?;
        Ok(id_to_string(&result.inserted_id))
    })
    .await
}

/// Insert a batch in one driver call; returns ids in input order.
///
/// An empty batch returns an empty id list without touching the driver.
/// With `validate`, every document is checked and the whole batch fails on
/// the combined error list. With `ordered=false` the driver decides
/// partial-success semantics and its outcome is surfaced verbatim.
pub async fn insert_many(
    conn: &Connection,
    collection: &str,
    batch: Vec<DocumentFields>,
    class_name: Option<&str>,
    validate: bool,
    ordered: bool,
    timeout: Option<Duration>,
) -> Result<Vec<String>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let name = ValidatedCollectionName::new(collection)?;

    let encoded = encode_batch(batch, conn.parallel_threshold());
    if validate {
        validate_against_class(&encoded, class_name)?;
    }

    let count = encoded.len();
    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    with_deadline(deadline, async move {
        let result = coll
            .insert_many(encoded)
            .ordered(ordered)
            .await
            .map_err(BoltError::from)?;

        // inserted_ids is keyed by input index; walking 0..count keeps the
        // returned ids aligned with the input documents.
        let mut ids = Vec::with_capacity(count);
        for index in 0..count {
            if let Some(id) = result.inserted_ids.get(&index) {
                ids.push(id_to_string(id));
            }
        }
        Ok(ids)
    })
    .await
}

/// Find matching documents, decoded to extracted field lists (`_id` first).
pub async fn find(
    conn: &Connection,
    collection: &str,
    spec: FindSpec,
    timeout: Option<Duration>,
) -> Result<Vec<DocumentFields>> {
    let name = ValidatedCollectionName::new(collection)?;
    sanitize_filter_document(&spec.filter)?;

    let threshold = conn.parallel_threshold();
    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    let docs = with_deadline(deadline, async move {
        let mut find = coll.find(spec.filter);
        if let Some(sort) = spec.sort {
            find = find.sort(sort);
        }
        if let Some(skip) = spec.skip {
            find = find.skip(skip);
        }
        if let Some(limit) = spec.limit {
            find = find.limit(limit);
        }
        let cursor = find.await.map_err(BoltError::from)?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await.map_err(BoltError::from)?;
        Ok(docs)
    })
    .await?;

    Ok(decode_batch(docs, threshold))
}

/// Find the first matching document, if any.
pub async fn find_one(
    conn: &Connection,
    collection: &str,
    filter: BsonDocument,
    timeout: Option<Duration>,
) -> Result<Option<DocumentFields>> {
    let name = ValidatedCollectionName::new(collection)?;
    sanitize_filter_document(&filter)?;

    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    let found = with_deadline(deadline, async move {
        coll.find_one(filter).await.map_err(BoltError::from)
    })
    .await?;

    Ok(found.map(|doc| bson_doc_to_fields(&doc)))
}

/// Update the first matching document; returns the modified count.
/// With `required`, zero matches fail with `NotFound`.
pub async fn update_one(
    conn: &Connection,
    collection: &str,
    filter: BsonDocument,
    update: BsonDocument,
    required: bool,
    timeout: Option<Duration>,
) -> Result<u64> {
    let name = ValidatedCollectionName::new(collection)?;
    sanitize_filter_document(&filter)?;
    let update = prepare_update(update)?;

    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    let result = with_deadline(deadline, async move {
        coll.update_one(filter, update).await.map_err(BoltError::from)
    })
    .await?;

    if required && result.matched_count == 0 {
        return Err(BoltError::NotFound("no document matched the filter".to_string()));
    }
    Ok(result.modified_count)
}

/// Update every matching document; returns the modified count.
pub async fn update_many(
    conn: &Connection,
    collection: &str,
    filter: BsonDocument,
    update: BsonDocument,
    required: bool,
    timeout: Option<Duration>,
) -> Result<u64> {
    let name = ValidatedCollectionName::new(collection)?;
    sanitize_filter_document(&filter)?;
    let update = prepare_update(update)?;

    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    let result = with_deadline(deadline, async move {
        coll.update_many(filter, update).await.map_err(BoltError::from)
    })
    .await?;

    if required && result.matched_count == 0 {
        return Err(BoltError::NotFound("no document matched the filter".to_string()));
    }
    Ok(result.modified_count)
}

/// The tracker-driven save: push only the changed fields as a `$set`.
/// An empty change set is a no-op that never reaches the driver.
pub async fn save_changes(
    conn: &Connection,
    collection: &str,
    id: Bson,
    changes: BsonDocument,
    timeout: Option<Duration>,
) -> Result<u64> {
    if changes.is_empty() {
        return Ok(0);
    }
    update_one(
        conn,
        collection,
        doc! { "_id": id },
        doc! { "$set": changes },
        false,
        timeout,
    )
    .await
}

/// Delete the first matching document; returns the deleted count.
/// With `required`, zero deletions fail with `NotFound`.
pub async fn delete_one(
    conn: &Connection,
    collection: &str,
    filter: BsonDocument,
    required: bool,
    timeout: Option<Duration>,
) -> Result<u64> {
    let name = ValidatedCollectionName::new(collection)?;
    sanitize_filter_document(&filter)?;

    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    let result = with_deadline(deadline, async move {
        coll.delete_one(filter).await.map_err(BoltError::from)
    })
    .await?;

    if required && result.deleted_count == 0 {
        return Err(BoltError::NotFound("no document matched the filter".to_string()));
    }
    Ok(result.deleted_count)
}

/// Delete every matching document; returns the deleted count.
pub async fn delete_many(
    conn: &Connection,
    collection: &str,
    filter: BsonDocument,
    required: bool,
    timeout: Option<Duration>,
) -> Result<u64> {
    let name = ValidatedCollectionName::new(collection)?;
    sanitize_filter_document(&filter)?;

    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    let result = with_deadline(deadline, async move {
        coll.delete_many(filter).await.map_err(BoltError::from)
    })
    .await?;

    if required && result.deleted_count == 0 {
        return Err(BoltError::NotFound("no document matched the filter".to_string()));
    }
    Ok(result.deleted_count)
}

/// Count matching documents.
pub async fn count(
    conn: &Connection,
    collection: &str,
    filter: BsonDocument,
    timeout: Option<Duration>,
) -> Result<u64> {
    let name = ValidatedCollectionName::new(collection)?;
    sanitize_filter_document(&filter)?;

    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    with_deadline(deadline, async move {
        coll.count_documents(filter).await.map_err(BoltError::from)
    })
    .await
}

/// Run an aggregation pipeline; every stage passes the sanitiser first.
pub async fn aggregate(
    conn: &Connection,
    collection: &str,
    pipeline: Vec<BsonDocument>,
    timeout: Option<Duration>,
) -> Result<Vec<DocumentFields>> {
    let name = ValidatedCollectionName::new(collection)?;
    for stage in &pipeline {
        sanitize_filter_document(stage)?;
    }

    let threshold = conn.parallel_threshold();
    let deadline = effective_deadline(conn, timeout);
    let coll = conn.get_collection(name.as_str());
    let docs = with_deadline(deadline, async move {
        let cursor = coll.aggregate(pipeline).await.map_err(BoltError::from)?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await.map_err(BoltError::from)?;
        Ok(docs)
    })
    .await?;

    Ok(decode_batch(docs, threshold))
}
