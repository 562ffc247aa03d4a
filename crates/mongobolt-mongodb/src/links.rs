//! Batched resolution of document references
//!
//! Documents may hold references to documents in other collections as raw
//! ObjectIds (single or in arrays). The resolver fetches referenced
//! documents breadth-first: per depth level it gathers every unresolved id,
//! grouped by target collection, and issues exactly one `$in` query per
//! collection. Already-fetched ids are never requested again, so reference
//! cycles terminate.

use crate::connection::Connection;
use crate::security::{FieldContext, ObjectIdParser, ValidatedCollectionName, ValidatedFieldName};
use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongobolt_common::{BoltError, Result};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// One reference-carrying field: which field, and which collection it points into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkField {
    pub field: String,
    pub target: String,
}

// Process-wide link registry keyed by source collection, filled by the
// binding alongside schema registration.
static LINKS: Lazy<RwLock<HashMap<String, Vec<LinkField>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register the link fields of a collection. Re-registration overwrites.
pub fn register_links(collection: &str, links: Vec<LinkField>) -> Result<()> {
    ValidatedCollectionName::new(collection)?;
    for link in &links {
        ValidatedFieldName::new(&link.field, FieldContext::Document)?;
        ValidatedCollectionName::new(&link.target)?;
    }
    let mut registry = LINKS
        .write()
        .map_err(|e| BoltError::Internal(format!("link registry lock poisoned: {}", e)))?;
    registry.insert(collection.to_string(), links);
    Ok(())
}

/// The link fields registered for a collection (empty if none)
pub fn links_for(collection: &str) -> Vec<LinkField> {
    LINKS
        .read()
        .ok()
        .and_then(|registry| registry.get(collection).cloned())
        .unwrap_or_default()
}

/// Drop every registered link spec (shutdown and test isolation)
pub fn clear_links() {
    if let Ok(mut registry) = LINKS.write() {
        registry.clear();
    }
}

/// Upgrade id strings sitting in link position to ObjectIds.
///
/// Documents handed back in from the binding carry ids as hex strings. Link
/// fields are the one place a string is known to be an id, which is the
/// context [`ObjectIdParser`] requires before it converts anything. Values
/// that do not parse stay unchanged.
pub fn normalize_link_ids(doc: &mut BsonDocument, collection: &str) {
    for link in links_for(collection) {
        let value = match doc.get(&link.field) {
            Some(value) => value.clone(),
            None => continue,
        };
        let upgraded = match value {
            Bson::String(s) => ObjectIdParser::parse(Bson::String(s), true),
            Bson::Array(arr) => Bson::Array(
                arr.into_iter()
                    .map(|item| ObjectIdParser::parse(item, true))
                    .collect(),
            ),
            other => other,
        };
        doc.insert(link.field.clone(), upgraded);
    }
}

/// Gather the ids referenced by `docs` through `links`, grouped by target
/// collection, skipping anything in `fetched`. Each id appears at most once
/// per target.
pub fn collect_link_ids(
    docs: &[BsonDocument],
    links: &[LinkField],
    fetched: &HashSet<(String, ObjectId)>,
) -> HashMap<String, Vec<ObjectId>> {
    let mut wanted: HashMap<String, Vec<ObjectId>> = HashMap::new();
    let mut seen: HashSet<(String, ObjectId)> = HashSet::new();

    let mut push = |target: &str, oid: ObjectId| {
        let key = (target.to_string(), oid);
        if fetched.contains(&key) || !seen.insert(key) {
            return;
        }
        wanted.entry(target.to_string()).or_default().push(oid);
    };

    for doc in docs {
        for link in links {
            match doc.get(&link.field) {
                Some(Bson::ObjectId(oid)) => push(&link.target, *oid),
                Some(Bson::Array(arr)) => {
                    for item in arr {
                        if let Bson::ObjectId(oid) = item {
                            push(&link.target, *oid);
                        }
                    }
                }
                _ => {}
            }
        }
    }
    wanted
}

/// Replace link ids in `doc` with their resolved documents, recursing into
/// the embedded documents until `depth` is exhausted. Unresolved ids are
/// left in place.
pub fn embed_links(
    doc: &mut BsonDocument,
    collection: &str,
    resolved: &HashMap<(String, ObjectId), BsonDocument>,
    depth: usize,
) {
    if depth == 0 {
        return;
    }
    for link in links_for(collection) {
        let value = match doc.get(&link.field) {
            Some(value) => value.clone(),
            None => continue,
        };
        match value {
            Bson::ObjectId(oid) => {
                if let Some(target_doc) = resolved.get(&(link.target.clone(), oid)) {
                    let mut embedded = target_doc.clone();
                    embed_links(&mut embedded, &link.target, resolved, depth - 1);
                    doc.insert(link.field.clone(), Bson::Document(embedded));
                }
            }
            Bson::Array(arr) => {
                let rewritten: Vec<Bson> = arr
                    .into_iter()
                    .map(|item| match item {
                        Bson::ObjectId(oid) => {
                            match resolved.get(&(link.target.clone(), oid)) {
                                Some(target_doc) => {
                                    let mut embedded = target_doc.clone();
                                    embed_links(&mut embedded, &link.target, resolved, depth - 1);
                                    Bson::Document(embedded)
                                }
                                None => Bson::ObjectId(oid),
                            }
                        }
                        other => other,
                    })
                    .collect();
                doc.insert(link.field.clone(), Bson::Array(rewritten));
            }
            _ => {}
        }
    }
}

/// Resolve the references of `docs` down to `depth` levels and embed the
/// fetched documents in place.
///
/// Per level: one `find({_id: {$in: [...]}})` per target collection, no
/// matter how many documents reference it. Resolution stops early when a
/// level discovers no new ids.
pub async fn fetch_links(
    conn: &Connection,
    collection: &str,
    docs: &mut [BsonDocument],
    depth: usize,
) -> Result<()> {
    if depth == 0 || docs.is_empty() {
        return Ok(());
    }

    for doc in docs.iter_mut() {
        normalize_link_ids(doc, collection);
    }

    let mut resolved: HashMap<(String, ObjectId), BsonDocument> = HashMap::new();
    let mut fetched: HashSet<(String, ObjectId)> = HashSet::new();
    let mut frontier: Vec<(String, Vec<BsonDocument>)> =
        vec![(collection.to_string(), docs.to_vec())];

    for _ in 0..depth {
        let mut wanted: HashMap<String, Vec<ObjectId>> = HashMap::new();
        for (src, level_docs) in &frontier {
            let links = links_for(src);
            if links.is_empty() {
                continue;
            }
            for (target, ids) in collect_link_ids(level_docs, &links, &fetched) {
                let entry = wanted.entry(target.clone()).or_default();
                for id in ids {
                    if !fetched.contains(&(target.clone(), id)) && !entry.contains(&id) {
                        entry.push(id);
                    }
                }
            }
        }
        if wanted.is_empty() {
            break;
        }

        let mut next_frontier = Vec::new();
        for (target, ids) in wanted {
            for id in &ids {
                fetched.insert((target.clone(), *id));
            }
            let cursor = conn
                .get_collection(&target)
                .find(doc! { "_id": { "$in": ids } })
                .await
                .map_err(BoltError::from)?;
            let found: Vec<BsonDocument> = cursor.try_collect().await.map_err(BoltError::from)?;
            for found_doc in &found {
                if let Some(oid) = found_doc.get("_id").and_then(|v| v.as_object_id()) {
                    resolved.insert((target.clone(), oid), found_doc.clone());
                }
            }
            next_frontier.push((target, found));
        }
        frontier = next_frontier;
    }

    for doc in docs.iter_mut() {
        embed_links(doc, collection, &resolved, depth);
    }
    Ok(())
}
