//! End-to-end tests of the engine pipeline that runs before any driver call:
//! shape parsing, schema cache, validation, conversion, change tracking and
//! link batching working together.

use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use mongobolt_common::{BoltError, ValidationErrorKind};
use mongobolt_mongodb::convert::{
    bson_doc_to_fields, decode_batch, encode_batch, extracted_to_bson, fields_to_bson_document,
    DocumentFields, ExtractedValue,
};
use mongobolt_mongodb::links::{collect_link_ids, LinkField};
use mongobolt_mongodb::ops::prepare_update;
use mongobolt_mongodb::schema::{lookup_schema, register_schema, DocumentSchema};
use mongobolt_mongodb::security::sanitize_filter_document;
use mongobolt_mongodb::state::StateTracker;
use mongobolt_mongodb::validate::validate_document;
use std::collections::{HashMap, HashSet};

fn tag(name: &str) -> ExtractedValue {
    ExtractedValue::Document(vec![(
        "type".to_string(),
        ExtractedValue::String(name.to_string()),
    )])
}

fn string_with_format(format: &str) -> ExtractedValue {
    ExtractedValue::Document(vec![
        ("type".to_string(), ExtractedValue::String("string".to_string())),
        (
            "constraints".to_string(),
            ExtractedValue::Document(vec![(
                "format".to_string(),
                ExtractedValue::String(format.to_string()),
            )]),
        ),
    ])
}

fn user_schema() -> DocumentSchema {
    let shape = vec![
        ("name".to_string(), tag("string")),
        ("email".to_string(), string_with_format("email")),
        (
            "age".to_string(),
            ExtractedValue::Document(vec![
                ("type".to_string(), ExtractedValue::String("optional".to_string())),
                ("inner".to_string(), tag("int64")),
            ]),
        ),
    ];
    DocumentSchema::from_shape(&shape).unwrap()
}

#[test]
fn registered_schema_validates_documents_end_to_end() {
    register_schema("pipeline.User", user_schema()).unwrap();
    let schema = lookup_schema("pipeline.User").unwrap();

    let good = doc! { "name": "Alice", "email": "alice@example.com", "age": 30i64 };
    assert!(validate_document(&good, &schema).is_empty());

    let also_good = doc! { "name": "Bob", "email": "b@c.de" };
    assert!(validate_document(&also_good, &schema).is_empty());
}

#[test]
fn batch_with_one_bad_document_reports_exactly_its_violation() {
    // Three documents; only the middle one is invalid. The combined error
    // list that fails the batch carries a single entry with path "email".
    register_schema("pipeline.BatchUser", user_schema()).unwrap();
    let schema = lookup_schema("pipeline.BatchUser").unwrap();

    let batch = vec![
        doc! { "name": "a", "email": "a@b.co" },
        doc! { "name": "b", "email": "not-an-email" },
        doc! { "name": "c", "email": "c@d.ee" },
    ];

    let mut errors = Vec::new();
    for item in &batch {
        errors.extend(validate_document(item, &schema));
    }
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field_path, "email");
    assert_eq!(errors[0].kind, ValidationErrorKind::InvalidFormat);

    let combined = BoltError::InvalidDocument { errors };
    assert_eq!(combined.kind(), "InvalidDocument");
}

#[test]
fn dangerous_filter_is_rejected_before_any_other_work() {
    let filter = doc! { "$where": "true" };
    let result = sanitize_filter_document(&filter);
    match result {
        Err(BoltError::DangerousOperator(message)) => assert!(message.contains("$where")),
        other => panic!("expected DangerousOperator, got {:?}", other),
    }
}

#[test]
fn tracker_builds_a_minimal_set_payload() {
    // Load -> reassign one field -> the update touches only that field.
    let mut data: HashMap<String, Bson> = HashMap::from([
        ("name".to_string(), Bson::String("Alice".to_string())),
        ("age".to_string(), Bson::Int64(31)),
    ]);

    let mut tracker = StateTracker::new();
    tracker.track_change("age", Bson::Int64(30));

    let changes = tracker.get_changes(&data);
    let mut set_payload = BsonDocument::new();
    for (field, value) in &changes {
        set_payload.insert(field.clone(), value.clone());
    }
    assert_eq!(set_payload, doc! { "age": 31i64 });

    let update = prepare_update(doc! { "$set": set_payload }).unwrap();
    assert_eq!(update, doc! { "$set": { "age": 31i64 } });

    tracker.reset();
    data.insert("name".to_string(), Bson::String("Mallory".to_string()));
    assert!(tracker.get_changes(&data).is_empty());
}

#[test]
fn hundred_links_to_one_collection_need_one_query_per_level() {
    let user_ids: Vec<ObjectId> = (0..100).map(|_| ObjectId::new()).collect();
    let posts: Vec<BsonDocument> = user_ids
        .iter()
        .map(|id| doc! { "title": "post", "author": *id })
        .collect();
    let links = vec![LinkField {
        field: "author".to_string(),
        target: "users".to_string(),
    }];

    let wanted = collect_link_ids(&posts, &links, &HashSet::new());
    // One target collection, one id list: exactly one $in find gets issued
    assert_eq!(wanted.len(), 1);
    assert_eq!(wanted["users"].len(), 100);
}

#[test]
fn batch_ids_keep_input_order_across_the_parallel_threshold() {
    let threshold = 50;
    for size in [threshold - 1, threshold, 100] {
        let batch: Vec<DocumentFields> = (0..size)
            .map(|i| vec![("i".to_string(), ExtractedValue::Int64(i as i64))])
            .collect();
        let encoded = encode_batch(batch, threshold);
        let decoded = decode_batch(encoded, threshold);
        for (i, fields) in decoded.iter().enumerate() {
            assert_eq!(
                fields[0],
                ("i".to_string(), ExtractedValue::Int64(i as i64)),
                "order broken at index {} for batch size {}",
                i,
                size
            );
        }
    }
}

#[test]
fn oversized_integer_survives_as_decimal128() {
    // One past i64::MAX must not be truncated
    let value = ExtractedValue::BigInt("9223372036854775808".to_string());
    match extracted_to_bson(value) {
        Bson::Decimal128(dec) => assert_eq!(dec.to_string(), "9223372036854775808"),
        other => panic!("expected Decimal128, got {:?}", other),
    }
}

#[test]
fn write_read_round_trip_preserves_values_and_puts_id_first() {
    let fields: DocumentFields = vec![
        ("name".to_string(), ExtractedValue::String("Alice".to_string())),
        ("age".to_string(), ExtractedValue::Int64(30)),
        (
            "scores".to_string(),
            ExtractedValue::Array(vec![
                ExtractedValue::Double(1.5),
                ExtractedValue::Double(2.5),
            ]),
        ),
    ];

    let mut stored = fields_to_bson_document(fields.clone());
    let id = ObjectId::new();
    stored.insert("_id", id);

    let read_back = bson_doc_to_fields(&stored);
    assert_eq!(read_back[0], ("_id".to_string(), ExtractedValue::ObjectId(id.to_hex())));
    assert_eq!(&read_back[1..], &fields[..]);
}

#[test]
fn validation_semantics_are_stable_across_encoding() {
    // Validating the encoded form of a value gives the same verdict as
    // validating a hand-built BSON document with the same content.
    register_schema("pipeline.Stable", user_schema()).unwrap();
    let schema = lookup_schema("pipeline.Stable").unwrap();

    let extracted: DocumentFields = vec![
        ("name".to_string(), ExtractedValue::String("Alice".to_string())),
        ("email".to_string(), ExtractedValue::String("nope".to_string())),
    ];
    let encoded = fields_to_bson_document(extracted);
    let manual = doc! { "name": "Alice", "email": "nope" };

    let from_encoded = validate_document(&encoded, &schema);
    let from_manual = validate_document(&manual, &schema);
    assert_eq!(from_encoded, from_manual);
    assert_eq!(from_encoded.len(), 1);
}
