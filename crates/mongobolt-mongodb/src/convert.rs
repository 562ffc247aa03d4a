//! Two-phase BSON conversion
//!
//! The binding extracts host values into `ExtractedValue` while it holds the
//! interpreter lock; everything in this module runs after that point and
//! never touches a host object. That is what makes the second phase safe to
//! run on a rayon pool for large batches.
//!
//! # Write path
//! 1. **Extract** (lock held): host values -> `ExtractedValue`
//! 2. **Encode** (lock released): `ExtractedValue` -> BSON, parallel at batch size
//!
//! # Read path
//! 1. **Decode** (lock released): BSON -> `ExtractedValue`, parallel at batch size
//! 2. **Materialise** (lock held): `ExtractedValue` -> host dicts

use bson::{oid::ObjectId, spec::BinarySubtype, Binary, Bson, Decimal128, Document as BsonDocument};
use rayon::prelude::*;
use std::str::FromStr;

/// Minimum batch size to enable parallel processing.
/// Below this threshold, sequential processing is faster due to
/// parallelization overhead.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 50;

/// Intermediate representation of host values.
///
/// All variants own their data and are `Send + Sync`; no variant holds a
/// reference into the host runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedValue {
    Null,
    Bool(bool),
    /// Integers are always encoded as BSON Int64
    Int64(i64),
    /// Integer outside the i64 range, kept as its decimal digits and encoded
    /// as Decimal128 rather than truncated
    BigInt(String),
    /// Doubles pass through unchanged, including NaN and +/-Inf
    Double(f64),
    String(String),
    /// 24-character hex string, parsed to ObjectId during encoding
    ObjectId(String),
    /// Milliseconds since the Unix epoch
    DateTimeMillis(i64),
    Bytes(Vec<u8>),
    /// Decimal kept as its string representation, parsed to Decimal128 later
    Decimal(String),
    Array(Vec<ExtractedValue>),
    /// Ordered field list; insertion order is preserved through encoding
    Document(Vec<(String, ExtractedValue)>),
}

/// The extracted field list of one document
pub type DocumentFields = Vec<(String, ExtractedValue)>;

/// Convert an extracted value to BSON (no host lock required)
pub fn extracted_to_bson(value: ExtractedValue) -> Bson {
    match value {
        ExtractedValue::Null => Bson::Null,
        ExtractedValue::Bool(b) => Bson::Boolean(b),
        ExtractedValue::Int64(i) => Bson::Int64(i),
        ExtractedValue::BigInt(s) => Decimal128::from_str(&s)
            .map(Bson::Decimal128)
            .unwrap_or_else(|_| Bson::String(s)),
        ExtractedValue::Double(f) => Bson::Double(f),
        ExtractedValue::String(s) => Bson::String(s),
        ExtractedValue::ObjectId(s) => ObjectId::parse_str(&s)
            .map(Bson::ObjectId)
            .unwrap_or_else(|_| Bson::String(s)),
        ExtractedValue::DateTimeMillis(millis) => Bson::DateTime(bson::DateTime::from_millis(millis)),
        ExtractedValue::Bytes(b) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: b,
        }),
        ExtractedValue::Decimal(s) => Decimal128::from_str(&s)
            .map(Bson::Decimal128)
            .unwrap_or_else(|_| Bson::String(s)),
        ExtractedValue::Array(arr) => Bson::Array(arr.into_iter().map(extracted_to_bson).collect()),
        ExtractedValue::Document(fields) => Bson::Document(fields_to_bson_document(fields)),
    }
}

/// Convert an extracted field list to a BSON document
pub fn fields_to_bson_document(fields: DocumentFields) -> BsonDocument {
    let mut doc = BsonDocument::new();
    for (key, value) in fields {
        doc.insert(key, extracted_to_bson(value));
    }
    doc
}

/// Convert BSON to an extracted value (no host lock required)
pub fn bson_to_extracted(value: &Bson) -> ExtractedValue {
    match value {
        Bson::Null => ExtractedValue::Null,
        Bson::Boolean(b) => ExtractedValue::Bool(*b),
        Bson::Int32(i) => ExtractedValue::Int64(*i as i64),
        Bson::Int64(i) => ExtractedValue::Int64(*i),
        Bson::Double(f) => ExtractedValue::Double(*f),
        Bson::String(s) => ExtractedValue::String(s.clone()),
        Bson::ObjectId(oid) => ExtractedValue::ObjectId(oid.to_hex()),
        Bson::DateTime(dt) => ExtractedValue::DateTimeMillis(dt.timestamp_millis()),
        Bson::Binary(bin) => ExtractedValue::Bytes(bin.bytes.clone()),
        Bson::Decimal128(dec) => ExtractedValue::Decimal(dec.to_string()),
        Bson::Array(arr) => ExtractedValue::Array(arr.iter().map(bson_to_extracted).collect()),
        Bson::Document(doc) => ExtractedValue::Document(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_extracted(v)))
                .collect(),
        ),
        // Remaining BSON types (regex, timestamps, symbols) have no host
        // counterpart here; surface them as their string rendering.
        other => ExtractedValue::String(format!("{:?}", other)),
    }
}

/// Convert a BSON document to an extracted field list, `_id` first.
pub fn bson_doc_to_fields(doc: &BsonDocument) -> DocumentFields {
    let mut fields = Vec::with_capacity(doc.len());
    if let Some(id) = doc.get("_id") {
        fields.push(("_id".to_string(), bson_to_extracted(id)));
    }
    for (key, value) in doc.iter() {
        if key == "_id" {
            continue;
        }
        fields.push((key.clone(), bson_to_extracted(value)));
    }
    fields
}

/// Encode a batch of extracted documents to BSON.
///
/// Batches of `parallel_threshold` or more are converted on the rayon pool.
/// Output order always matches input order: the parallel path is an indexed
/// map-collect, not an unordered reduction.
pub fn encode_batch(batch: Vec<DocumentFields>, parallel_threshold: usize) -> Vec<BsonDocument> {
    if batch.len() >= parallel_threshold {
        batch.into_par_iter().map(fields_to_bson_document).collect()
    } else {
        batch.into_iter().map(fields_to_bson_document).collect()
    }
}

/// Decode a batch of BSON documents to extracted field lists, `_id` first in
/// each output. Same ordering guarantee as [`encode_batch`].
pub fn decode_batch(docs: Vec<BsonDocument>, parallel_threshold: usize) -> Vec<DocumentFields> {
    if docs.len() >= parallel_threshold {
        docs.par_iter().map(bson_doc_to_fields).collect()
    } else {
        docs.iter().map(bson_doc_to_fields).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_primitive_round_trips() {
        let values = vec![
            ExtractedValue::Null,
            ExtractedValue::Bool(true),
            ExtractedValue::Int64(42),
            ExtractedValue::Double(2.5),
            ExtractedValue::String("hello".to_string()),
            ExtractedValue::Bytes(vec![0, 1, 255]),
            ExtractedValue::DateTimeMillis(1_700_000_000_000),
        ];
        for value in values {
            let bson = extracted_to_bson(value.clone());
            assert_eq!(bson_to_extracted(&bson), value);
        }
    }

    #[test]
    fn test_int_stays_int_double_stays_double() {
        assert_eq!(extracted_to_bson(ExtractedValue::Int64(7)), Bson::Int64(7));
        assert_eq!(extracted_to_bson(ExtractedValue::Double(7.0)), Bson::Double(7.0));
    }

    #[test]
    fn test_i64_bounds_stay_int64() {
        for v in [i64::MAX, i64::MIN, 0] {
            assert_eq!(extracted_to_bson(ExtractedValue::Int64(v)), Bson::Int64(v));
        }
    }

    #[test]
    fn test_bigint_becomes_decimal128() {
        // i64::MAX + 1
        let bson = extracted_to_bson(ExtractedValue::BigInt("9223372036854775808".to_string()));
        match bson {
            Bson::Decimal128(dec) => assert_eq!(dec.to_string(), "9223372036854775808"),
            other => panic!("expected Decimal128, got {:?}", other),
        }
    }

    #[test]
    fn test_decimal_round_trips_exactly() {
        let bson = extracted_to_bson(ExtractedValue::Decimal("123.456".to_string()));
        assert_eq!(
            bson_to_extracted(&bson),
            ExtractedValue::Decimal("123.456".to_string())
        );
    }

    #[test]
    fn test_nan_and_infinity_pass_through() {
        let nan = extracted_to_bson(ExtractedValue::Double(f64::NAN));
        match nan {
            Bson::Double(f) => assert!(f.is_nan()),
            other => panic!("expected Double, got {:?}", other),
        }
        assert_eq!(
            extracted_to_bson(ExtractedValue::Double(f64::INFINITY)),
            Bson::Double(f64::INFINITY)
        );
        assert_eq!(
            extracted_to_bson(ExtractedValue::Double(f64::NEG_INFINITY)),
            Bson::Double(f64::NEG_INFINITY)
        );
    }

    #[test]
    fn test_objectid_hex_round_trip() {
        let hex = "507f1f77bcf86cd799439011";
        let bson = extracted_to_bson(ExtractedValue::ObjectId(hex.to_string()));
        assert!(matches!(bson, Bson::ObjectId(_)));
        assert_eq!(bson_to_extracted(&bson), ExtractedValue::ObjectId(hex.to_string()));
    }

    #[test]
    fn test_invalid_objectid_falls_back_to_string() {
        let bson = extracted_to_bson(ExtractedValue::ObjectId("not-hex".to_string()));
        assert_eq!(bson, Bson::String("not-hex".to_string()));
    }

    #[test]
    fn test_int32_reads_as_int64() {
        assert_eq!(bson_to_extracted(&Bson::Int32(9)), ExtractedValue::Int64(9));
    }

    #[test]
    fn test_document_preserves_field_order() {
        let fields = vec![
            ("zeta".to_string(), ExtractedValue::Int64(1)),
            ("alpha".to_string(), ExtractedValue::Int64(2)),
            ("mid".to_string(), ExtractedValue::Int64(3)),
        ];
        let doc = fields_to_bson_document(fields);
        let keys: Vec<&str> = doc.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_nested_round_trip() {
        let value = ExtractedValue::Document(vec![
            (
                "tags".to_string(),
                ExtractedValue::Array(vec![
                    ExtractedValue::String("a".to_string()),
                    ExtractedValue::Int64(2),
                ]),
            ),
            (
                "address".to_string(),
                ExtractedValue::Document(vec![(
                    "city".to_string(),
                    ExtractedValue::String("Berlin".to_string()),
                )]),
            ),
        ]);
        let bson = extracted_to_bson(value.clone());
        assert_eq!(bson_to_extracted(&bson), value);
    }

    #[test]
    fn test_decode_emits_id_first() {
        let doc = doc! { "name": "Alice", "age": 30i64, "_id": ObjectId::new() };
        let fields = bson_doc_to_fields(&doc);
        assert_eq!(fields[0].0, "_id");
        assert_eq!(fields[1].0, "name");
        assert_eq!(fields[2].0, "age");
    }

    fn numbered_batch(n: usize) -> Vec<DocumentFields> {
        (0..n)
            .map(|i| vec![("i".to_string(), ExtractedValue::Int64(i as i64))])
            .collect()
    }

    #[test]
    fn test_encode_batch_order_below_threshold() {
        let encoded = encode_batch(numbered_batch(DEFAULT_PARALLEL_THRESHOLD - 1), DEFAULT_PARALLEL_THRESHOLD);
        for (i, doc) in encoded.iter().enumerate() {
            assert_eq!(doc.get_i64("i").unwrap(), i as i64);
        }
    }

    #[test]
    fn test_encode_batch_order_at_threshold() {
        let encoded = encode_batch(numbered_batch(DEFAULT_PARALLEL_THRESHOLD), DEFAULT_PARALLEL_THRESHOLD);
        assert_eq!(encoded.len(), DEFAULT_PARALLEL_THRESHOLD);
        for (i, doc) in encoded.iter().enumerate() {
            assert_eq!(doc.get_i64("i").unwrap(), i as i64);
        }
    }

    #[test]
    fn test_parallel_and_sequential_encode_identical() {
        let batch = numbered_batch(100);
        let sequential = encode_batch(batch.clone(), usize::MAX);
        let parallel = encode_batch(batch, 1);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_decode_batch_order_preserved() {
        let docs: Vec<BsonDocument> = (0..120).map(|i| doc! { "i": i as i64 }).collect();
        let decoded = decode_batch(docs, DEFAULT_PARALLEL_THRESHOLD);
        for (i, fields) in decoded.iter().enumerate() {
            assert_eq!(fields[0], ("i".to_string(), ExtractedValue::Int64(i as i64)));
        }
    }
}
