//! Flat key-value encoding of a player's activity record.
//!
//! The store holds metadata fields and month buckets side by side in one
//! namespace:
//!
//! ```json
//! {
//!   "iidxId": "1234-5678",
//!   "lastDailyActivity": { "d": "20240102", "k": 7, "s": 2 },
//!   "updatedAt": 1704200000,
//!   "29_202401": [{ "d": "20240101", "k": 5, "s": 1 }, { "d": "20240102", "k": 7, "s": 2 }]
//! }
//! ```
//!
//! In memory the two halves are kept apart as [`RecordMetadata`] and
//! [`Buckets`]; they only meet here. Keys are told apart by fixed metadata
//! names and by the `<version>_<month>` shape. Anything else is ignored.

use serde_json::Value;

use crate::model::{Bucket, Buckets, RecordMetadata, VersionMonthKey};
use crate::store::KvMap;

pub const PLAYER_ID_KEY: &str = "iidxId";
pub const LAST_ACTIVITY_KEY: &str = "lastDailyActivity";
pub const UPDATED_AT_KEY: &str = "updatedAt";

/// Top-level keys owned by [`RecordMetadata`].
pub const METADATA_KEYS: [&str; 3] = [PLAYER_ID_KEY, LAST_ACTIVITY_KEY, UPDATED_AT_KEY];

/// What a top-level store key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredKey {
    Metadata,
    Bucket(VersionMonthKey),
    Unknown,
}

#[must_use]
pub fn classify_key(key: &str) -> StoredKey {
    if METADATA_KEYS.contains(&key) {
        StoredKey::Metadata
    } else if let Ok(bucket) = key.parse() {
        StoredKey::Bucket(bucket)
    } else {
        StoredKey::Unknown
    }
}

/// Metadata keys as owned strings, ready for [`crate::store::KvStore::get`].
#[must_use]
pub fn metadata_keys() -> Vec<String> {
    METADATA_KEYS.iter().map(ToString::to_string).collect()
}

/// Read the metadata fields out of a flat map, defaulting missing ones.
///
/// # Errors
///
/// Returns an error if a present metadata field has the wrong shape.
pub fn decode_metadata(map: &KvMap) -> Result<RecordMetadata, serde_json::Error> {
    let fields: KvMap = METADATA_KEYS
        .iter()
        .filter_map(|key| map.get(*key).map(|v| ((*key).to_string(), v.clone())))
        .filter(|(_, v)| !v.is_null())
        .collect();
    serde_json::from_value(Value::Object(fields))
}

/// Read every bucket-shaped key out of a flat map.
///
/// # Errors
///
/// Returns an error if a bucket value is not a list of entries.
pub fn decode_buckets(map: &KvMap) -> Result<Buckets, serde_json::Error> {
    let mut buckets = Buckets::new();
    for (key, value) in map {
        if let StoredKey::Bucket(bucket_key) = classify_key(key) {
            let bucket: Bucket = serde_json::from_value(value.clone())?;
            buckets.insert(bucket_key, bucket);
        }
    }
    Ok(buckets)
}

/// Metadata plus the buckets written alongside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityRecord {
    pub meta: RecordMetadata,
    pub buckets: Buckets,
}

impl ActivityRecord {
    /// Decode both halves from a flat map.
    ///
    /// # Errors
    ///
    /// Returns an error if any metadata field or bucket is malformed.
    pub fn from_flat(map: &KvMap) -> Result<Self, serde_json::Error> {
        Ok(Self {
            meta: decode_metadata(map)?,
            buckets: decode_buckets(map)?,
        })
    }

    /// Encode into one flat map: metadata fields beside bucket keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be serialised.
    pub fn to_flat(&self) -> Result<KvMap, serde_json::Error> {
        let mut flat = match serde_json::to_value(&self.meta)? {
            Value::Object(map) => map,
            _ => KvMap::new(),
        };
        for (key, bucket) in &self.buckets {
            flat.insert(key.to_string(), serde_json::to_value(bucket)?);
        }
        Ok(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActivityDate, DailyActivity, GameVersion};
    use serde_json::json;

    fn act(d: &str, k: u64, s: u64) -> DailyActivity {
        DailyActivity::new(ActivityDate::parse(d).expect("valid date"), k, s)
    }

    fn flat(value: Value) -> KvMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn keys_are_classified_by_name_and_shape() {
        assert_eq!(classify_key("iidxId"), StoredKey::Metadata);
        assert_eq!(classify_key("updatedAt"), StoredKey::Metadata);
        assert_eq!(
            classify_key("29_202401"),
            StoredKey::Bucket(VersionMonthKey {
                version: GameVersion(29),
                month: 202_401
            })
        );
        assert_eq!(classify_key("count"), StoredKey::Unknown);
    }

    #[test]
    fn record_flattens_metadata_beside_buckets() {
        let mut buckets = Buckets::new();
        buckets.insert(
            "29_202401".parse().expect("key"),
            Bucket(vec![act("20240102", 7, 2)]),
        );
        let record = ActivityRecord {
            meta: RecordMetadata {
                player_id: Some("1234-5678".into()),
                last_daily_activity: act("20240102", 7, 2),
                updated_at: 1_704_200_000,
            },
            buckets,
        };

        let encoded = record.to_flat().expect("encode");
        assert_eq!(
            Value::Object(encoded.clone()),
            json!({
                "iidxId": "1234-5678",
                "lastDailyActivity": { "d": "20240102", "k": 7, "s": 2 },
                "updatedAt": 1_704_200_000,
                "29_202401": [{ "d": "20240102", "k": 7, "s": 2 }],
            })
        );
        assert_eq!(ActivityRecord::from_flat(&encoded).expect("decode"), record);
    }

    #[test]
    fn missing_metadata_falls_back_to_defaults() {
        let map = flat(json!({ "29_202401": [], "count": 3 }));
        let meta = decode_metadata(&map).expect("defaults");
        assert_eq!(meta, RecordMetadata::default());
    }

    #[test]
    fn null_player_id_reads_as_absent() {
        let map = flat(json!({ "iidxId": null, "updatedAt": 5 }));
        let meta = decode_metadata(&map).expect("decode");
        assert_eq!(meta.player_id, None);
        assert_eq!(meta.updated_at, 5);
    }

    #[test]
    fn metadata_never_decodes_as_bucket() {
        let map = flat(json!({
            "iidxId": "1",
            "lastDailyActivity": { "d": "20240101", "k": 0, "s": 0 },
            "28_202312": [{ "d": "20231201", "k": 1, "s": 0 }],
        }));
        let buckets = decode_buckets(&map).expect("decode");
        assert_eq!(buckets.len(), 1);
    }

    #[test]
    fn malformed_bucket_is_an_error() {
        let map = flat(json!({ "29_202401": { "d": "20240101" } }));
        assert!(decode_buckets(&map).is_err());
    }
}
