//! Read side used by the popup and options views.
//!
//! Views want a flat list of entries for one game version. They read the
//! whole store and must skip the metadata that shares its namespace.

use std::collections::BTreeSet;

use crate::error::PlaylogError;
use crate::model::{DailyActivity, GameVersion};
use crate::record::decode_buckets;
use crate::store::KvStore;

/// Every stored entry for `version`, ordered by month, then insertion order.
///
/// # Errors
///
/// Returns an error if the store cannot be read or a bucket is malformed.
pub async fn load_history<S: KvStore + ?Sized>(
    store: &S,
    version: GameVersion,
) -> Result<Vec<DailyActivity>, PlaylogError> {
    let buckets = decode_buckets(&store.get_all().await?)?;
    Ok(buckets
        .into_iter()
        .filter(|(key, _)| key.version == version)
        .flat_map(|(_, bucket)| bucket)
        .collect())
}

/// Game versions that have at least one stored bucket, ascending.
///
/// # Errors
///
/// Returns an error if the store cannot be read or a bucket is malformed.
pub async fn stored_versions<S: KvStore + ?Sized>(
    store: &S,
) -> Result<Vec<GameVersion>, PlaylogError> {
    let buckets = decode_buckets(&store.get_all().await?)?;
    let versions: BTreeSet<GameVersion> = buckets.keys().map(|key| key.version).collect();
    Ok(versions.into_iter().collect())
}
