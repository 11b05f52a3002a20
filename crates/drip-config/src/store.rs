use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// A subject store from `[store.<key>]`.
///
/// `path` points at a JSON Lines file with one record per line; `fields`
/// declares the record schema as `name = "type"` pairs, where type is one of
/// `string`, `number`, `bool`, `time` or `list`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub fields: BTreeMap<String, String>,
}
