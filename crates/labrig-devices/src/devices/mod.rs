//! Reference device types.

pub mod dev_board;
pub mod power_hub;

use std::sync::Arc;

use serde_json::Value;

use labrig_core::{PropertyMap, Result};

/// Getter reading one key from the persistent fact store.
pub(crate) fn persistent_getter(
    map: &Arc<PropertyMap>,
    key: &str,
) -> impl Fn() -> Result<Value> + Send + Sync + 'static {
    let map = map.clone();
    let key = key.to_string();
    move || Ok(map.get(&key).cloned().unwrap_or(Value::Null))
}
