//! Key and set naming for the state store.
//!
//! Records live under `vmss:instance:{vmId}`; the three status sets hold
//! record keys (not bare vmIds). A record's `status` field and the set its
//! key belongs to are kept in agreement by the loops.

/// Set of record keys whose records are `Available`.
pub const AVAILABLE_SET: &str = "vmss:status:available";
/// Set of record keys whose records are `Reserved`.
pub const RESERVED_SET: &str = "vmss:status:reserved";
/// Set of record keys whose records are `Unavailable`.
pub const UNAVAILABLE_SET: &str = "vmss:status:unavailable";

/// All status sets, in lifecycle order.
pub const STATUS_SETS: [&str; 3] = [AVAILABLE_SET, RESERVED_SET, UNAVAILABLE_SET];

/// KEYS pattern matching every record key.
pub const RECORD_KEY_PATTERN: &str = "vmss:instance:*";

const RECORD_KEY_PREFIX: &str = "vmss:instance:";

/// Record key for a VM identity.
pub fn record_key(vm_id: &str) -> String {
    format!("{RECORD_KEY_PREFIX}{vm_id}")
}

/// Extract the VM identity from a record key, or `None` if the key does not
/// have the record prefix or carries an empty identity.
pub fn parse_vm_id(key: &str) -> Option<&str> {
    match key.strip_prefix(RECORD_KEY_PREFIX) {
        Some("") | None => None,
        Some(vm_id) => Some(vm_id),
    }
}
