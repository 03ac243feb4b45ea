//! Domain types shared by every vmpool crate.
//!
//! Two views of the same machine exist side by side: [`VmInstance`] is what
//! the cloud scale set reports (read-only to us), [`VmRecord`] is what the
//! control loops write into the state store. The loops converge the two; no
//! distributed transaction ties them together.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Power state of a scale-set VM as reported by the instance view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Stopped,
    Deallocated,
}

impl PowerState {
    /// Parse an instance-view status code such as `PowerState/running`.
    pub fn from_status_code(code: &str) -> Option<Self> {
        match code.strip_prefix("PowerState/")? {
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "deallocated" => Some(Self::Deallocated),
            _ => None,
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deallocated => "deallocated",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a pool VM, as recorded in the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmStatus {
    Available,
    Reserved,
    Unavailable,
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Available => "Available",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
        };
        f.write_str(s)
    }
}

/// A VM as reported by the scale-set inventory.
///
/// `vm_id` is the stable cloud-assigned identity; `instance_id` is the
/// ephemeral ordinal within the scale set and is what the per-VM cloud
/// operations (start/stop/delete) address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInstance {
    pub vm_id: String,
    pub instance_id: String,
    pub private_ip: String,
    pub public_ip: String,
    pub power_state: PowerState,
}

/// Inventory listing filter. An empty power-state list matches everything.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub power_states: Vec<PowerState>,
}

impl ListFilter {
    /// Filter to the given power states.
    pub fn with_power_states(states: &[PowerState]) -> Self {
        Self {
            power_states: states.to_vec(),
        }
    }

    pub fn matches(&self, state: PowerState) -> bool {
        self.power_states.is_empty() || self.power_states.contains(&state)
    }
}

/// The state-store record for a pool VM.
///
/// Serialized as a self-describing JSON blob under `vmss:instance:{vmId}`.
/// Timestamps are RFC 3339 UTC with second precision; `updated_at` anchors
/// the cleaner's age check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmRecord {
    pub vm_id: String,
    pub instance_id: String,
    pub public_ip: String,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub session_id: String,
    pub status: VmStatus,
    pub created_at: String,
    pub updated_at: String,
    pub region: String,
    pub used: bool,
    pub warm: bool,
}

impl VmRecord {
    /// Build a fresh `Available` record for an inactive scale-set VM.
    ///
    /// `warm` is true for stopped (pre-booted) VMs, false for deallocated
    /// ones. Both timestamps start at `now` so the record is always
    /// age-checkable.
    pub fn available(instance: &VmInstance, region: &str) -> Self {
        let now = now_rfc3339();
        Self {
            vm_id: instance.vm_id.clone(),
            instance_id: instance.instance_id.clone(),
            public_ip: instance.public_ip.clone(),
            client_ip: String::new(),
            session_id: String::new(),
            status: VmStatus::Available,
            created_at: now.clone(),
            updated_at: now,
            region: region.to_string(),
            used: false,
            warm: instance.power_state == PowerState::Stopped,
        }
    }

    /// Move the record to a new status, refreshing `updated_at`.
    pub fn transition(&mut self, status: VmStatus) {
        self.status = status;
        self.updated_at = now_rfc3339();
    }

    /// Seconds elapsed since `updated_at`, or an error if the field does not
    /// parse as RFC 3339.
    pub fn age(&self, now: DateTime<Utc>) -> anyhow::Result<Duration> {
        let updated = DateTime::parse_from_rfc3339(&self.updated_at)?.with_timezone(&Utc);
        Ok((now - updated).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// Current UTC time as RFC 3339 with second precision (`Z` suffix).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One tracked pool operation, emitted to the telemetry sink.
#[derive(Debug, Clone, PartialEq)]
pub struct VmOperation {
    pub operation: String,
    pub duration: Duration,
    pub success: bool,
    pub error_message: Option<String>,
    pub resource_id: Option<String>,
    pub region: String,
}

impl VmOperation {
    pub fn new(operation: &str, region: &str) -> Self {
        Self {
            operation: operation.to_string(),
            duration: Duration::ZERO,
            success: true,
            error_message: None,
            resource_id: None,
            region: region.to_string(),
        }
    }

    /// Record a failure, keeping the first error message seen.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        if self.error_message.is_none() {
            self.error_message = Some(message.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_instance(power: PowerState) -> VmInstance {
        VmInstance {
            vm_id: "aaaa-bbbb".to_string(),
            instance_id: "3".to_string(),
            private_ip: "10.0.0.7".to_string(),
            public_ip: "0.0.0.0".to_string(),
            power_state: power,
        }
    }

    #[test]
    fn power_state_from_status_code() {
        assert_eq!(
            PowerState::from_status_code("PowerState/running"),
            Some(PowerState::Running)
        );
        assert_eq!(
            PowerState::from_status_code("PowerState/deallocated"),
            Some(PowerState::Deallocated)
        );
        assert_eq!(PowerState::from_status_code("ProvisioningState/succeeded"), None);
        assert_eq!(PowerState::from_status_code("PowerState/unknown"), None);
    }

    #[test]
    fn record_serializes_with_wire_field_names() {
        let record = VmRecord::available(&test_instance(PowerState::Stopped), "westeurope");
        let json = record.to_json().unwrap();

        for field in [
            "vmId", "instanceId", "publicIp", "clientIp", "sessionId", "status",
            "createdAt", "updatedAt", "region", "used", "warm",
        ] {
            assert!(json.contains(field), "missing field {field} in {json}");
        }
        assert!(json.contains("\"status\":\"Available\""));
        assert!(json.contains("\"warm\":true"));
    }

    #[test]
    fn record_roundtrip() {
        let record = VmRecord::available(&test_instance(PowerState::Deallocated), "eastus");
        let parsed = VmRecord::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(parsed, record);
        assert!(!parsed.warm);
    }

    #[test]
    fn transition_refreshes_updated_at() {
        let mut record = VmRecord::available(&test_instance(PowerState::Stopped), "eastus");
        record.updated_at = "2020-01-01T00:00:00Z".to_string();
        record.transition(VmStatus::Reserved);
        assert_eq!(record.status, VmStatus::Reserved);
        assert_ne!(record.updated_at, "2020-01-01T00:00:00Z");
    }

    #[test]
    fn age_is_measured_from_updated_at() {
        let mut record = VmRecord::available(&test_instance(PowerState::Stopped), "eastus");
        record.updated_at = "2024-05-01T12:00:00Z".to_string();
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:08:20Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(record.age(now).unwrap(), Duration::from_secs(500));
    }

    #[test]
    fn age_rejects_garbage_timestamps() {
        let mut record = VmRecord::available(&test_instance(PowerState::Stopped), "eastus");
        record.updated_at = "not-a-time".to_string();
        assert!(record.age(Utc::now()).is_err());
    }

    #[test]
    fn timestamps_have_second_precision() {
        let now = now_rfc3339();
        assert!(now.ends_with('Z'));
        assert!(!now.contains('.'));
        assert!(DateTime::parse_from_rfc3339(&now).is_ok());
    }

    #[test]
    fn list_filter_matches() {
        let all = ListFilter::default();
        assert!(all.matches(PowerState::Running));

        let inactive =
            ListFilter::with_power_states(&[PowerState::Stopped, PowerState::Deallocated]);
        assert!(inactive.matches(PowerState::Stopped));
        assert!(!inactive.matches(PowerState::Running));
    }

    #[test]
    fn operation_fail_keeps_first_message() {
        let mut op = VmOperation::new("provision", "westeurope");
        assert!(op.success);
        op.fail("first");
        op.fail("second");
        assert!(!op.success);
        assert_eq!(op.error_message.as_deref(), Some("first"));
    }
}
