//! Application Insights telemetry sink.
//!
//! Pool operations are tracked as `VMSSOperation` custom events. Tracking is
//! fire-and-forget: the event is posted from a spawned task and a delivery
//! failure costs nothing but a log line.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vmpool_core::VmOperation;

use crate::provider::TelemetrySink;

const TRACK_URL: &str = "https://dc.services.visualstudio.com/v2/track";

/// Telemetry sink posting custom events to Application Insights.
pub struct AppInsights {
    http: reqwest::Client,
    instrumentation_key: String,
}

impl AppInsights {
    pub fn new(instrumentation_key: &str) -> Self {
        let sink = Self {
            http: reqwest::Client::new(),
            instrumentation_key: instrumentation_key.to_string(),
        };
        info!("initialized telemetry (events may take minutes to appear)");
        sink.post(envelope(
            &sink.instrumentation_key,
            "MonitorStartup",
            json!({
                "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
        ));
        sink
    }

    fn post(&self, body: Value) {
        let http = self.http.clone();
        tokio::spawn(async move {
            match http.post(TRACK_URL).json(&body).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    warn!(status = %response.status(), "telemetry ingestion rejected event")
                }
                Err(e) => warn!(error = %e, "failed to post telemetry event"),
            }
        });
    }
}

impl TelemetrySink for AppInsights {
    fn track_operation(&self, operation: VmOperation) {
        let properties = operation_properties(&operation);
        debug!(
            operation = %operation.operation,
            success = operation.success,
            "tracking pool operation"
        );
        self.post(envelope(
            &self.instrumentation_key,
            "VMSSOperation",
            properties,
        ));
    }
}

/// Sink used when no instrumentation key is configured.
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn track_operation(&self, operation: VmOperation) {
        debug!(
            operation = %operation.operation,
            success = operation.success,
            "telemetry disabled, dropping event"
        );
    }
}

fn envelope(instrumentation_key: &str, event_name: &str, properties: Value) -> Value {
    json!({
        "name": "Microsoft.ApplicationInsights.Event",
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "iKey": instrumentation_key,
        "data": {
            "baseType": "EventData",
            "baseData": {
                "ver": 2,
                "name": event_name,
                "properties": properties,
            }
        }
    })
}

fn operation_properties(operation: &VmOperation) -> Value {
    json!({
        "operationId": Uuid::new_v4().to_string(),
        "operation": operation.operation,
        "resourceId": operation.resource_id.clone().unwrap_or_default(),
        "region": operation.region,
        "duration": operation.duration.as_secs().to_string(),
        "success": operation.success.to_string(),
        "errorMessage": operation.error_message.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn envelope_carries_ikey_and_event_name() {
        let body = envelope("key-123", "VMSSOperation", json!({"operation": "clean"}));
        assert_eq!(body["iKey"], "key-123");
        assert_eq!(body["data"]["baseType"], "EventData");
        assert_eq!(body["data"]["baseData"]["name"], "VMSSOperation");
        assert_eq!(body["data"]["baseData"]["properties"]["operation"], "clean");
    }

    #[test]
    fn operation_properties_flatten_the_event() {
        let mut op = VmOperation::new("provision", "westeurope");
        op.duration = Duration::from_secs(42);
        op.resource_id = Some("7".to_string());
        op.fail("boom");

        let props = operation_properties(&op);
        assert_eq!(props["operation"], "provision");
        assert_eq!(props["region"], "westeurope");
        assert_eq!(props["duration"], "42");
        assert_eq!(props["success"], "false");
        assert_eq!(props["errorMessage"], "boom");
        assert_eq!(props["resourceId"], "7");
        assert!(!props["operationId"].as_str().unwrap().is_empty());
    }
}
