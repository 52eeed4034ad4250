//! Shared types used across ember crates.

use serde::{Deserialize, Serialize};

/// Immutable descriptor of an application (a deployed function).
///
/// Created by the control plane and passed into the scaler; the scaler
/// never mutates it. Applications are identified by `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Unique application id.
    pub key: String,
    /// Execution environment tag (e.g. "python3.10", "nodejs18").
    pub runtime: String,
    /// Maximum invocation duration.
    pub timeout_in_secs: u32,
    /// Memory reserved per instance.
    pub memory_in_mb: u64,
}

/// Resource envelope requested from the platform when creating a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotResourceConfig {
    pub memory_in_mb: u64,
}

/// A platform-side resource handle hosting one instance.
///
/// Owned by exactly one `Instance` until destruction; there is no
/// back-pointer from the slot to its instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub resource_config: SlotResourceConfig,
}

/// A warm, initialized execution unit placed inside a `Slot`.
///
/// This is the wire-visible record returned by platform Init. Scheduling
/// state (busy flag, last-idle timestamp) is tracked by the scaler's
/// registry, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub slot: Slot,
    pub meta: Meta,
    /// How long platform Init took, reported by the platform.
    pub init_duration_in_ms: u64,
}

/// The outcome of a successful Assign: which instance serves which request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub request_id: String,
    pub meta_key: String,
    pub instance_id: String,
}

/// Reply status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    InternalError,
}

/// Request for an instance to serve a pending invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRequest {
    pub request_id: String,
    pub meta_data: Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignReply {
    pub status: Status,
    pub assignment: Option<Assignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Invocation outcome reported alongside Idle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    /// When set, the instance misbehaved and must not be reused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub need_destroy: Option<bool>,
}

/// Return of an instance after an invocation finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleRequest {
    pub assignment: Option<Assignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<InvocationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleReply {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Point-in-time counts for one application's scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_instance: usize,
    pub total_idle_instance: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_meta() -> Meta {
        Meta {
            key: "app-1".to_string(),
            runtime: "python3.10".to_string(),
            timeout_in_secs: 30,
            memory_in_mb: 128,
        }
    }

    #[test]
    fn assign_request_round_trips_through_json() {
        let req = AssignRequest {
            request_id: "req-1".to_string(),
            meta_data: test_meta(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: AssignRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, "req-1");
        assert_eq!(back.meta_data, test_meta());
    }

    #[test]
    fn idle_request_without_result_parses() {
        let json = r#"{"assignment":{"request_id":"r","meta_key":"app-1","instance_id":"i"}}"#;
        let req: IdleRequest = serde_json::from_str(json).unwrap();
        assert!(req.result.is_none());
        assert_eq!(req.assignment.unwrap().instance_id, "i");
    }

    #[test]
    fn reply_omits_empty_error_message() {
        let reply = IdleReply {
            status: Status::Ok,
            error_message: None,
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert!(!json.contains("error_message"));
        assert!(json.contains("\"ok\""));
    }
}
