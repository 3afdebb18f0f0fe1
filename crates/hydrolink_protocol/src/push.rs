//! Push-channel message decoding.
//!
//! The service sends JSON text frames of the form
//! `{"type": "<kind>", "data": {...}}`:
//!
//! - `active-simulations` / `active-simulation`: `data` maps simulation ids to
//!   opaque payloads. Only the ids are used; full records are re-fetched.
//! - `progress`: `{"simulation_id": 1, "progress": 42}`
//! - `status`: `{"simulation_id": 1, "status": "finished"}`

use crate::ids::SimulationId;
use crate::status::StatusName;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Decoded push-channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Ids of simulations whose full record must be re-fetched.
    BulkRefresh {
        payloads: BTreeMap<SimulationId, Value>,
    },
    ProgressDelta {
        simulation_id: SimulationId,
        percentage: f64,
    },
    StatusDelta {
        simulation_id: SimulationId,
        status: StatusName,
    },
    /// A message type this client does not handle.
    Unhandled { kind: String },
}

#[derive(Debug, Error)]
pub enum PushParseError {
    #[error("Invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed '{kind}' message: {reason}")]
    Malformed { kind: String, reason: String },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl PushMessage {
    pub fn parse(text: &str) -> Result<Self, PushParseError> {
        let frame: RawFrame = serde_json::from_str(text)?;
        let malformed = |reason: &str| PushParseError::Malformed {
            kind: frame.kind.clone(),
            reason: reason.to_string(),
        };

        match frame.kind.as_str() {
            "active-simulations" | "active-simulation" => {
                let entries = frame
                    .data
                    .as_object()
                    .ok_or_else(|| malformed("data is not an object"))?;
                let mut payloads = BTreeMap::new();
                for (key, payload) in entries {
                    let id = key
                        .parse::<SimulationId>()
                        .map_err(|e| malformed(&e.to_string()))?;
                    payloads.insert(id, payload.clone());
                }
                Ok(Self::BulkRefresh { payloads })
            }
            "progress" => {
                let simulation_id = simulation_id_field(&frame.data)
                    .ok_or_else(|| malformed("missing simulation_id"))?;
                let percentage = number_field(&frame.data, "progress")
                    .ok_or_else(|| malformed("missing progress"))?;
                Ok(Self::ProgressDelta {
                    simulation_id,
                    percentage,
                })
            }
            "status" => {
                let simulation_id = simulation_id_field(&frame.data)
                    .ok_or_else(|| malformed("missing simulation_id"))?;
                let status = frame
                    .data
                    .get("status")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("missing status"))?;
                Ok(Self::StatusDelta {
                    simulation_id,
                    status: StatusName::from(status),
                })
            }
            _ => Ok(Self::Unhandled {
                kind: frame.kind.clone(),
            }),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::BulkRefresh { .. } => "bulk-refresh",
            Self::ProgressDelta { .. } => "progress-delta",
            Self::StatusDelta { .. } => "status-delta",
            Self::Unhandled { kind } => kind,
        }
    }
}

// The service is not consistent about sending ids as numbers or strings.
fn simulation_id_field(data: &Value) -> Option<SimulationId> {
    match data.get("simulation_id")? {
        Value::Number(n) => n.as_u64().map(SimulationId),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn number_field(data: &Value, key: &str) -> Option<f64> {
    match data.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bulk_refresh() {
        let msg = PushMessage::parse(
            r#"{"type": "active-simulations", "data": {"12": "{\"progress\": 5}", "7": "{}"}}"#,
        )
        .unwrap();
        match msg {
            PushMessage::BulkRefresh { payloads } => {
                let ids: Vec<_> = payloads.keys().copied().collect();
                assert_eq!(ids, vec![SimulationId(7), SimulationId(12)]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_progress_with_string_id() {
        let msg =
            PushMessage::parse(r#"{"type": "progress", "data": {"simulation_id": "3", "progress": 55}}"#)
                .unwrap();
        assert_eq!(
            msg,
            PushMessage::ProgressDelta {
                simulation_id: SimulationId(3),
                percentage: 55.0
            }
        );
    }

    #[test]
    fn test_parse_status() {
        let msg =
            PushMessage::parse(r#"{"type": "status", "data": {"simulation_id": 3, "status": "crashed"}}"#)
                .unwrap();
        assert_eq!(
            msg,
            PushMessage::StatusDelta {
                simulation_id: SimulationId(3),
                status: StatusName::Crashed
            }
        );
    }

    #[test]
    fn test_unknown_type_is_unhandled() {
        let msg = PushMessage::parse(r#"{"type": "heartbeat"}"#).unwrap();
        assert_eq!(msg.kind(), "heartbeat");
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(PushMessage::parse("not json"), Err(PushParseError::Json(_))));
        assert!(matches!(
            PushMessage::parse(r#"{"type": "progress", "data": {"progress": 1}}"#),
            Err(PushParseError::Malformed { .. })
        ));
        assert!(matches!(
            PushMessage::parse(r#"{"type": "active-simulations", "data": []}"#),
            Err(PushParseError::Malformed { .. })
        ));
    }
}
