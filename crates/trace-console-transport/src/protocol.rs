//! Event contract between the console and the remote debug server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use trace_console_core::TraceRecord;
use uuid::Uuid;

/// Identifier attached to each remote execution request.
pub type ExecutionId = Uuid;

pub const EVENT_FN_TRACE: &str = "fn-trace";
pub const EVENT_CONSOLE_LOG: &str = "console-log";
pub const EVENT_EXECUTE_RESULT: &str = "execute-result";
pub const EVENT_EXECUTE_CODE: &str = "execute-code";

/// Console output forwarded by the remote process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleLine {
    /// Console method used remotely (`log`, `warn`, `error`, ...).
    #[serde(rename = "type")]
    pub level: String,
    pub content: String,
    /// Remote timestamp in milliseconds.
    #[serde(default)]
    pub time: f64,
}

/// Result of a remote execution.
///
/// `result` is plain data and is never evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    /// Echo of the correlation id sent with `execute-code`, when supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Event received from the remote side.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Session established.
    Connect,
    /// Session lost. Reported once per link.
    Disconnect { reason: String },
    /// Function trace. `None` when the payload was absent or null.
    FnTrace(Option<TraceRecord>),
    ConsoleLog(ConsoleLine),
    ExecuteResult(ExecutionResult),
    /// Event this console does not handle.
    Other { name: String },
}

impl InboundEvent {
    /// Build from a Socket.IO event name and its arguments.
    ///
    /// # Errors
    /// Returns error if a known event carries a malformed payload.
    pub fn from_socket_event(name: &str, args: Vec<Value>) -> Result<Self, serde_json::Error> {
        let payload = args.into_iter().next().unwrap_or(Value::Null);
        match name {
            EVENT_FN_TRACE => {
                if payload.is_null() {
                    Ok(Self::FnTrace(None))
                } else {
                    Ok(Self::FnTrace(Some(serde_json::from_value(payload)?)))
                }
            }
            EVENT_CONSOLE_LOG => Ok(Self::ConsoleLog(serde_json::from_value(payload)?)),
            EVENT_EXECUTE_RESULT => Ok(Self::ExecuteResult(serde_json::from_value(payload)?)),
            other => Ok(Self::Other {
                name: other.to_string(),
            }),
        }
    }
}

/// Event sent to the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Run `code` remotely.
    ExecuteCode { id: ExecutionId, code: String },
}

impl OutboundEvent {
    /// Socket.IO event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ExecuteCode { .. } => EVENT_EXECUTE_CODE,
        }
    }

    /// Socket.IO event arguments. The code string stays first so servers
    /// that ignore the correlation id keep working.
    #[must_use]
    pub fn args(&self) -> Vec<Value> {
        match self {
            Self::ExecuteCode { id, code } => {
                vec![Value::String(code.clone()), Value::String(id.to_string())]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trace_console_core::CallKind;

    use super::*;

    #[test]
    fn test_fn_trace_payload() {
        let event = InboundEvent::from_socket_event(
            EVENT_FN_TRACE,
            vec![json!({"callPath": "a.b", "type": "AsyncFunction", "isFormatted": true})],
        )
        .unwrap();
        let InboundEvent::FnTrace(Some(record)) = event else {
            panic!("Wrong event type");
        };
        assert_eq!(record.call_path.as_deref(), Some("a.b"));
        assert_eq!(record.kind, Some(CallKind::AsyncFunction));
    }

    #[test]
    fn test_fn_trace_with_unknown_kind_is_kept() {
        let event = InboundEvent::from_socket_event(
            EVENT_FN_TRACE,
            vec![json!({"callPath": "a", "type": "Getter", "status": "pending"})],
        )
        .unwrap();
        let InboundEvent::FnTrace(Some(record)) = event else {
            panic!("Wrong event type");
        };
        assert_eq!(record.call_path.as_deref(), Some("a"));
        assert_eq!(record.kind, None);
        assert_eq!(record.status, None);
    }

    #[test]
    fn test_absent_fn_trace_payload() {
        assert_eq!(
            InboundEvent::from_socket_event(EVENT_FN_TRACE, vec![]).unwrap(),
            InboundEvent::FnTrace(None)
        );
        assert_eq!(
            InboundEvent::from_socket_event(EVENT_FN_TRACE, vec![Value::Null]).unwrap(),
            InboundEvent::FnTrace(None)
        );
    }

    #[test]
    fn test_execute_result_is_data() {
        let event = InboundEvent::from_socket_event(
            EVENT_EXECUTE_RESULT,
            vec![json!({"success": true, "result": "alert(1)"})],
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::ExecuteResult(ExecutionResult {
                success: true,
                result: json!("alert(1)"),
                id: None,
            })
        );
    }

    #[test]
    fn test_console_log() {
        let event = InboundEvent::from_socket_event(
            EVENT_CONSOLE_LOG,
            vec![json!({"type": "warn", "content": "low disk", "time": 1_700_000_000_000_u64})],
        )
        .unwrap();
        let InboundEvent::ConsoleLog(line) = event else {
            panic!("Wrong event type");
        };
        assert_eq!(line.level, "warn");
        assert_eq!(line.content, "low disk");
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(InboundEvent::from_socket_event(EVENT_FN_TRACE, vec![json!(5)]).is_err());
        assert!(InboundEvent::from_socket_event(EVENT_EXECUTE_RESULT, vec![json!({})]).is_err());
    }

    #[test]
    fn test_unknown_event() {
        assert_eq!(
            InboundEvent::from_socket_event("heartbeat", vec![]).unwrap(),
            InboundEvent::Other {
                name: "heartbeat".to_string()
            }
        );
    }

    #[test]
    fn test_execute_code_args() {
        let id = Uuid::new_v4();
        let event = OutboundEvent::ExecuteCode {
            id,
            code: "process.uptime()".to_string(),
        };
        assert_eq!(event.name(), "execute-code");
        assert_eq!(
            event.args(),
            vec![json!("process.uptime()"), json!(id.to_string())]
        );
    }
}
