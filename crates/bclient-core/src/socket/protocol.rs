//! Socket wire format.
//!
//! Outbound frames are either correlated calls
//! (`{"id", "method", "params"}`) or membership changes
//! (`{"type": "join" | "leave", "room", "token"?}`). Inbound frames are
//! either responses (`{"id", "result"}` / `{"id", "error"}`) or pushed
//! events (`{"event", "args"}`).

use serde::Serialize;
use serde_json::Value;

use crate::dispatcher::Event;
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRequest {
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MembershipRequest {
    Join {
        room: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Leave {
        room: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Call(CallRequest),
    Membership(MembershipRequest),
}

impl Outbound {
    pub fn to_json(&self) -> Result<String, ClientError> {
        serde_json::to_string(self)
            .map_err(|e| ClientError::InvalidRequest(format!("encode socket frame: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a correlated call. `Err` carries the server's error message.
    Response {
        id: u64,
        outcome: Result<Value, String>,
    },
    Event(Event),
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ClientError::InvalidResponse(format!("decode socket frame: {e}")))?;
        let Value::Object(mut frame) = value else {
            return Err(ClientError::InvalidResponse(format!(
                "socket frame must be a JSON object: {text}"
            )));
        };

        if let Some(Value::String(name)) = frame.remove("event") {
            let args = match frame.remove("args") {
                Some(Value::Array(args)) => args,
                None | Some(Value::Null) => Vec::new(),
                Some(other) => vec![other],
            };
            return Ok(Self::Event(Event { name, args }));
        }

        let id = frame
            .get("id")
            .ok_or_else(|| {
                ClientError::InvalidResponse(format!("socket frame has neither event nor id: {text}"))
            })
            .and_then(parse_id)?;

        let outcome = match frame.remove("error") {
            None | Some(Value::Null) => Ok(frame.remove("result").unwrap_or(Value::Null)),
            Some(err) => Err(error_message(err)),
        };
        Ok(Self::Response { id, outcome })
    }
}

fn parse_id(id: &Value) -> Result<u64, ClientError> {
    if let Some(n) = id.as_u64() {
        return Ok(n);
    }

    if let Some(s) = id.as_str() {
        return s
            .parse::<u64>()
            .map_err(|e| ClientError::InvalidResponse(format!("invalid response id string: {e}")));
    }

    Err(ClientError::InvalidResponse(format!("invalid response id: {id}")))
}

/// Best-effort human message from a JSON error value.
pub(crate) fn error_message(err: Value) -> String {
    match err {
        Value::String(message) => message,
        Value::Object(ref map) => match map.get("message").and_then(Value::as_str) {
            Some(message) => message.to_owned(),
            None => err.to_string(),
        },
        other => other.to_string(),
    }
}
