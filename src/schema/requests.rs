use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ClientCapabilities, Cursor, Implementation, RequestId};

/// Requests a client can send to this server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub(crate) enum ClientRequest {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "initialize")]
    Initialize {
        #[serde(rename = "protocolVersion")]
        protocol_version: String,
        #[serde(default)]
        capabilities: ClientCapabilities,
        #[serde(rename = "clientInfo")]
        client_info: Implementation,
    },
    #[serde(rename = "logging/setLevel")]
    SetLevel { level: LoggingLevel },
    #[serde(rename = "tools/call")]
    CallTool {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<Map<String, Value>>,
    },
    #[serde(rename = "tools/list")]
    ListTools {
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor: Option<Cursor>,
    },
}

/// Notifications sent from the client to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ClientNotification {
    /// The client is abandoning an in-flight request.
    #[serde(rename = "notifications/cancelled")]
    Cancelled {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "notifications/initialized")]
    Initialized,
}

/// Notifications sent from the server to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ServerNotification {
    #[serde(rename = "notifications/message")]
    LoggingMessage {
        level: LoggingLevel,
        #[serde(skip_serializing_if = "Option::is_none")]
        logger: Option<String>,
        data: Value,
    },
}

impl ServerNotification {
    pub fn method(&self) -> &'static str {
        match self {
            ServerNotification::LoggingMessage { .. } => "notifications/message",
        }
    }
}

/// Syslog severities, as used by `logging/setLevel` and `notifications/message`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_tool_request_decodes() {
        let value = serde_json::json!({
            "method": "tools/call",
            "name": "get_current_weather",
            "arguments": {"location": "北京"}
        });
        match serde_json::from_value::<ClientRequest>(value).unwrap() {
            ClientRequest::CallTool { name, arguments } => {
                assert_eq!(name, "get_current_weather");
                assert_eq!(arguments.unwrap()["location"], "北京");
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_logging_level_ordering() {
        assert!(LoggingLevel::Warning > LoggingLevel::Info);
        assert!(LoggingLevel::Debug < LoggingLevel::Error);
        let json = serde_json::to_string(&LoggingLevel::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
