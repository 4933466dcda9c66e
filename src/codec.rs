use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error};

use crate::{
    error::{Error, Result},
    schema::JSONRPCMessage,
};

/// Newline-delimited JSON-RPC framing, as used by the stdio transport.
#[derive(Debug, Default)]
pub(crate) struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for JsonRpcCodec {
    type Error = Error;
    type Item = JSONRPCMessage;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(n) = src.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };

            let line = src.split_to(n + 1);
            let json_bytes = line[..n].trim_ascii();

            // Blank lines between messages are tolerated
            if json_bytes.is_empty() {
                continue;
            }

            debug!(
                "Decoding JSON-RPC message: {:?}",
                std::str::from_utf8(json_bytes)
            );

            let message: JSONRPCMessage = serde_json::from_slice(json_bytes).map_err(|e| {
                error!("Failed to parse JSON-RPC message: {}", e);
                match std::str::from_utf8(json_bytes) {
                    Ok(text) => Error::InvalidMessageFormat {
                        message: format!("Invalid JSON: {e} (content: {text})"),
                    },
                    Err(_) => Error::InvalidMessageFormat {
                        message: format!("Invalid JSON: {e} (non-UTF8 content)"),
                    },
                }
            })?;
            return Ok(Some(message));
        }
    }
}

impl Encoder<JSONRPCMessage> for JsonRpcCodec {
    type Error = Error;

    fn encode(&mut self, item: JSONRPCMessage, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        debug!("Encoded JSON-RPC message: {:?}", std::str::from_utf8(&json));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RequestId;

    #[test]
    fn test_decode_skips_blank_lines_and_crlf() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(
            &b"\n\r\n{\"jsonrpc\":\"2.0\",\"id\":\"a\",\"method\":\"ping\"}\r\n"[..],
        );

        match codec.decode(&mut buf).unwrap().unwrap() {
            JSONRPCMessage::Request(req) => {
                assert_eq!(req.id, RequestId::String("a".into()));
                assert_eq!(req.request.method, "ping");
            }
            other => panic!("Expected request message, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_newline() {
        let mut codec = JsonRpcCodec::new();
        let line = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let mut buf = BytesMut::from(&line[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_u8(b'\n');
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(JSONRPCMessage::Notification(_))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(&b"not json\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::InvalidMessageFormat { .. }));
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let msg: JSONRPCMessage = serde_json::from_str(raw).unwrap();
        codec.encode(msg, &mut buf).unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 1);
    }
}
