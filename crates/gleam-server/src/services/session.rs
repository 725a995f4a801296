//! Service 3: attributes of the calling session.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use gleam_rpc::{HandlerContext, MethodHandler, RpcError, decode_payload, encode_reply};

use super::messages::{AttributeKey, AttributeValue, SetAttributeRequest};

/// `session.get_attribute`
pub struct GetAttributeHandler;

#[async_trait]
impl MethodHandler for GetAttributeHandler {
    async fn handle(&self, payload: Bytes, ctx: &HandlerContext) -> Result<Bytes, RpcError> {
        let AttributeKey { key } = decode_payload(&payload)?;
        let value_json = ctx.session.attribute(&key).map(|v| v.to_string());
        Ok(encode_reply(&AttributeValue { value_json }))
    }
}

/// `session.set_attribute`; replies with the previous value.
pub struct SetAttributeHandler;

#[async_trait]
impl MethodHandler for SetAttributeHandler {
    async fn handle(&self, payload: Bytes, ctx: &HandlerContext) -> Result<Bytes, RpcError> {
        let SetAttributeRequest { key, value_json } = decode_payload(&payload)?;
        let value: Value = serde_json::from_str(&value_json).map_err(|e| RpcError::InvalidPayload {
            message: format!("value is not JSON: {e}"),
        })?;
        let previous = ctx.session.set_attribute(&key, value);
        Ok(encode_reply(&AttributeValue {
            value_json: previous.map(|v| v.to_string()),
        }))
    }
}
