//! Service 2: key/value cache.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use gleam_pool::CacheBackend;
use gleam_rpc::{HandlerContext, MethodHandler, RpcError, decode_payload, encode_reply};

use super::messages::{CacheDeleteReply, CacheGetReply, CacheKey, CacheSetRequest, Empty};

/// `cache.get`
pub struct GetHandler;

#[async_trait]
impl MethodHandler for GetHandler {
    async fn handle(&self, payload: Bytes, ctx: &HandlerContext) -> Result<Bytes, RpcError> {
        let CacheKey { key } = decode_payload(&payload)?;
        let pool = ctx.resources.cache()?;
        let value = pool
            .run(ctx.resources.cache_acquire_timeout(), move |conn| conn.get(&key))
            .await?;
        Ok(encode_reply(&CacheGetReply { value }))
    }
}

/// `cache.set`
pub struct SetHandler;

#[async_trait]
impl MethodHandler for SetHandler {
    async fn handle(&self, payload: Bytes, ctx: &HandlerContext) -> Result<Bytes, RpcError> {
        let CacheSetRequest { key, value, ttl_ms } = decode_payload(&payload)?;
        if key.is_empty() {
            return Err(RpcError::InvalidPayload {
                message: "empty cache key".into(),
            });
        }
        let ttl = ttl_ms.filter(|ms| *ms > 0).map(Duration::from_millis);
        let pool = ctx.resources.cache()?;
        pool.run(ctx.resources.cache_acquire_timeout(), move |conn| conn.set(&key, value, ttl))
            .await?;
        Ok(encode_reply(&Empty {}))
    }
}

/// `cache.delete`
pub struct DeleteHandler;

#[async_trait]
impl MethodHandler for DeleteHandler {
    async fn handle(&self, payload: Bytes, ctx: &HandlerContext) -> Result<Bytes, RpcError> {
        let CacheKey { key } = decode_payload(&payload)?;
        let pool = ctx.resources.cache()?;
        let deleted = pool
            .run(ctx.resources.cache_acquire_timeout(), move |conn| conn.delete(&key))
            .await?;
        Ok(encode_reply(&CacheDeleteReply { deleted }))
    }
}
