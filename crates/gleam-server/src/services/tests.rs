use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gleam_pool::{MemoryCacheManager, PoolConfig, ResourcePool, ResourcePools, SqliteOptions, sqlite_manager};
use gleam_rpc::errors::{BACKEND_ERROR, INVALID_PAYLOAD, NOT_AVAILABLE};
use gleam_rpc::{HandlerContext, MethodHandler, RouterBuilder, RpcError, encode_reply};
use gleam_settings::BackPressurePolicy;
use gleam_wire::decode_message;
use prost::Message;
use tokio::sync::mpsc;

use super::messages::*;
use super::*;
use crate::session::{SendPolicy, Session};

const TIMEOUT: Duration = Duration::from_secs(1);

fn small_pool() -> PoolConfig {
    PoolConfig {
        min_idle: 1,
        max_size: 2,
        max_waiters: 4,
        health_check_interval: Duration::from_secs(60),
    }
}

async fn pools() -> ResourcePools {
    let sql = ResourcePool::new("sql", sqlite_manager(&SqliteOptions::default()), small_pool())
        .await
        .unwrap();
    let cache = ResourcePool::new("cache", MemoryCacheManager::default(), small_pool())
        .await
        .unwrap();
    ResourcePools::empty().with_sql(sql, TIMEOUT).with_cache(cache, TIMEOUT)
}

fn context(resources: ResourcePools) -> HandlerContext {
    let (tx, _rx) = mpsc::channel(4);
    let policy = SendPolicy {
        back_pressure: BackPressurePolicy::Reject,
        send_timeout: Duration::ZERO,
    };
    let session = Session::new(None, SocketAddr::from(([127, 0, 0, 1], 3)), tx, policy);
    HandlerContext::new(Arc::new(session), Arc::new(resources), 1)
}

async fn call<H: MethodHandler, Req: Message, Rep: Message + Default>(
    handler: H,
    ctx: &HandlerContext,
    request: &Req,
) -> Result<Rep, RpcError> {
    let reply = handler.handle(encode_reply(request), ctx).await?;
    Ok(decode_message(&reply).unwrap())
}

fn sql(text: &str, params: Vec<SqlParam>) -> SqlRequest {
    SqlRequest {
        sql: text.into(),
        params,
    }
}

#[tokio::test]
async fn db_execute_and_query() {
    let ctx = context(pools().await);
    let _: SqlExecuteReply = call(
        db::ExecuteHandler,
        &ctx,
        &sql("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER)", vec![]),
    )
    .await
    .unwrap();
    for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
        let reply: SqlExecuteReply = call(
            db::ExecuteHandler,
            &ctx,
            &sql(
                "INSERT INTO kv (k, v) VALUES (?1, ?2)",
                vec![SqlParam::from_text(k), SqlParam::from_integer(v)],
            ),
        )
        .await
        .unwrap();
        assert_eq!(reply.rows_affected, 1);
    }

    let reply: SqlQueryReply = call(
        db::QueryHandler,
        &ctx,
        &sql("SELECT k, v FROM kv WHERE v >= ?1 ORDER BY k", vec![SqlParam::from_integer(2)]),
    )
    .await
    .unwrap();
    assert_eq!(reply.columns, ["k", "v"]);
    assert_eq!(reply.rows.len(), 2);
    assert_eq!(reply.rows[0].values[0].text.as_deref(), Some("b"));
    assert_eq!(reply.rows[1].values[1].integer, Some(3));
}

#[tokio::test]
async fn db_error_is_backend_error() {
    let ctx = context(pools().await);
    let err = call::<_, _, SqlExecuteReply>(db::ExecuteHandler, &ctx, &sql("NOT SQL", vec![]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), BACKEND_ERROR);
}

#[tokio::test]
async fn missing_backend_is_not_available() {
    let ctx = context(ResourcePools::empty());
    let err = call::<_, _, SqlQueryReply>(db::QueryHandler, &ctx, &sql("SELECT 1", vec![]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), NOT_AVAILABLE);
    let err = call::<_, _, CacheGetReply>(cache::GetHandler, &ctx, &CacheKey { key: "k".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code(), NOT_AVAILABLE);
}

#[tokio::test]
async fn cache_set_get_delete() {
    let ctx = context(pools().await);
    let key = CacheKey { key: "greeting".into() };

    let miss: CacheGetReply = call(cache::GetHandler, &ctx, &key).await.unwrap();
    assert!(miss.value.is_none());

    let set = CacheSetRequest {
        key: "greeting".into(),
        value: b"hello".to_vec(),
        ttl_ms: None,
    };
    let _: Empty = call(cache::SetHandler, &ctx, &set).await.unwrap();
    let hit: CacheGetReply = call(cache::GetHandler, &ctx, &key).await.unwrap();
    assert_eq!(hit.value.as_deref(), Some(&b"hello"[..]));

    let deleted: CacheDeleteReply = call(cache::DeleteHandler, &ctx, &key).await.unwrap();
    assert!(deleted.deleted);
    let again: CacheDeleteReply = call(cache::DeleteHandler, &ctx, &key).await.unwrap();
    assert!(!again.deleted);
}

#[tokio::test]
async fn cache_rejects_empty_key() {
    let ctx = context(pools().await);
    let set = CacheSetRequest {
        key: String::new(),
        value: vec![1],
        ttl_ms: Some(10),
    };
    let err = call::<_, _, Empty>(cache::SetHandler, &ctx, &set).await.unwrap_err();
    assert_eq!(err.code(), INVALID_PAYLOAD);
}

#[tokio::test]
async fn session_attributes() {
    let ctx = context(ResourcePools::empty());
    let set = SetAttributeRequest {
        key: "room".into(),
        value_json: r#"{"id":7}"#.into(),
    };
    let previous: AttributeValue = call(session::SetAttributeHandler, &ctx, &set).await.unwrap();
    assert!(previous.value_json.is_none());

    let got: AttributeValue = call(session::GetAttributeHandler, &ctx, &AttributeKey { key: "room".into() })
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(got.value_json.as_deref().unwrap()).unwrap();
    assert_eq!(value["id"], 7);
}

#[tokio::test]
async fn session_attribute_must_be_json() {
    let ctx = context(ResourcePools::empty());
    let set = SetAttributeRequest {
        key: "room".into(),
        value_json: "{not json".into(),
    };
    let err = call::<_, _, AttributeValue>(session::SetAttributeHandler, &ctx, &set)
        .await
        .unwrap_err();
    assert_eq!(err.code(), INVALID_PAYLOAD);
}

#[tokio::test]
async fn garbage_payload_is_invalid() {
    let ctx = context(ResourcePools::empty());
    let err = db::ExecuteHandler
        .handle(Bytes::from_static(&[0xff, 0xff]), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code(), INVALID_PAYLOAD);
}

#[test]
fn builtin_registration_is_complete_and_unique() {
    let mut builder = RouterBuilder::new();
    register_builtin(&mut builder).unwrap();
    assert!(register_builtin(&mut builder).is_err());
    let router = builder.build();
    assert_eq!(router.routes().len(), 7);
    assert!(router.has_route(ids::CACHE, ids::CACHE_DELETE));
}
