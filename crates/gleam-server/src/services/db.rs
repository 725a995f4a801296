//! Service 1: SQL over the pooled database.

use async_trait::async_trait;
use bytes::Bytes;

use gleam_pool::{SqlBackend, SqlValue};
use gleam_rpc::{HandlerContext, MethodHandler, RpcError, decode_payload, encode_reply};

use super::messages::{SqlExecuteReply, SqlParam, SqlQueryReply, SqlRequest, SqlRow};

/// `db.execute`: run a statement, reply with the affected row count.
pub struct ExecuteHandler;

#[async_trait]
impl MethodHandler for ExecuteHandler {
    async fn handle(&self, payload: Bytes, ctx: &HandlerContext) -> Result<Bytes, RpcError> {
        let SqlRequest { sql, params } = decode_payload(&payload)?;
        let params: Vec<SqlValue> = params.into_iter().map(SqlValue::from).collect();
        let pool = ctx.resources.sql()?;
        let rows = pool
            .run(ctx.resources.sql_acquire_timeout(), move |conn| {
                SqlBackend::execute(conn, &sql, &params)
            })
            .await?;
        Ok(encode_reply(&SqlExecuteReply {
            rows_affected: u64::try_from(rows).unwrap_or(u64::MAX),
        }))
    }
}

/// `db.query`: run a query, reply with columns and rows.
pub struct QueryHandler;

#[async_trait]
impl MethodHandler for QueryHandler {
    async fn handle(&self, payload: Bytes, ctx: &HandlerContext) -> Result<Bytes, RpcError> {
        let SqlRequest { sql, params } = decode_payload(&payload)?;
        let params: Vec<SqlValue> = params.into_iter().map(SqlValue::from).collect();
        let pool = ctx.resources.sql()?;
        let result = pool
            .run(ctx.resources.sql_acquire_timeout(), move |conn| {
                SqlBackend::query(conn, &sql, &params)
            })
            .await?;
        let rows = result
            .rows
            .into_iter()
            .map(|row| SqlRow {
                values: row.into_iter().map(SqlParam::from).collect(),
            })
            .collect();
        Ok(encode_reply(&SqlQueryReply {
            columns: result.columns,
            rows,
        }))
    }
}
