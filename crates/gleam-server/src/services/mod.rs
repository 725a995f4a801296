//! Built-in services: SQL, cache, and session attributes.
//!
//! | service | id | methods                                   |
//! |---------|----|-------------------------------------------|
//! | db      | 1  | 1 `execute`, 2 `query`                    |
//! | cache   | 2  | 1 `get`, 2 `set`, 3 `delete`              |
//! | session | 3  | 1 `get_attribute`, 2 `set_attribute`      |

pub mod cache;
pub mod db;
pub mod messages;
pub mod session;

use gleam_rpc::{RegistrationError, RouterBuilder};

/// Service and method ids.
pub mod ids {
    /// SQL service.
    pub const DB: u16 = 1;
    /// `db.execute`
    pub const DB_EXECUTE: u16 = 1;
    /// `db.query`
    pub const DB_QUERY: u16 = 2;

    /// Cache service.
    pub const CACHE: u16 = 2;
    /// `cache.get`
    pub const CACHE_GET: u16 = 1;
    /// `cache.set`
    pub const CACHE_SET: u16 = 2;
    /// `cache.delete`
    pub const CACHE_DELETE: u16 = 3;

    /// Session attribute service.
    pub const SESSION: u16 = 3;
    /// `session.get_attribute`
    pub const SESSION_GET_ATTRIBUTE: u16 = 1;
    /// `session.set_attribute`
    pub const SESSION_SET_ATTRIBUTE: u16 = 2;
}

/// Register every built-in handler.
pub fn register_builtin(builder: &mut RouterBuilder) -> Result<(), RegistrationError> {
    use ids::*;
    let _ = builder
        .register(DB, DB_EXECUTE, "db.execute", db::ExecuteHandler)?
        .register(DB, DB_QUERY, "db.query", db::QueryHandler)?
        .register(CACHE, CACHE_GET, "cache.get", cache::GetHandler)?
        .register(CACHE, CACHE_SET, "cache.set", cache::SetHandler)?
        .register(CACHE, CACHE_DELETE, "cache.delete", cache::DeleteHandler)?
        .register(SESSION, SESSION_GET_ATTRIBUTE, "session.get_attribute", session::GetAttributeHandler)?
        .register(SESSION, SESSION_SET_ATTRIBUTE, "session.set_attribute", session::SetAttributeHandler)?;
    Ok(())
}

#[cfg(test)]
mod tests;
