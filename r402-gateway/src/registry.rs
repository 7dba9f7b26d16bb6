//! Tool/Server Registry (§4.10) and the §3 data model it serves.
//!
//! The read path is hot: a small in-process cache keyed by `server_id` with a
//! short TTL fronts the durable Postgres-backed catalog. Writes go straight
//! to the database and then evict (never update) the cache entry, so the
//! next read is always a real reload.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::GatewayConfig;

/// Lifecycle status shared by servers and tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Status {
    /// Visible and usable.
    Active,
    /// Hidden from catalog reads; preserved for history.
    Inactive,
}

/// A registered upstream MCP server (§3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegisteredServer {
    /// Stable public identifier, used in `/mcp/{server_id}`.
    pub server_id: String,
    /// The upstream's base MCP origin URL.
    pub mcp_origin: String,
    /// Address that receives settled payments for this server's tools.
    pub receiver_address: String,
    /// Whether upstream calls require `auth_headers` to be injected.
    pub require_auth: bool,
    /// Opaque headers forwarded to the upstream when `require_auth` is set.
    pub auth_headers: serde_json::Value,
    /// Lifecycle status.
    pub status: Status,
    /// Weak reference to the creating user; null-on-delete (§3 ownership).
    pub creator_id: Option<Uuid>,
}

/// A tool exposed by a [`RegisteredServer`] (§3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegisteredTool {
    /// Primary key.
    pub tool_id: Uuid,
    /// Owning server.
    pub server_id: String,
    /// Tool name, unique within `server_id`.
    pub name: String,
    /// Human-readable description (annotated with price for paid tools; §9 open question resolution).
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: serde_json::Value,
    /// `true` iff at least one active [`PricingEntry`] exists (§3 invariant).
    pub is_monetized: bool,
    /// Lifecycle status.
    pub status: Status,
}

/// A price a tool may be invoked under (§3). Embedded list on a tool.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PricingEntry {
    /// Primary key.
    pub id: Uuid,
    /// Owning tool.
    pub tool_id: Uuid,
    /// Base-units amount required, non-negative integer as a decimal string.
    pub max_amount_required_raw: String,
    /// Token decimals for `max_amount_required_raw`.
    pub token_decimals: i16,
    /// ERC-20 contract address.
    pub asset_address: String,
    /// Network name, e.g. `"base-sepolia"`.
    pub network: String,
    /// Whether this entry currently applies.
    pub active: bool,
    /// Insertion order, used as the final Requirements Builder tie-break.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A snapshot of everything the MCP Proxy and Payments Core need about one server.
#[derive(Debug, Clone)]
pub struct ServerCatalog {
    /// The server row itself.
    pub server: RegisteredServer,
    /// All non-deleted tools registered on this server.
    pub tools: Vec<RegisteredTool>,
}

impl ServerCatalog {
    /// Finds a tool by name.
    #[must_use]
    pub fn find_tool(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Errors raised by registry reads/writes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The requested `server_id` has no registration.
    #[error("server not found")]
    ServerNotFound,
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Registration for the same `(mcp_origin, creator_id)` already exists with a different `server_id`.
    #[error("server already registered")]
    DuplicateRegistration,
    /// A read did not complete within `GatewayConfig::REGISTRY_READ_TIMEOUT` (§5).
    #[error("registry read timed out")]
    Timeout,
}

impl crate::error::AsGatewayProblem for RegistryError {
    fn category(&self) -> crate::error::ErrorCategory {
        match self {
            Self::ServerNotFound => crate::error::ErrorCategory::ClientFault,
            Self::DuplicateRegistration => crate::error::ErrorCategory::Conflict,
            Self::Database(_) | Self::Timeout => crate::error::ErrorCategory::Internal,
        }
    }

    fn error_reason(&self) -> &'static str {
        match self {
            Self::ServerNotFound => "server_not_found",
            Self::DuplicateRegistration => "duplicate_registration",
            Self::Database(_) => "internal",
            Self::Timeout => "registry_read_timeout",
        }
    }
}

struct CacheEntry {
    catalog: Arc<ServerCatalog>,
    inserted_at: Instant,
}

/// Read-mostly catalog of registered servers, tools, and pricing (§4.10).
#[derive(Clone)]
pub struct ToolRegistry {
    pool: PgPool,
    cache: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("ttl", &self.ttl)
            .field("cached_servers", &self.cache.len())
            .finish()
    }
}

impl ToolRegistry {
    /// Builds a registry over `pool` with the default 60s cache TTL.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Arc::new(DashMap::new()),
            ttl: Duration::from_secs(60),
        }
    }

    /// Overrides the cache TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Looks up a server's full catalog (server row + tools), using the cache
    /// when fresh and falling through to Postgres on a miss or stale entry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ServerNotFound`] if no such server exists, or
    /// [`RegistryError::Database`] on a query failure.
    #[tracing::instrument(skip(self))]
    pub async fn get_catalog(&self, server_id: &str) -> Result<Arc<ServerCatalog>, RegistryError> {
        if let Some(entry) = self.cache.get(server_id)
            && entry.inserted_at.elapsed() < self.ttl
        {
            return Ok(Arc::clone(&entry.catalog));
        }

        let (server, tools) = tokio::time::timeout(GatewayConfig::REGISTRY_READ_TIMEOUT, async {
            let server = sqlx::query_as::<_, RegisteredServer>(
                "SELECT server_id, mcp_origin, receiver_address, require_auth, auth_headers, status, creator_id \
                 FROM mcp_servers WHERE server_id = $1",
            )
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RegistryError::ServerNotFound)?;

            let tools = sqlx::query_as::<_, RegisteredTool>(
                "SELECT tool_id, server_id, name, description, input_schema, is_monetized, status \
                 FROM mcp_tools WHERE server_id = $1 AND status = 'active'",
            )
            .bind(server_id)
            .fetch_all(&self.pool)
            .await?;

            Ok::<_, RegistryError>((server, tools))
        })
        .await
        .map_err(|_| RegistryError::Timeout)??;

        let catalog = Arc::new(ServerCatalog { server, tools });
        self.cache.insert(
            server_id.to_owned(),
            CacheEntry {
                catalog: Arc::clone(&catalog),
                inserted_at: Instant::now(),
            },
        );
        Ok(catalog)
    }

    /// Returns the active [`PricingEntry`] rows for a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Database`] on a query failure.
    pub async fn active_pricing(&self, tool_id: Uuid) -> Result<Vec<PricingEntry>, RegistryError> {
        let rows = tokio::time::timeout(
            GatewayConfig::REGISTRY_READ_TIMEOUT,
            sqlx::query_as::<_, PricingEntry>(
                "SELECT id, tool_id, max_amount_required_raw, token_decimals, asset_address, network, active, created_at \
                 FROM tool_pricing WHERE tool_id = $1 AND active = true ORDER BY created_at ASC",
            )
            .bind(tool_id)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| RegistryError::Timeout)??;
        Ok(rows)
    }

    /// Idempotent registration: finds an existing server by `(mcp_origin, creator_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Database`] on a query failure.
    pub async fn find_by_origin(
        &self,
        mcp_origin: &str,
        creator_id: Option<Uuid>,
    ) -> Result<Option<RegisteredServer>, RegistryError> {
        let row = sqlx::query_as::<_, RegisteredServer>(
            "SELECT server_id, mcp_origin, receiver_address, require_auth, auth_headers, status, creator_id \
             FROM mcp_servers WHERE mcp_origin = $1 AND creator_id IS NOT DISTINCT FROM $2",
        )
        .bind(mcp_origin)
        .bind(creator_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Registers a new server, or returns the existing one for the same origin+creator.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Database`] on a query failure.
    pub async fn register_server(
        &self,
        server: &RegisteredServer,
    ) -> Result<RegisteredServer, RegistryError> {
        if let Some(existing) = self.find_by_origin(&server.mcp_origin, server.creator_id).await? {
            return Ok(existing);
        }

        sqlx::query(
            "INSERT INTO mcp_servers (server_id, mcp_origin, receiver_address, require_auth, auth_headers, status, creator_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&server.server_id)
        .bind(&server.mcp_origin)
        .bind(&server.receiver_address)
        .bind(server.require_auth)
        .bind(&server.auth_headers)
        .bind(server.status)
        .bind(server.creator_id)
        .execute(&self.pool)
        .await?;

        self.invalidate(&server.server_id);
        Ok(server.clone())
    }

    /// Upserts a tool row (used by the Ping Ingestor's reconciliation pass).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Database`] on a query failure.
    pub async fn upsert_tool(&self, tool: &RegisteredTool) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT INTO mcp_tools (tool_id, server_id, name, description, input_schema, is_monetized, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (server_id, name) DO UPDATE SET \
             description = EXCLUDED.description, input_schema = EXCLUDED.input_schema, status = EXCLUDED.status",
        )
        .bind(tool.tool_id)
        .bind(&tool.server_id)
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(&tool.input_schema)
        .bind(tool.is_monetized)
        .bind(tool.status)
        .execute(&self.pool)
        .await?;

        self.invalidate(&tool.server_id);
        Ok(())
    }

    /// Marks a tool inactive (used when the Ping Ingestor no longer sees it upstream).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Database`] on a query failure.
    pub async fn deactivate_tool(&self, server_id: &str, name: &str) -> Result<(), RegistryError> {
        sqlx::query("UPDATE mcp_tools SET status = 'inactive' WHERE server_id = $1 AND name = $2")
            .bind(server_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        self.invalidate(server_id);
        Ok(())
    }

    /// Evicts the cache entry for `server_id`. Called by every write path.
    pub fn invalidate(&self, server_id: &str) {
        self.cache.remove(server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_catalog_find_tool_matches_by_name() {
        let server = RegisteredServer {
            server_id: "srv1".to_owned(),
            mcp_origin: "https://upstream.example".to_owned(),
            receiver_address: format!("0x{}", "11".repeat(20)),
            require_auth: false,
            auth_headers: serde_json::json!({}),
            status: Status::Active,
            creator_id: None,
        };
        let tool = RegisteredTool {
            tool_id: Uuid::nil(),
            server_id: "srv1".to_owned(),
            name: "echo".to_owned(),
            description: "echoes input".to_owned(),
            input_schema: serde_json::json!({}),
            is_monetized: false,
            status: Status::Active,
        };
        let catalog = ServerCatalog {
            server,
            tools: vec![tool],
        };
        assert!(catalog.find_tool("echo").is_some());
        assert!(catalog.find_tool("missing").is_none());
    }

    #[test]
    fn timeout_maps_to_internal_category() {
        use crate::error::AsGatewayProblem;
        assert_eq!(RegistryError::Timeout.category(), crate::error::ErrorCategory::Internal);
        assert_eq!(RegistryError::Timeout.error_reason(), "registry_read_timeout");
    }
}
