use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    context::ServerCtx,
    error::{Error, Result},
    schema::{
        self, ClientCapabilities, Cursor, Implementation, InitializeResult, ListToolsResult,
        LoggingLevel,
    },
};

/// Connection trait that server implementers must implement.
/// Each client connection gets its own instance from the server's factory.
///
/// All methods take &self so requests can be handled concurrently.
/// Implementations use interior mutability for any mutable state.
#[async_trait]
pub trait ServerConn: Send + Sync {
    /// Called when the first message from a new client arrives
    async fn on_connect(&self, _context: &ServerCtx) -> Result<()> {
        Ok(())
    }

    /// Called when the connection is being closed
    async fn on_shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Handle initialize request
    async fn initialize(
        &self,
        _context: &ServerCtx,
        _protocol_version: String,
        _capabilities: ClientCapabilities,
        _client_info: Implementation,
    ) -> Result<InitializeResult>;

    /// Respond to a ping request from the client
    async fn pong(&self, _context: &ServerCtx) -> Result<()> {
        Ok(())
    }

    /// List available tools
    async fn list_tools(
        &self,
        _context: &ServerCtx,
        _cursor: Option<Cursor>,
    ) -> Result<ListToolsResult> {
        Ok(ListToolsResult::default())
    }

    /// Call a tool
    async fn call_tool(
        &self,
        _context: &ServerCtx,
        name: String,
        _arguments: Option<Map<String, Value>>,
    ) -> Result<schema::CallToolResult> {
        Err(Error::ToolNotFound(name))
    }

    /// Set the minimum level of `notifications/message` the client wants to see
    async fn set_level(&self, context: &ServerCtx, level: LoggingLevel) -> Result<()> {
        context.set_log_level(level);
        Ok(())
    }

    /// Handle a notification sent from the client
    async fn notification(
        &self,
        _context: &ServerCtx,
        _notification: schema::ClientNotification,
    ) -> Result<()> {
        Ok(())
    }
}
