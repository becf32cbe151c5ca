//! Standard MCP server configuration file
//!
//! Reads the `{"mcpServers": {...}}` document used by VS Code, Cursor and
//! Claude Desktop and turns an entry into an [`OAuthRequest`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::{OAuthRequest, ServerType};

/// Bridge invocation used for URL-only entries
const DEFAULT_BRIDGE_COMMAND: &str = "npx";
const DEFAULT_BRIDGE_PACKAGE: &str = "mcp-remote";

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerConfigFile {
    #[serde(rename = "mcpServers")]
    pub servers: HashMap<String, ServerEntry>,
}

/// A single server entry. Transport fields sit at the top level, there is no
/// `transport: {}` wrapper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    // --- Stdio transport ---
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,

    // --- HTTP transport ---
    pub url: Option<String>,
    /// `"http"`, `"sse"`, `"stdio"`
    #[serde(rename = "type")]
    pub transport: Option<String>,

    pub name: Option<String>,
    pub server_type: Option<ServerType>,
}

impl ServerConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read server config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid server config {}", path.display()))
    }

    pub fn request_for(&self, server_id: &str) -> Result<OAuthRequest> {
        let Some(entry) = self.servers.get(server_id) else {
            let mut known: Vec<_> = self.servers.keys().cloned().collect();
            known.sort();
            bail!(
                "Server '{}' not found in config (known: {})",
                server_id,
                known.join(", ")
            );
        };
        entry.to_request(server_id)
    }
}

impl ServerEntry {
    pub fn to_request(&self, server_id: &str) -> Result<OAuthRequest> {
        let name = self.name.clone().unwrap_or_else(|| server_id.to_string());

        let mut request = match (&self.command, &self.url) {
            (Some(command), url) => {
                let mut req = OAuthRequest::new(server_id, name, command.clone())
                    .with_args(self.args.clone().unwrap_or_default())
                    .with_env(self.env.clone().unwrap_or_default());
                req.server_url = url.clone();
                if req.server_url.is_none() && self.is_http_transport() {
                    bail!(
                        "Server '{}' declares an HTTP transport but has no url",
                        server_id
                    );
                }
                req
            }
            // URL-only entries go through the bridge tool
            (None, Some(url)) => OAuthRequest::new(server_id, name, DEFAULT_BRIDGE_COMMAND)
                .with_args(["-y", DEFAULT_BRIDGE_PACKAGE, url.as_str()])
                .with_env(self.env.clone().unwrap_or_default())
                .with_server_type(ServerType::RemoteProxy),
            (None, None) => bail!("Server '{}' has neither command nor url", server_id),
        };

        if let Some(server_type) = self.server_type {
            request.server_type = Some(server_type);
        }
        Ok(request)
    }

    fn is_http_transport(&self) -> bool {
        matches!(
            self.transport.as_deref(),
            Some("http") | Some("sse") | Some("streamable-http")
        )
    }
}
