//! Invocation building for the two OAuth strategies
//!
//! Pure transformation from an [`OAuthRequest`] to the helper command line.
//! Sandboxing is applied later by the [`SandboxAdapter`](crate::SandboxAdapter).

use std::collections::BTreeMap;

use authmux_core::{BuilderError, Invocation, OAuthRequest, OAuthSettings, ServerType};
use tracing::debug;
use url::Url;

/// Result of building a base invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseInvocation {
    pub invocation: Invocation,
    pub server_type: ServerType,
    /// Loopback port the bridge tool binds for the redirect (remote-proxy only)
    pub callback_port: Option<u16>,
    /// Endpoint the helper authorizes against, when known
    pub remote_url: Option<String>,
}

pub struct InvocationBuilder {
    bridge_tools: Vec<String>,
    auth_flag: String,
    default_callback_port: u16,
    provider_ports: BTreeMap<String, u16>,
}

impl InvocationBuilder {
    pub fn new(settings: &OAuthSettings) -> Self {
        Self {
            bridge_tools: settings.bridge_tools.clone(),
            auth_flag: settings.auth_flag.clone(),
            default_callback_port: settings.default_callback_port,
            provider_ports: settings.provider_ports.clone(),
        }
    }

    /// Classify a request whose caller did not state the strategy.
    ///
    /// Bridge tool on the command line wins over an HTTP endpoint, so a
    /// `mcp-remote` entry that also carries `serverUrl` stays a proxy.
    pub fn detect_server_type(&self, request: &OAuthRequest) -> Result<ServerType, BuilderError> {
        if let Some(explicit) = request.server_type {
            return Ok(explicit);
        }

        let mentions_bridge = std::iter::once(&request.base_command)
            .chain(request.base_args.iter())
            .any(|token| self.is_bridge_tool(token));
        if mentions_bridge {
            return Ok(ServerType::RemoteProxy);
        }

        let has_http_url = request
            .server_url
            .as_deref()
            .and_then(parse_http_url)
            .is_some();
        if has_http_url || declares_http_transport(&request.base_args) {
            return Ok(ServerType::Direct);
        }

        Err(BuilderError::UnsupportedServerType(format!(
            "'{}' is neither a known bridge tool nor an HTTP-based server",
            request.base_command
        )))
    }

    pub fn build(&self, request: &OAuthRequest) -> Result<BaseInvocation, BuilderError> {
        let server_type = self.detect_server_type(request)?;
        let built = match server_type {
            ServerType::RemoteProxy => self.build_remote_proxy(request)?,
            ServerType::Direct => self.build_direct(request),
        };

        debug!(
            server_id = %request.server_id,
            server_type = server_type.as_str(),
            callback_port = ?built.callback_port,
            command = %built.invocation.display_command(),
            "[Invocation] Built base invocation"
        );
        Ok(built)
    }

    fn build_remote_proxy(&self, request: &OAuthRequest) -> Result<BaseInvocation, BuilderError> {
        let (url_index, remote) = request
            .base_args
            .iter()
            .enumerate()
            .find_map(|(i, arg)| extract_http_url(arg).map(|url| (i, url)))
            .ok_or(BuilderError::NoRemoteUrlFound)?;

        let mut args: Vec<String> = request.base_args[..=url_index].to_vec();
        let rest = &request.base_args[url_index + 1..];

        // A port already configured after the URL is kept as-is
        let callback_port = match rest.first().and_then(|a| a.parse::<u16>().ok()) {
            Some(port) => port,
            None => {
                let port = self.callback_port_for(&remote);
                args.push(port.to_string());
                port
            }
        };
        args.extend(rest.iter().cloned());

        Ok(BaseInvocation {
            invocation: Invocation::new(request.base_command.clone())
                .with_args(args)
                .with_env(request.base_env.clone()),
            server_type: ServerType::RemoteProxy,
            callback_port: Some(callback_port),
            remote_url: Some(remote.to_string()),
        })
    }

    fn build_direct(&self, request: &OAuthRequest) -> BaseInvocation {
        let mut args = request.base_args.clone();
        let has_auth_flag = args.iter().any(|a| {
            a == &self.auth_flag || a.starts_with("--auth") || a.starts_with("--oauth")
        });
        if !has_auth_flag {
            args.push(self.auth_flag.clone());
        }

        BaseInvocation {
            invocation: Invocation::new(request.base_command.clone())
                .with_args(args)
                .with_env(request.base_env.clone()),
            server_type: ServerType::Direct,
            callback_port: None,
            remote_url: request.server_url.clone(),
        }
    }

    /// Provider-specific port when the host is (or is under) a known provider
    /// domain, otherwise the configured default.
    pub fn callback_port_for(&self, url: &Url) -> u16 {
        let Some(host) = url.host_str() else {
            return self.default_callback_port;
        };
        let host = host.to_ascii_lowercase();
        self.provider_ports
            .iter()
            .find(|(domain, _)| host == **domain || host.ends_with(&format!(".{}", domain)))
            .map(|(_, port)| *port)
            .unwrap_or(self.default_callback_port)
    }

    fn is_bridge_tool(&self, token: &str) -> bool {
        let base = token.rsplit(['/', '\\']).next().unwrap_or(token);
        let base = base
            .strip_suffix(".cmd")
            .or_else(|| base.strip_suffix(".exe"))
            .unwrap_or(base);
        self.bridge_tools.iter().any(|tool| {
            base == tool
                || base
                    .strip_prefix(tool.as_str())
                    .is_some_and(|rest| rest.starts_with('@'))
        })
    }
}

fn parse_http_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// First http(s) URL inside an argument (`https://…` or `--server=https://…`)
fn extract_http_url(arg: &str) -> Option<Url> {
    let start = arg.find("https://").or_else(|| arg.find("http://"))?;
    parse_http_url(&arg[start..])
}

fn declares_http_transport(args: &[String]) -> bool {
    const HTTP_TRANSPORTS: [&str; 3] = ["http", "sse", "streamable-http"];
    args.iter().enumerate().any(|(i, arg)| {
        if let Some(value) = arg.strip_prefix("--transport=") {
            return HTTP_TRANSPORTS.contains(&value);
        }
        arg == "--transport"
            && args
                .get(i + 1)
                .is_some_and(|v| HTTP_TRANSPORTS.contains(&v.as_str()))
    })
}
