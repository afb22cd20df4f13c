//! Server descriptors: what the manager needs to know to reach one MCP server.
//!
//! External configuration arrives in the flat [`RawServerDescriptor`] shape and
//! is converted into a [`ServerDescriptor`], whose [`TransportConfig`] is a
//! closed union. The transport-type string is only ever compared here.

use crate::error::McpError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default per-request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default connect timeout for the SSE handshake in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_enabled() -> bool {
    true
}

/// Which wire binding a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::Http => "http",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            "http" | "streamable-http" | "streamable_http" | "streamablehttp" => {
                Ok(TransportKind::Http)
            }
            other => Err(format!("unknown transport type '{other}'")),
        }
    }
}

/// Transport-specific connection settings.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// Local subprocess speaking newline-delimited JSON over stdin/stdout.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
    },
    /// GET event stream for responses, POST to a server-announced endpoint.
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
    /// One POST per message, optionally with a session-keyed push stream.
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Sse { .. } => TransportKind::Sse,
            TransportConfig::Http { .. } => TransportKind::Http,
        }
    }
}

/// A validated description of one MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescriptor {
    pub name: String,
    pub enabled: bool,
    pub transport: TransportConfig,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout for transports with a handshake stream.
    pub connect_timeout_ms: u64,
}

impl ServerDescriptor {
    /// Descriptor for a stdio server with default timeouts.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
                cwd: None,
            },
        )
    }

    /// Descriptor for an SSE server with default timeouts.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Sse {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    /// Descriptor for a plain HTTP server with default timeouts.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Http {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            transport,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Check the structural requirements of the declared transport.
    pub fn validate(&self) -> Result<(), McpError> {
        let invalid = |reason: &str| McpError::InvalidDescriptor {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be greater than zero"));
        }

        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(invalid("stdio transport requires a command"));
                }
            }
            TransportConfig::Sse { url, headers } | TransportConfig::Http { url, headers } => {
                let parsed = reqwest::Url::parse(url)
                    .map_err(|e| invalid(&format!("invalid url '{url}': {e}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(invalid(&format!(
                        "url scheme must be http or https, got '{}'",
                        parsed.scheme()
                    )));
                }
                for name in headers.keys() {
                    if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                        return Err(invalid(&format!("invalid header name '{name}'")));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A server entry as it appears in configuration files, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawServerDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// `stdio`, `sse` or `http`. Defaults to `stdio` when a command is given.
    #[serde(default, alias = "transportType", alias = "type")]
    pub transport: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Timeout for requests in milliseconds (default: 30000).
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl TryFrom<RawServerDescriptor> for ServerDescriptor {
    type Error = McpError;

    fn try_from(raw: RawServerDescriptor) -> Result<Self, Self::Error> {
        let name = raw.name;
        let invalid = |reason: String| McpError::InvalidDescriptor {
            name: name.clone(),
            reason,
        };

        let kind = match raw.transport.as_deref() {
            Some(t) => t.parse::<TransportKind>().map_err(invalid)?,
            None if raw.command.is_some() => TransportKind::Stdio,
            None => return Err(invalid("missing transport type".into())),
        };

        let transport = match kind {
            TransportKind::Stdio => TransportConfig::Stdio {
                command: raw
                    .command
                    .ok_or_else(|| invalid("stdio transport requires a command".into()))?,
                args: raw.args,
                env: raw.env,
                cwd: raw.cwd,
            },
            TransportKind::Sse => TransportConfig::Sse {
                url: raw
                    .url
                    .ok_or_else(|| invalid("sse transport requires a url".into()))?,
                headers: raw.headers,
            },
            TransportKind::Http => TransportConfig::Http {
                url: raw
                    .url
                    .ok_or_else(|| invalid("http transport requires a url".into()))?,
                headers: raw.headers,
            },
        };

        let descriptor = ServerDescriptor {
            name: name.clone(),
            enabled: raw.enabled,
            transport,
            timeout_ms: raw.timeout_ms,
            connect_timeout_ms: raw.connect_timeout_ms,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}
