use http::HeaderMap;
use serde::Serialize;

/// Header carrying the caller's MCP session
const SESSION_HEADER: &str = "mcp-session-id";

/// Caller metadata attached to every routed tool call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallContext {
    /// Address of the client that issued the call
    pub client_ip: Option<String>,
    /// Protocol session the call belongs to
    pub session_id: Option<String>,
}

impl CallContext {
    /// Derive the context from inbound request headers
    ///
    /// The first hop of `x-forwarded-for` wins over `x-real-ip`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let client_ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| header("x-real-ip"))
            .map(ToOwned::to_owned);

        Self {
            client_ip,
            session_id: header(SESSION_HEADER).map(ToOwned::to_owned),
        }
    }
}
