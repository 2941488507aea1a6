//! Upstream authentication: the PKCE handshake used to recover from a 401
//! raised by an upstream MCP server (§4.5). This is distinct from whatever
//! scheme authenticates downstream clients against the gateway itself.

pub mod upstream_oauth;

pub use upstream_oauth::UpstreamOAuth;
