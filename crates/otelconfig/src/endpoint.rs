//! Per-signal endpoint resolution.
//!
//! A signal (traces or metrics) may carry its own endpoint, insecure flag and
//! protocol, or fall back to the generic ones. The resolved endpoint always
//! carries a port: gRPC has no notion of a URL scheme, so an `https://`
//! prefix only serves as a hint that the collector listens on 443.

use crate::config::Protocol;
use url::Url;

/// Default OTLP/gRPC port.
pub const GRPC_DEFAULT_PORT: &str = "4317";
/// Default OTLP/HTTP port.
pub const HTTP_DEFAULT_PORT: &str = "4318";
/// Default port for TLS when an `https://` gRPC endpoint names none.
pub const SSL_DEFAULT_PORT: &str = "443";

/// Final export settings for one signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// `host:port` for gRPC; `host:port` or `scheme://host:port[/path]` for HTTP.
    pub endpoint: String,
    /// Whether to skip TLS.
    pub insecure: bool,
    /// Wire protocol for this signal.
    pub protocol: Protocol,
}

/// Mutable view over one signal's fields of the configuration record.
pub(crate) struct SignalFields<'a> {
    pub endpoint: &'a mut String,
    pub insecure: &'a mut bool,
    pub protocol: &'a mut Option<Protocol>,
}

/// Generic settings shared by both signals.
pub(crate) struct GenericFields<'a> {
    pub endpoint: &'a str,
    pub insecure: bool,
    pub protocol: &'a Protocol,
}

/// Resolves a signal's endpoint, writing fallbacks back into its fields.
///
/// Returns `None` when neither the signal nor the generic endpoint is set,
/// which disables the signal. Calling this again on already-resolved fields
/// yields the same result.
pub(crate) fn resolve_signal(
    generic: GenericFields<'_>,
    signal: SignalFields<'_>,
) -> Option<ResolvedEndpoint> {
    if signal.endpoint.is_empty() {
        if generic.endpoint.is_empty() {
            return None;
        }
        *signal.endpoint = generic.endpoint.to_string();
        *signal.insecure = generic.insecure;
    }

    let protocol = signal
        .protocol
        .get_or_insert_with(|| generic.protocol.clone())
        .clone();

    if protocol == Protocol::Grpc {
        *signal.endpoint = trim_http_scheme(signal.endpoint, &protocol);
    }

    Some(ResolvedEndpoint {
        endpoint: ensure_port(signal.endpoint, protocol.default_port()),
        insecure: *signal.insecure,
        protocol,
    })
}

/// Appends `default_port` when the endpoint's authority names no port.
///
/// A trailing `:` counts as "no port". A scheme prefix and a path suffix are
/// preserved around the authority.
pub fn ensure_port(endpoint: &str, default_port: &str) -> String {
    let (scheme, rest) = match endpoint.find("://") {
        Some(ix) => endpoint.split_at(ix + 3),
        None => ("", endpoint),
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);

    let port_separator = if authority.starts_with('[') {
        authority.find("]:").map(|ix| ix + 1)
    } else {
        authority.find(':')
    };

    let authority = match port_separator {
        None => format!("{authority}:{default_port}"),
        Some(ix) if ix == authority.len() - 1 => format!("{authority}{default_port}"),
        Some(_) => authority.to_string(),
    };

    format!("{scheme}{authority}{path}")
}

/// Strips an `http://` or `https://` prefix.
///
/// For gRPC an `https://` endpoint without a port is given port 443.
pub fn trim_http_scheme(endpoint: &str, protocol: &Protocol) -> String {
    if let Some(rest) = endpoint.strip_prefix("https://") {
        if *protocol == Protocol::Grpc
            && let Some(host_port) = secure_grpc_port(endpoint)
        {
            return host_port;
        }
        return rest.to_string();
    }
    if let Some(rest) = endpoint.strip_prefix("http://") {
        return rest.to_string();
    }
    endpoint.to_string()
}

fn secure_grpc_port(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint).ok()?;
    let host = url.host_str()?;
    let port = url
        .port()
        .map_or_else(|| SSL_DEFAULT_PORT.to_string(), |p| p.to_string());
    Some(format!("{host}:{port}"))
}
