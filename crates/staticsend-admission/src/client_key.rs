//! Admission key derivation from request metadata.

use std::net::SocketAddr;

use http::HeaderMap;

const CF_CONNECTING_IP: &str = "cf-connecting-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Resolves the admission key for a request.
///
/// Proxy headers are consulted in order: `CF-Connecting-IP`, the first hop
/// of `X-Forwarded-For`, then `X-Real-IP`. Empty or non-UTF-8 values are
/// skipped. Without a usable header the peer address is used, with its port
/// removed so that reconnects from one host share a bucket.
pub fn resolve_client_key(headers: &HeaderMap, remote_addr: &str) -> String {
    let forwarded_first_hop =
        || header_value(headers, X_FORWARDED_FOR).and_then(|value| value.split(',').next()).map(str::trim);

    header_value(headers, CF_CONNECTING_IP)
        .or_else(|| forwarded_first_hop().filter(|hop| !hop.is_empty()))
        .or_else(|| header_value(headers, X_REAL_IP))
        .map_or_else(|| peer_key(remote_addr), str::to_owned)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn peer_key(remote_addr: &str) -> String {
    remote_addr
        .parse::<SocketAddr>()
        .map_or_else(|_| remote_addr.trim().to_owned(), |addr| addr.ip().to_string())
}
