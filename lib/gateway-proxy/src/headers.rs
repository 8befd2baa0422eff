//! Header handling shared by the normal and upgrade paths

use http::header::{HeaderMap, HeaderName, CONNECTION, UPGRADE};

/// Sub-protocols that may be negotiated through the gateway.
pub const SUPPORTED_UPGRADES: &[&str] = &["SPDY/3.1", "websocket"];

/// Hop-by-hop headers (RFC 7230 section 6.1) never forwarded as is.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Like [`strip_hop_by_hop`], but keeps `Connection` and `Upgrade` so the
/// upstream sees the upgrade request.
pub fn strip_hop_by_hop_for_upgrade(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("upgrade") {
            continue;
        }
        headers.remove(*name);
    }
}

fn connection_has_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// The supported sub-protocol requested by `headers`, if the request asks
/// for a protocol upgrade at all.
pub fn requested_upgrade(headers: &HeaderMap) -> Option<&'static str> {
    if !connection_has_upgrade(headers) {
        return None;
    }
    headers
        .get_all(UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .find_map(|offered| {
            SUPPORTED_UPGRADES
                .iter()
                .copied()
                .find(|supported| supported.eq_ignore_ascii_case(offered))
        })
}
