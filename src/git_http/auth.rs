//! Git HTTP authentication: private-network bypass, else HTTP Basic
//! against the repository's `lunchbadger.accesskey`.

use std::net::IpAddr;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub struct Unauthorized;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"git\"")],
            "unauthorized",
        )
            .into_response()
    }
}

/// Whether `addr` falls in `10.0.0.0/8`, `172.16.0.0/12`, `192.168.0.0/16`,
/// or `127.0.0.0/8` (or their IPv6-mapped/loopback equivalents).
pub fn is_private(addr: IpAddr) -> bool {
    let v4 = match addr {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    };
    match v4 {
        Some(v4) => {
            let o = v4.octets();
            o[0] == 10
                || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 192 && o[1] == 168)
                || o[0] == 127
        }
        None => addr.is_loopback(),
    }
}

fn parse_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Two strategies composed: a private-network caller is
/// granted access as `git-user` without a password check when
/// `auth_on_private_networks` is off; otherwise Basic auth must supply
/// username `git` and the repository's access key.
pub fn authenticate(
    headers: &HeaderMap,
    remote_addr: IpAddr,
    auth_on_private_networks: bool,
    access_key: &str,
) -> Result<(), Unauthorized> {
    if !auth_on_private_networks && is_private(remote_addr) {
        return Ok(());
    }
    match parse_basic_auth(headers) {
        Some((user, pass)) if user == "git" && pass == access_key => Ok(()),
        _ => Err(Unauthorized),
    }
}
