//! Common helper functions for Anonfly.

use url::Url;

use crate::error::{Error, Result};

/// Default identity-verification server used when none is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:3000";

pub const DISPLAY_NAME_MIN: usize = 3;
pub const DISPLAY_NAME_MAX: usize = 32;

/// Validate a display name and return it trimmed.
///
/// Names are 3 to 32 ASCII letters or digits.
pub fn validate_display_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.len() < DISPLAY_NAME_MIN {
        return Err(Error::validation(format!(
            "display name must be at least {DISPLAY_NAME_MIN} characters"
        )));
    }
    if name.len() > DISPLAY_NAME_MAX {
        return Err(Error::validation(format!(
            "display name must be at most {DISPLAY_NAME_MAX} characters"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::validation(
            "display name may only contain letters and digits",
        ));
    }
    Ok(name.to_string())
}

/// Trim whitespace and trailing slashes; fall back to [`DEFAULT_API_URL`].
pub fn normalize_server_url(server: Option<String>) -> String {
    server
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

/// Websocket endpoint served by the same host as the HTTP API.
///
/// `http` maps to `ws` and `https` to `wss`; an explicit `ws`/`wss` URL is kept.
pub fn ws_url_for_server(server: &str) -> Result<String> {
    let url = Url::parse(server).map_err(|e| Error::config(format!("{server}: {e}")))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(Error::config(format!("unsupported URL scheme: {other}"))),
    };
    let host = url
        .host_str()
        .ok_or_else(|| Error::config(format!("{server}: missing host")))?;
    let port_part = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    Ok(format!("{scheme}://{host}{port_part}/"))
}

/// Append the session token as the `token` query parameter.
pub fn ws_url_with_token(ws_url: &str, token: &str) -> Result<String> {
    let mut url = Url::parse(ws_url).map_err(|e| Error::config(format!("{ws_url}: {e}")))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}
