//! CSRF protection for the authorization round trip.
//!
//! Before redirecting to a provider we mint a random token, put it in the
//! `oauth_state` cookie and send `state = "<platform>:<token>"` to the
//! provider. On the way back both copies must be present and equal.

use rand::RngCore;
use std::collections::HashMap;

/// Name of the cookie holding the CSRF token
pub const STATE_COOKIE: &str = "oauth_state";

/// Number of random bytes in a CSRF token (hex encoded on the wire)
const TOKEN_BYTES: usize = 32;

/// Generate a fresh CSRF token.
pub fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The two halves of a callback `state` parameter
#[derive(Debug, PartialEq)]
pub struct ParsedState<'a> {
    pub platform: &'a str,
    pub token: Option<&'a str>,
}

/// Split `state` at the first `:`.
///
/// Without a colon the whole value is the platform and there is no token.
pub fn parse_state(state: &str) -> ParsedState<'_> {
    match state.split_once(':') {
        Some((platform, token)) => ParsedState {
            platform,
            token: Some(token),
        },
        None => ParsedState {
            platform: state,
            token: None,
        },
    }
}

/// Parse a `Cookie` header into name/value pairs.
///
/// Values are percent-decoded. Pairs without `=` are skipped; the first
/// occurrence of a name wins.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = urlencoding::decode(value)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| value.to_string());
        cookies.entry(name.to_string()).or_insert(value);
    }
    cookies
}

/// Why a CSRF check failed. Only presence is recorded, never token values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CsrfFailure {
    pub state_has_token: bool,
    pub cookie_has_token: bool,
}

/// Checks the token from `state` against the `oauth_state` cookie.
pub fn verify(state_token: Option<&str>, cookie_header: Option<&str>) -> Result<(), CsrfFailure> {
    let state_token = state_token.filter(|t| !t.is_empty());
    let cookie_token = cookie_header
        .map(parse_cookies)
        .and_then(|mut cookies| cookies.remove(STATE_COOKIE))
        .filter(|t| !t.is_empty());

    match (state_token, cookie_token.as_deref()) {
        (Some(expected), Some(actual)) if expected == actual => Ok(()),
        (state_token, cookie_token) => Err(CsrfFailure {
            state_has_token: state_token.is_some(),
            cookie_has_token: cookie_token.is_some(),
        }),
    }
}

/// `Set-Cookie` value carrying a freshly minted token.
pub fn issue_cookie(token: &str, max_age_seconds: i64) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Lax",
        STATE_COOKIE, token, max_age_seconds
    )
}

/// `Set-Cookie` value that expires the state cookie immediately.
pub fn clear_cookie() -> String {
    format!(
        "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        STATE_COOKIE
    )
}
