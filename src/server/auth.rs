use action_flow::ApiAuth;
use axum::http::{header, HeaderMap};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Check a request against a flow's `auth` block. Flows without one are open.
pub fn authorize(auth: Option<&ApiAuth>, headers: &HeaderMap) -> bool {
    match auth {
        None => true,
        Some(ApiAuth::ApiKey { key }) => headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|presented| constant_time_eq(presented.trim(), key))
            .unwrap_or(false),
        Some(ApiAuth::Bearer { token }) => headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| {
                let (scheme, rest) = raw.trim().split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then(|| rest.trim())
            })
            .map(|presented| constant_time_eq(presented, token))
            .unwrap_or(false),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
