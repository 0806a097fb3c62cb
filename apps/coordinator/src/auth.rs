//! Bearer-token checks for the worker socket and the admin API.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Compare secrets without leaking the mismatch position through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Whether the request carries `Authorization: Bearer <token>`.
pub fn bearer_matches(headers: &HeaderMap, token: &str) -> bool {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let expected = format!("Bearer {}", token);
    constant_time_eq(value.as_bytes(), expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_matching_bearer() {
        assert!(bearer_matches(&headers_with("Bearer secret"), "secret"));
    }

    #[test]
    fn test_wrong_token() {
        assert!(!bearer_matches(&headers_with("Bearer wrong"), "secret"));
        assert!(!bearer_matches(&headers_with("Bearer secret2"), "secret"));
    }

    #[test]
    fn test_missing_or_malformed_header() {
        assert!(!bearer_matches(&HeaderMap::new(), "secret"));
        assert!(!bearer_matches(&headers_with("secret"), "secret"));
        assert!(!bearer_matches(&headers_with("Basic secret"), "secret"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
