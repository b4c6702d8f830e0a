use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// Rate-limit state reported by the service on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the window resets.
    pub reset: u64,
    pub retry_after: Option<u64>,
}

impl RateLimitInfo {
    /// `None` unless limit, remaining and reset are all present and numeric.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Some(Self {
            limit: header_number(headers, LIMIT_HEADER)?,
            remaining: header_number(headers, REMAINING_HEADER)?,
            reset: header_number(headers, RESET_HEADER)?,
            retry_after: header_number(headers, RETRY_AFTER_HEADER),
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_parses_the_three_required_headers() {
        let info = RateLimitInfo::from_headers(&headers(&[
            ("X-RateLimit-Limit", "100"),
            ("X-RateLimit-Remaining", "99"),
            ("X-RateLimit-Reset", "1700000000"),
        ]));
        assert_eq!(
            info,
            Some(RateLimitInfo {
                limit: 100,
                remaining: 99,
                reset: 1_700_000_000,
                retry_after: None,
            })
        );
    }

    #[test]
    fn test_missing_remaining_yields_none() {
        let info = RateLimitInfo::from_headers(&headers(&[
            ("X-RateLimit-Limit", "100"),
            ("X-RateLimit-Reset", "1700000000"),
        ]));
        assert_eq!(info, None);
    }

    #[test]
    fn test_retry_after_and_garbage_values() {
        let info = RateLimitInfo::from_headers(&headers(&[
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset", "1700000060"),
            ("Retry-After", "60"),
        ]))
        .unwrap();
        assert!(info.is_exhausted());
        assert_eq!(info.retry_after, Some(60));

        let garbage = RateLimitInfo::from_headers(&headers(&[
            ("X-RateLimit-Limit", "lots"),
            ("X-RateLimit-Remaining", "1"),
            ("X-RateLimit-Reset", "1"),
        ]));
        assert_eq!(garbage, None);
    }

    #[test]
    fn test_serializes_camel_case() {
        let info = RateLimitInfo {
            limit: 1,
            remaining: 0,
            reset: 2,
            retry_after: Some(3),
        };
        assert_eq!(
            serde_json::to_value(info).unwrap(),
            serde_json::json!({"limit": 1, "remaining": 0, "reset": 2, "retryAfter": 3})
        );
    }
}
