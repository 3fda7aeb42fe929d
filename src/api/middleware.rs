//! API Middleware - Input Validation and Rate Limiting
//!
//! - Rate limiting per client IP (fixed window plus burst)
//! - Request logging with correlation ids
//! - Security headers
//! - Parsing of hex addresses and hashes from request parameters

use alloy_primitives::{Address, B256};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::error::ApiError;
use crate::common::{generate_correlation_id, log_api_request, log_api_response};

// ============================================================================
// Rate Limiting
// ============================================================================

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    pub window: Duration,
    /// Extra requests allowed once the window is used up
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(120)
    }
}

impl RateLimitConfig {
    /// `max_requests` per minute with a fifth of that as burst
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
            burst: max_requests / 5,
        }
    }
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
    burst_tokens: u32,
}

/// In-memory rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: RwLock<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Check if a request is allowed for the given client ID
    pub async fn check(&self, client_id: &str) -> Result<(), RateLimitError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        let entry = entries.entry(client_id.to_string()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
            burst_tokens: self.config.burst,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
            // Burst refills slowly
            entry.burst_tokens = self.config.burst.min(entry.burst_tokens + 5);
        }

        if entry.count < self.config.max_requests {
            entry.count += 1;
            Ok(())
        } else if entry.burst_tokens > 0 {
            entry.burst_tokens -= 1;
            entry.count += 1;
            Ok(())
        } else {
            let retry_after = self
                .config
                .window
                .saturating_sub(now.duration_since(entry.window_start))
                .as_secs();
            Err(RateLimitError::Exceeded { retry_after })
        }
    }

    /// Drop entries idle for two windows
    pub async fn cleanup(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let expiry = self.config.window * 2;

        entries.retain(|_, entry| now.duration_since(entry.window_start) < expiry);
    }

    pub async fn tracked_clients(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[derive(Debug)]
pub enum RateLimitError {
    Exceeded { retry_after: u64 },
}

/// Shared rate limiter state
pub type RateLimitState = Arc<RateLimiter>;

/// Rate limit rejection body
#[derive(Serialize)]
pub struct RateLimited {
    pub error: String,
    pub code: String,
    pub retry_after: u64,
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response()
    }
}

/// Extract client IP from request headers
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    // X-Forwarded-For first (proxied requests), first hop only
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            return Some(value.split(',').next()?.trim().to_string());
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            return Some(value.to_string());
        }
    }

    None
}

pub async fn rate_limit_middleware(
    State(rate_limiter): State<RateLimitState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, RateLimited> {
    let client_id = extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string());

    match rate_limiter.check(&client_id).await {
        Ok(()) => Ok(next.run(request).await),
        Err(RateLimitError::Exceeded { retry_after }) => Err(RateLimited {
            error: "rate limit exceeded".to_string(),
            code: "RATE_LIMITED".to_string(),
            retry_after,
        }),
    }
}

// ============================================================================
// Logging and headers
// ============================================================================

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let client_ip = extract_client_ip(request.headers());
    let correlation_id = generate_correlation_id();
    let start = Instant::now();

    log_api_request(&method, &path, client_ip.as_deref(), &correlation_id);
    let mut response = next.run(request).await;
    log_api_response(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_millis() as u64,
        &correlation_id,
    );

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert("x-correlation-id", value);
    }
    response
}

pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    response
}

// ============================================================================
// Input Validation
// ============================================================================

/// Check a hex string of exactly `len` bytes, `0x` prefix optional
pub fn validate_hex(input: &str, len: usize, field_name: &str) -> Result<(), ApiError> {
    if input.is_empty() {
        return Err(ApiError::validation(format!("{} is required", field_name)));
    }

    let hex_str = input.strip_prefix("0x").unwrap_or(input);
    if !hex_str.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::validation(format!("{} must be valid hex", field_name)));
    }
    if hex_str.len() != len * 2 {
        return Err(ApiError::validation(format!(
            "{} must be {} bytes ({} hex characters)",
            field_name,
            len,
            len * 2
        )));
    }

    Ok(())
}

pub fn parse_address(input: &str, field_name: &str) -> Result<Address, ApiError> {
    validate_hex(input, 20, field_name)?;
    Address::from_str(input)
        .map_err(|_| ApiError::validation(format!("{} is not a valid address", field_name)))
}

pub fn parse_hash(input: &str, field_name: &str) -> Result<B256, ApiError> {
    validate_hex(input, 32, field_name)?;
    B256::from_str(input)
        .map_err(|_| ApiError::validation(format!("{} is not a valid hash", field_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_validation() {
        assert!(validate_hex(&"ab".repeat(20), 20, "addr").is_ok());
        assert!(validate_hex(&format!("0x{}", "ab".repeat(32)), 32, "hash").is_ok());

        assert!(validate_hex("", 20, "addr").is_err());
        assert!(validate_hex("0xghij", 2, "addr").is_err());
        assert!(validate_hex("abcd", 32, "hash").is_err());
    }

    #[test]
    fn test_parse_address() {
        let addr = parse_address(&format!("0x{}", "aa".repeat(20)), "dest_addr").unwrap();
        assert_eq!(addr, Address::repeat_byte(0xaa));
        assert!(parse_address("0x1234", "dest_addr").is_err());
    }

    #[test]
    fn test_extract_client_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("10.0.0.2"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.1"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("1.2.3.4"));
    }

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 3,
            window: Duration::from_secs(1),
            burst: 1,
        });

        for _ in 0..3 {
            assert!(limiter.check("client1").await.is_ok());
        }
        // 4th uses burst
        assert!(limiter.check("client1").await.is_ok());
        assert!(limiter.check("client1").await.is_err());

        assert!(limiter.check("client2").await.is_ok());
        assert_eq!(limiter.tracked_clients().await, 2);
    }
}
