use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::SocketAddr;

/// Best-effort client address used as the key of the in-memory auth limiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// X-Forwarded-For first hop, then X-Real-IP, then the socket address.
    pub fn resolve(headers: &HeaderMap, socket: Option<SocketAddr>) -> Self {
        if let Some(ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return Self(ip.to_string());
        }

        if let Some(ip) = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return Self(ip.to_string());
        }

        match socket {
            Some(addr) => Self(addr.ip().to_string()),
            None => Self("unknown".to_string()),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let socket = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::resolve(&parts.headers, socket))
    }
}

impl std::fmt::Display for ClientIp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(ClientIp::resolve(&headers, None).as_str(), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_real_ip_then_socket() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(ClientIp::resolve(&headers, None).as_str(), "198.51.100.2");

        let socket: SocketAddr = "192.0.2.10:4000".parse().unwrap();
        assert_eq!(
            ClientIp::resolve(&HeaderMap::new(), Some(socket)).as_str(),
            "192.0.2.10"
        );
        assert_eq!(ClientIp::resolve(&HeaderMap::new(), None).as_str(), "unknown");
    }
}
