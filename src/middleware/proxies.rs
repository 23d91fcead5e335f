//! Client address resolution behind a reverse proxy.
//!
//! When the TCP peer is one of the configured proxies, the left-most address
//! in `x-forwarded-for` is taken as the client. Otherwise the peer itself is
//! the client and the header is ignored.

use std::net::IpAddr;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

/// The resolved client address, stored in request extensions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientIp(pub IpAddr);

/// Best known client address: the resolved [`ClientIp`] if the proxy stage
/// ran, else the peer address.
pub fn client_ip(req: &Request) -> Option<IpAddr> {
    req.extensions()
        .get::<ClientIp>()
        .map(|c| c.0)
        .or_else(|| req.peer_addr().map(|a| a.ip()))
}

pub struct TrustProxies {
    proxies: Trusted,
}

enum Trusted {
    Any,
    Only(Vec<IpAddr>),
}

impl TrustProxies {
    pub fn new(proxies: Vec<IpAddr>) -> Self {
        Self { proxies: Trusted::Only(proxies) }
    }

    /// Trusts whichever peer connects. Only sound when the process is not
    /// reachable except through the proxy.
    pub fn any() -> Self {
        Self { proxies: Trusted::Any }
    }

    /// Parses `*` or a comma-separated address list.
    pub fn parse(list: &str) -> Result<Self, String> {
        if list.trim() == "*" {
            return Ok(Self::any());
        }
        list.split(',')
            .map(|ip| ip.trim().parse().map_err(|_| format!("`{}` is not an IP address", ip.trim())))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    fn trusts(&self, peer: IpAddr) -> bool {
        match &self.proxies {
            Trusted::Any => true,
            Trusted::Only(list) => list.contains(&peer),
        }
    }

    fn resolve(&self, req: &Request) -> Option<IpAddr> {
        let peer = req.peer_addr()?.ip();
        if !self.trusts(peer) {
            return Some(peer);
        }
        let forwarded = req
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse().ok());
        Some(forwarded.unwrap_or(peer))
    }
}

impl Middleware for TrustProxies {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        if let Some(ip) = self.resolve(&req) {
            req.extensions_mut().insert(ClientIp(ip));
        }
        next.run(req)
    }
}
