//! Origin filtering by trusted CIDR block.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::{IntegrityError, Result};

/// Header in which the agent declares its own IP.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// An optional CIDR block that senders must belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedSubnet {
    net: Option<IpNet>,
}

impl TrustedSubnet {
    /// Parses a CIDR string. An empty string disables the check.
    pub fn parse(cidr: &str) -> Result<Self> {
        let cidr = cidr.trim();
        if cidr.is_empty() {
            return Ok(Self::default());
        }
        cidr.parse::<IpNet>()
            .map(|net| Self { net: Some(net) })
            .map_err(|e| IntegrityError::InvalidSubnet {
                value: cidr.to_string(),
                reason: e.to_string(),
            })
    }

    /// Returns true if a subnet is configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.net.is_some()
    }

    /// Returns true if `ip` is inside the subnet, or if no subnet is configured.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.net.is_none_or(|net| net.contains(&ip))
    }

    /// Checks a declared origin, typically the `X-Real-IP` header value.
    pub fn check(&self, origin: Option<&str>) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let raw = origin
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(IntegrityError::MissingOrigin)?;
        let ip: IpAddr = raw.parse().map_err(|_| IntegrityError::InvalidOrigin {
            value: raw.to_string(),
        })?;

        if self.contains(ip) {
            Ok(())
        } else {
            Err(IntegrityError::UntrustedOrigin { ip })
        }
    }
}
