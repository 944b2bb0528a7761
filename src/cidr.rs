//! IPv4 CIDR parsing and range arithmetic.
//!
//! Used by the variable validation predicates and the preflight VPC-conflict
//! check. Parsing is strict: malformed notation, out-of-range octets or
//! prefix lengths, and non-canonical blocks (host bits set) are all rejected
//! before anything reaches provisioning.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced when parsing CIDR notation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CidrError {
    /// Not in `a.b.c.d/len` form.
    #[error("`{0}` is not in a.b.c.d/len form")]
    Malformed(String),
    /// One of the address octets is not a number in 0-255.
    #[error("`{0}` has an invalid IPv4 address")]
    BadAddress(String),
    /// Prefix length is not a number in 0-32.
    #[error("`{0}` has a prefix length outside 0-32")]
    BadPrefix(String),
    /// Address has bits set below the prefix boundary.
    #[error("`{0}` has host bits set (network address is {1})")]
    HostBits(String, String),
}

/// An IPv4 CIDR block in canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: u32,
    prefix_len: u8,
}

impl Cidr {
    /// Prefix length of the block.
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Netmask as a 32-bit value.
    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len))
        }
    }

    /// First address in the block (the network address).
    fn first(&self) -> u32 {
        self.network
    }

    /// Last address in the block (the broadcast address).
    fn last(&self) -> u32 {
        self.network | !self.mask()
    }

    /// Whether `other` lies entirely within this block.
    #[must_use]
    pub fn contains(&self, other: &Cidr) -> bool {
        self.first() <= other.first() && other.last() <= self.last()
    }

    /// Whether the two blocks share any address.
    #[must_use]
    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.first() <= other.last() && other.first() <= self.last()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", dotted(self.network), self.prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, prefix_part) = s
            .split_once('/')
            .ok_or_else(|| CidrError::Malformed(s.to_string()))?;

        let octets: Vec<&str> = addr_part.split('.').collect();
        if octets.len() != 4 {
            return Err(CidrError::BadAddress(s.to_string()));
        }

        let mut addr: u32 = 0;
        for octet in octets {
            let value: u8 = octet
                .parse()
                .map_err(|_| CidrError::BadAddress(s.to_string()))?;
            addr = (addr << 8) | u32::from(value);
        }

        let prefix_len: u8 = prefix_part
            .parse()
            .map_err(|_| CidrError::BadPrefix(s.to_string()))?;
        if prefix_len > 32 {
            return Err(CidrError::BadPrefix(s.to_string()));
        }

        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        };

        if addr & !mask != 0 {
            let canonical = format!("{}/{prefix_len}", dotted(addr & mask));
            return Err(CidrError::HostBits(s.to_string(), canonical));
        }

        Ok(Cidr {
            network: addr,
            prefix_len,
        })
    }
}

/// Render a 32-bit address in dotted-quad form.
fn dotted(addr: u32) -> String {
    format!(
        "{}.{}.{}.{}",
        (addr >> 24) & 0xFF,
        (addr >> 16) & 0xFF,
        (addr >> 8) & 0xFF,
        addr & 0xFF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn parses_valid_blocks() {
        let block = cidr("10.0.0.0/16");
        assert_eq!(block.prefix_len(), 16);
        assert_eq!(block.to_string(), "10.0.0.0/16");

        assert_eq!(cidr("0.0.0.0/0").to_string(), "0.0.0.0/0");
        assert_eq!(cidr("192.168.1.1/32").to_string(), "192.168.1.1/32");
    }

    #[test]
    fn rejects_malformed_notation() {
        assert_eq!(
            "10.0.0.0".parse::<Cidr>(),
            Err(CidrError::Malformed("10.0.0.0".into()))
        );
        assert!(matches!(
            "10.0.0/16".parse::<Cidr>(),
            Err(CidrError::BadAddress(_))
        ));
        assert!(matches!(
            "10.0.0.256/16".parse::<Cidr>(),
            Err(CidrError::BadAddress(_))
        ));
        assert!(matches!(
            "10.0.0.0.1/16".parse::<Cidr>(),
            Err(CidrError::BadAddress(_))
        ));
        assert!(matches!(
            "10.0.0.0/33".parse::<Cidr>(),
            Err(CidrError::BadPrefix(_))
        ));
        assert!(matches!(
            "10.0.0.0/".parse::<Cidr>(),
            Err(CidrError::BadPrefix(_))
        ));
        assert!(matches!("".parse::<Cidr>(), Err(CidrError::Malformed(_))));
    }

    #[test]
    fn rejects_host_bits() {
        let err = "10.0.0.1/24".parse::<Cidr>().unwrap_err();
        assert_eq!(
            err,
            CidrError::HostBits("10.0.0.1/24".into(), "10.0.0.0/24".into())
        );
    }

    #[test]
    fn containment() {
        let vpc = cidr("10.0.0.0/16");
        assert!(vpc.contains(&cidr("10.0.1.0/24")));
        assert!(vpc.contains(&cidr("10.0.0.0/16")));
        assert!(!vpc.contains(&cidr("10.1.0.0/24")));
        assert!(!cidr("10.0.1.0/24").contains(&vpc));
    }

    #[test]
    fn overlap() {
        let a = cidr("10.0.0.0/16");
        assert!(a.overlaps(&cidr("10.0.128.0/17")));
        assert!(a.overlaps(&a));
        assert!(cidr("0.0.0.0/0").overlaps(&a));
        assert!(!a.overlaps(&cidr("10.1.0.0/16")));
        assert!(!cidr("10.0.0.0/24").overlaps(&cidr("10.0.1.0/24")));
    }
}
