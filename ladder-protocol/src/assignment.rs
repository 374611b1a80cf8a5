//! Address assignment carried by `Approve`

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::Error;

/// Virtual address and DNS servers handed to a registered client
///
/// The text form is the address followed by the DNS servers, separated by
/// single spaces, e.g. `10.233.233.100 8.8.8.8 1.1.1.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub address: Ipv4Addr,
    pub dns_servers: Vec<IpAddr>,
}

impl Assignment {
    pub fn new(address: Ipv4Addr, dns_servers: Vec<IpAddr>) -> Self {
        Self {
            address,
            dns_servers,
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for dns in &self.dns_servers {
            write!(f, " {}", dns)?;
        }
        Ok(())
    }
}

impl FromStr for Assignment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut fields = s.split_whitespace();

        let address = fields
            .next()
            .ok_or_else(|| Error::Handshake("empty assignment".into()))?;
        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| Error::Handshake(format!("invalid virtual address '{}'", address)))?;

        let mut dns_servers = Vec::new();
        for field in fields {
            let dns: IpAddr = field
                .parse()
                .map_err(|_| Error::Handshake(format!("invalid DNS server '{}'", field)))?;
            // Older servers put a 0.0.0.0 placeholder before the DNS list
            if dns.is_unspecified() {
                continue;
            }
            dns_servers.push(dns);
        }

        Ok(Self {
            address,
            dns_servers,
        })
    }
}
