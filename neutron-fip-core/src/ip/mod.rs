use std::{net::IpAddr, str::FromStr};

use ipnet::IpNet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Couldn't parse IP address '{}'!", .0)]
    Invalid(String),
    #[error("Couldn't parse CIDR '{}'!", .0)]
    InvalidNetwork(String),
    #[error("Range {}-{} mixes IPv4 and IPv6 addresses!", .0, .1)]
    MixedFamilies(IpAddr, IpAddr),
}

pub trait Contains<T> {
    fn contains(&self, other: &T) -> bool;
}

/// An inclusive range of addresses of a single family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    start: IpAddr,
    end: IpAddr,
}

impl AddressRange {
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self, AddressError> {
        if start.is_ipv4() != end.is_ipv4() {
            return Err(AddressError::MixedFamilies(start, end));
        }

        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, AddressError> {
        Self::new(parse_address(start)?, parse_address(end)?)
    }

}

impl Contains<IpAddr> for AddressRange {
    fn contains(&self, other: &IpAddr) -> bool {
        // IpAddr orders every v4 address before every v6 one
        other.is_ipv4() == self.start.is_ipv4() && &self.start <= other && other <= &self.end
    }
}

impl Contains<IpAddr> for IpNet {
    fn contains(&self, other: &IpAddr) -> bool {
        IpNet::contains(self, other)
    }
}

pub fn parse_network(raw: &str) -> Result<IpNet, AddressError> {
    IpNet::from_str(raw.trim()).map_err(|_| AddressError::InvalidNetwork(raw.to_owned()))
}

pub fn parse_address(raw: &str) -> Result<IpAddr, AddressError> {
    IpAddr::from_str(raw.trim()).map_err(|_| AddressError::Invalid(raw.to_owned()))
}

/// Compares two textual addresses by value, so differently spelled IPv6
/// addresses match. Unparsable input falls back to plain text equality.
pub fn same_address(left: &str, right: &str) -> bool {
    match (parse_address(left), parse_address(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_address, parse_network, same_address, AddressError, AddressRange, Contains};

    #[test]
    fn range_contains_its_bounds() {
        let range = AddressRange::parse("10.0.0.2", "10.0.0.10").unwrap();

        assert!(range.contains(&parse_address("10.0.0.2").unwrap()));
        assert!(range.contains(&parse_address("10.0.0.10").unwrap()));
        assert!(range.contains(&parse_address("10.0.0.5").unwrap()));
    }

    #[test]
    fn range_compares_numerically() {
        let range = AddressRange::parse("10.0.0.2", "10.0.0.10").unwrap();

        assert!(!range.contains(&parse_address("10.0.0.1").unwrap()));
        assert!(!range.contains(&parse_address("10.0.0.11").unwrap()));
        assert!(!range.contains(&parse_address("10.0.0.100").unwrap()));
        assert!(!range.contains(&parse_address("::ffff:a00:5").unwrap()));
    }

    #[test]
    fn range_rejects_mixed_families() {
        assert!(matches!(
            AddressRange::parse("10.0.0.1", "fd00::1"),
            Err(AddressError::MixedFamilies(_, _))
        ));
        assert!(matches!(
            AddressRange::parse("10.0.0", "10.0.0.1"),
            Err(AddressError::Invalid(_))
        ));
    }

    #[test]
    fn network_contains_its_hosts() {
        let network = parse_network("10.0.0.0/24").unwrap();

        assert!(network.contains(&parse_address("10.0.0.200").unwrap()));
        assert!(!network.contains(&parse_address("10.0.1.1").unwrap()));
        assert!(matches!(
            parse_network("10.0.0.0/33"),
            Err(AddressError::InvalidNetwork(_))
        ));
    }

    #[test]
    fn addresses_are_compared_by_value() {
        assert!(same_address("fd00::5", "fd00:0:0::5"));
        assert!(same_address("fd00::5", "FD00:0000::0005"));
        assert!(!same_address("fd00::5", "fd00::6"));
        assert!(same_address("10.0.0.5", " 10.0.0.5"));
        assert!(!same_address("not-an-ip", "10.0.0.5"));
    }
}
