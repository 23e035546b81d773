//! Network membership checks for client addresses

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::InvalidAuth;

/// Map IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) back to IPv4.
///
/// Dual-stack listeners report IPv4 peers in mapped form.
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        IpAddr::V4(_) => ip,
    }
}

/// Whether `ip` falls inside at least one of `networks`.
///
/// An empty network list is a configuration problem, not a miss, and is
/// reported as [`InvalidAuth::NoTrustedNetworks`].
pub fn is_member(ip: IpAddr, networks: &[IpNet]) -> Result<bool, InvalidAuth> {
    if networks.is_empty() {
        return Err(InvalidAuth::NoTrustedNetworks);
    }
    let ip = canonical_ip(ip);
    Ok(networks.iter().any(|net| net.contains(&ip)))
}

/// Check that a client may use the trusted networks provider at all
pub fn validate_access(
    ip: IpAddr,
    trusted_networks: &[IpNet],
    trusted_proxies: &[IpNet],
) -> Result<(), InvalidAuth> {
    let ip = canonical_ip(ip);

    if !is_member(ip, trusted_networks)? {
        return Err(InvalidAuth::NotInTrustedNetworks { ip });
    }
    if trusted_proxies.iter().any(|net| net.contains(&ip)) {
        return Err(InvalidAuth::TrustedProxy { ip });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn nets(list: &[&str]) -> Vec<IpNet> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    /// Reference containment on raw integers
    fn contains_v4(net: &str, addr: Ipv4Addr) -> bool {
        let (base, prefix) = net.split_once('/').unwrap();
        let base = u32::from(base.parse::<Ipv4Addr>().unwrap());
        let prefix: u32 = prefix.parse().unwrap();
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        (u32::from(addr) & mask) == (base & mask)
    }

    #[test]
    fn test_empty_networks_is_config_error() {
        assert_eq!(
            is_member(ip("192.168.1.10"), &[]),
            Err(InvalidAuth::NoTrustedNetworks)
        );
    }

    #[test]
    fn test_membership_matches_reference() {
        let configs: &[&[&str]] = &[
            &["192.168.1.0/24"],
            &["10.0.0.0/8", "172.16.0.0/12"],
            &["0.0.0.0/0"],
            &["192.168.1.128/25", "192.168.1.64/26"],
            &["127.0.0.1/32"],
        ];

        for config in configs {
            let networks = nets(config);
            for a in [0u8, 10, 127, 172, 192] {
                for b in [0u8, 16, 31, 168] {
                    for d in [0u8, 1, 63, 64, 127, 128, 255] {
                        let addr = Ipv4Addr::new(a, b, 1, d);
                        let expected = config.iter().any(|n| contains_v4(n, addr));
                        assert_eq!(
                            is_member(IpAddr::V4(addr), &networks),
                            Ok(expected),
                            "{} in {:?}",
                            addr,
                            config
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_ipv6_membership() {
        let networks = nets(&["fd00::/8", "2001:db8::/32"]);
        assert_eq!(is_member(ip("fd12:3456::1"), &networks), Ok(true));
        assert_eq!(is_member(ip("2001:db8:ffff::1"), &networks), Ok(true));
        assert_eq!(is_member(ip("2001:db9::1"), &networks), Ok(false));
        assert_eq!(is_member(ip("192.168.1.1"), &networks), Ok(false));
    }

    #[test]
    fn test_ipv4_mapped_address() {
        let networks = nets(&["192.168.1.0/24"]);
        let mapped = IpAddr::V6(Ipv4Addr::new(192, 168, 1, 20).to_ipv6_mapped());
        assert_eq!(is_member(mapped, &networks), Ok(true));
        assert_eq!(canonical_ip(mapped), ip("192.168.1.20"));
        assert_eq!(canonical_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)), ip("::1"));
    }

    #[test]
    fn test_validate_access() {
        let trusted = nets(&["192.168.0.0/16"]);
        let proxies = nets(&["192.168.100.0/24"]);

        assert_eq!(validate_access(ip("192.168.1.5"), &trusted, &proxies), Ok(()));
        assert_eq!(
            validate_access(ip("10.1.1.1"), &trusted, &proxies),
            Err(InvalidAuth::NotInTrustedNetworks { ip: ip("10.1.1.1") })
        );
        assert_eq!(
            validate_access(ip("192.168.100.7"), &trusted, &proxies),
            Err(InvalidAuth::TrustedProxy { ip: ip("192.168.100.7") })
        );
        assert_eq!(
            validate_access(ip("192.168.1.5"), &[], &proxies),
            Err(InvalidAuth::NoTrustedNetworks)
        );
    }
}
