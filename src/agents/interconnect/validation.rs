//! Connection spec validation
//!
//! Runs before any provider call or store write. All problems are reported
//! together in a single [`InterconnectError::Validation`].

use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;

use super::error::InterconnectError;
use super::types::{
    BgpConfig, ConnectionState, ProviderTag, SideSpec, VpnConnection, VpnConnectionSpec,
};

pub const MAX_NAME_LEN: usize = 48;
pub const TUNNEL_COUNT: usize = 2;
const PSK_MIN_LEN: usize = 8;
const PSK_MAX_LEN: usize = 64;
/// AS_TRANS, reserved for 4-byte ASN transition
const AS_TRANS: u32 = 23456;

fn link_local() -> Ipv4Net {
    Ipv4Net::new(Ipv4Addr::new(169, 254, 0, 0), 16).unwrap_or_default()
}

/// Validate `spec` against the registered providers and the connections
/// already in the store (excluding any record with the same name).
pub fn validate_spec(
    spec: &VpnConnectionSpec,
    existing: &[VpnConnection],
    registered: &[ProviderTag],
) -> Result<(), InterconnectError> {
    let mut problems = Vec::new();

    check_name(&spec.name, &mut problems);
    check_sides(spec, registered, &mut problems);
    let cidrs = check_tunnels(spec, &mut problems);
    check_overlap_with_existing(spec, &cidrs, existing, &mut problems);
    if let Some(bgp) = spec.bgp.as_ref().filter(|b| b.enabled) {
        check_bgp(bgp, &cidrs, &mut problems);
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(InterconnectError::Validation(problems.join("; ")))
    }
}

fn check_name(name: &str, problems: &mut Vec<String>) {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        problems.push(format!("name must be 1 to {} characters", MAX_NAME_LEN));
        return;
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        problems.push("name must start with a lowercase letter".to_string());
    }
    if name.ends_with('-') {
        problems.push("name must not end with '-'".to_string());
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        problems.push("name may only contain lowercase letters, digits and '-'".to_string());
    }
}

fn check_side(label: &str, side: &SideSpec, registered: &[ProviderTag], problems: &mut Vec<String>) {
    if !registered.contains(&side.provider) {
        problems.push(format!("{}: no client registered for provider {}", label, side.provider));
    }
    if side.region.trim().is_empty() {
        problems.push(format!("{}: region is required", label));
    }
    if side.network.trim().is_empty() {
        problems.push(format!("{}: network is required", label));
    }
}

fn check_sides(spec: &VpnConnectionSpec, registered: &[ProviderTag], problems: &mut Vec<String>) {
    if spec.side_a.provider == spec.side_b.provider {
        problems.push(format!(
            "side_a and side_b must use different providers (both are {})",
            spec.side_a.provider
        ));
    }
    check_side("side_a", &spec.side_a, registered, problems);
    check_side("side_b", &spec.side_b, registered, problems);
}

/// Returns the well-formed tunnel CIDRs for the later checks
fn check_tunnels(spec: &VpnConnectionSpec, problems: &mut Vec<String>) -> Vec<Ipv4Net> {
    if spec.tunnels.len() != TUNNEL_COUNT {
        problems.push(format!(
            "exactly {} tunnels are required, got {}",
            TUNNEL_COUNT,
            spec.tunnels.len()
        ));
    }

    let range = link_local();
    let mut cidrs: Vec<Ipv4Net> = Vec::new();

    for (i, tunnel) in spec.tunnels.iter().enumerate() {
        let cidr = tunnel.inside_cidr;
        if cidr.prefix_len() != 30 {
            problems.push(format!("tunnel {}: inside_cidr {} must be a /30", i, cidr));
        } else if !range.contains(&cidr) {
            problems.push(format!("tunnel {}: inside_cidr {} must be inside {}", i, cidr, range));
        } else if cidrs.iter().any(|c| overlaps(c, &cidr)) {
            problems.push(format!("tunnel {}: inside_cidr {} overlaps another tunnel", i, cidr));
        } else {
            cidrs.push(cidr);
        }

        if let Err(reason) = check_preshared_key(tunnel.preshared_key.expose()) {
            problems.push(format!("tunnel {}: preshared_key {}", i, reason));
        }
    }

    cidrs
}

fn check_preshared_key(key: &str) -> Result<(), &'static str> {
    if key.len() < PSK_MIN_LEN || key.len() > PSK_MAX_LEN {
        return Err("must be 8 to 64 characters");
    }
    if key.starts_with('0') {
        return Err("must not start with '0'");
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_') {
        return Err("may only contain letters, digits, '.' and '_'");
    }
    Ok(())
}

fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Deleted records and cleanly failed ones no longer claim their CIDRs
fn holds_addresses(conn: &VpnConnection) -> bool {
    match conn.state {
        ConnectionState::Deleted => false,
        ConnectionState::Failed => !conn.dangling().is_empty(),
        _ => true,
    }
}

fn check_overlap_with_existing(
    spec: &VpnConnectionSpec,
    cidrs: &[Ipv4Net],
    existing: &[VpnConnection],
    problems: &mut Vec<String>,
) {
    let ours = [
        (spec.side_a.provider, spec.side_a.network.as_str()),
        (spec.side_b.provider, spec.side_b.network.as_str()),
    ];

    for other in existing.iter().filter(|c| c.name != spec.name && holds_addresses(c)) {
        let shares_network = other.networks().iter().any(|n| ours.contains(n));
        if !shares_network {
            continue;
        }
        for cidr in cidrs {
            if other.tunnels.iter().any(|t| overlaps(&t.inside_cidr, cidr)) {
                problems.push(format!(
                    "inside_cidr {} overlaps connection {} on a shared network",
                    cidr, other.name
                ));
            }
        }
    }
}

fn check_asn(label: &str, asn: u32, problems: &mut Vec<String>) {
    if asn == 0 || asn == u32::MAX || asn == AS_TRANS {
        problems.push(format!("bgp: {} {} is reserved", label, asn));
    }
}

fn check_bgp(bgp: &BgpConfig, cidrs: &[Ipv4Net], problems: &mut Vec<String>) {
    if bgp.asn_a == bgp.asn_b {
        problems.push(format!("bgp: asn_a and asn_b must differ (both are {})", bgp.asn_a));
    }
    check_asn("asn_a", bgp.asn_a, problems);
    check_asn("asn_b", bgp.asn_b, problems);

    for route in &bgp.route_entries {
        let inside = match route.next_hop {
            IpAddr::V4(hop) => cidrs.iter().any(|c| c.contains(&hop)),
            IpAddr::V6(_) => false,
        };
        if !inside {
            problems.push(format!(
                "bgp: next hop {} for {} is not inside a tunnel cidr",
                route.next_hop, route.cidr
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::interconnect::error::ConnectionError;
    use crate::agents::interconnect::types::{PresharedKey, ResourceRef, TunnelSpec};
    use std::collections::BTreeMap;

    const ALL: &[ProviderTag] = &[ProviderTag::Aws, ProviderTag::Azure, ProviderTag::Gcp];

    fn tunnel(cidr: &str) -> TunnelSpec {
        TunnelSpec {
            inside_cidr: cidr.parse().unwrap(),
            preshared_key: PresharedKey::new("Valid.Key_123"),
        }
    }

    fn spec() -> VpnConnectionSpec {
        VpnConnectionSpec {
            name: "core-link".to_string(),
            side_a: SideSpec {
                provider: ProviderTag::Aws,
                region: "us-east-1".to_string(),
                network: "vpc-0abc".to_string(),
            },
            side_b: SideSpec {
                provider: ProviderTag::Azure,
                region: "eastus".to_string(),
                network: "core-vnet".to_string(),
            },
            tunnels: vec![tunnel("169.254.21.0/30"), tunnel("169.254.22.0/30")],
            bgp: Some(BgpConfig::new(64512, 65515)),
            labels: BTreeMap::new(),
        }
    }

    fn message(spec: &VpnConnectionSpec, existing: &[VpnConnection]) -> String {
        match validate_spec(spec, existing, ALL) {
            Err(InterconnectError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_spec_passes() {
        assert!(validate_spec(&spec(), &[], ALL).is_ok());
    }

    #[test]
    fn test_rejects_equal_asns() {
        let mut s = spec();
        s.bgp = Some(BgpConfig::new(65000, 65000));
        assert!(message(&s, &[]).contains("asn_a and asn_b must differ"));
    }

    #[test]
    fn test_disabled_bgp_skips_asn_checks() {
        let mut s = spec();
        let mut bgp = BgpConfig::new(65000, 65000);
        bgp.enabled = false;
        s.bgp = Some(bgp);
        assert!(validate_spec(&s, &[], ALL).is_ok());
    }

    #[test]
    fn test_rejects_reserved_asn() {
        let mut s = spec();
        s.bgp = Some(BgpConfig::new(23456, 65000));
        assert!(message(&s, &[]).contains("asn_a 23456 is reserved"));
    }

    #[test]
    fn test_rejects_bad_names() {
        for name in ["", "Core", "1link", "link-", "link_one", &"a".repeat(49)] {
            let mut s = spec();
            s.name = name.to_string();
            assert!(validate_spec(&s, &[], ALL).is_err(), "accepted {name:?}");
        }
    }

    #[test]
    fn test_rejects_same_provider_and_unregistered() {
        let mut s = spec();
        s.side_b.provider = ProviderTag::Aws;
        assert!(message(&s, &[]).contains("different providers"));

        let registered = [ProviderTag::Aws];
        let err = validate_spec(&spec(), &[], &registered).unwrap_err();
        assert!(err.to_string().contains("no client registered for provider azure"));
    }

    #[test]
    fn test_tunnel_cidr_rules() {
        let mut s = spec();
        s.tunnels = vec![tunnel("169.254.21.0/29"), tunnel("10.0.0.0/30")];
        let msg = message(&s, &[]);
        assert!(msg.contains("must be a /30"));
        assert!(msg.contains("must be inside 169.254.0.0/16"));

        let mut s = spec();
        s.tunnels = vec![tunnel("169.254.21.0/30"), tunnel("169.254.21.0/30")];
        assert!(message(&s, &[]).contains("overlaps another tunnel"));

        let mut s = spec();
        s.tunnels.pop();
        assert!(message(&s, &[]).contains("exactly 2 tunnels"));
    }

    #[test]
    fn test_preshared_key_rules() {
        assert!(check_preshared_key("short").is_err());
        assert!(check_preshared_key("0startswithzero").is_err());
        assert!(check_preshared_key("has-dash-inside").is_err());
        assert!(check_preshared_key(&"k".repeat(65)).is_err());
        assert!(check_preshared_key("Good.key_value").is_ok());
    }

    #[test]
    fn test_overlap_with_connection_on_shared_network() {
        let mut other_spec = spec();
        other_spec.name = "other-link".to_string();
        other_spec.side_b = SideSpec {
            provider: ProviderTag::Gcp,
            region: "us-east4".to_string(),
            network: "shared".to_string(),
        };
        let other = VpnConnection::from_spec(&other_spec);

        // shares aws/vpc-0abc
        assert!(message(&spec(), &[other.clone()]).contains("overlaps connection other-link"));

        // no shared network, same CIDRs are fine
        let mut s = spec();
        s.side_a.network = "vpc-9999".to_string();
        assert!(validate_spec(&s, &[other.clone()], ALL).is_ok());

        // a record with the same name is the one being resumed
        let mut same = other;
        same.name = "core-link".to_string();
        assert!(validate_spec(&spec(), &[same], ALL).is_ok());
    }

    #[test]
    fn test_released_connections_do_not_block_cidrs() {
        let mut other_spec = spec();
        other_spec.name = "other-link".to_string();
        let mut other = VpnConnection::from_spec(&other_spec);
        other.transition(ConnectionState::ProvisioningSideA).unwrap();
        other.transition(ConnectionState::RollingBack).unwrap();
        other.transition(ConnectionState::Failed).unwrap();
        assert!(validate_spec(&spec(), &[other.clone()], ALL).is_ok());

        let mut stuck = other.clone();
        let partial = InterconnectError::PartialFailure {
            dangling: vec![ResourceRef::Gateway {
                provider: ProviderTag::Aws,
                native_id: "other-link-a-vpngw".to_string(),
                region: "us-east-1".to_string(),
            }],
        };
        stuck.last_error = Some(ConnectionError::from_error(&partial, ConnectionState::ProvisioningSideA));
        assert!(message(&spec(), &[stuck]).contains("overlaps connection other-link"));

        let mut deleted = VpnConnection::from_spec(&other_spec);
        deleted.transition(ConnectionState::Deleting).unwrap();
        deleted.transition(ConnectionState::Deleted).unwrap();
        assert!(validate_spec(&spec(), &[deleted], ALL).is_ok());
    }

    #[test]
    fn test_route_next_hop_must_be_in_tunnel() {
        let mut s = spec();
        s.bgp = Some(
            BgpConfig::new(64512, 65515)
                .route("10.0.0.0/16".parse().unwrap(), "169.254.21.1".parse().unwrap())
                .route("10.1.0.0/16".parse().unwrap(), "192.168.0.1".parse().unwrap()),
        );
        let msg = message(&s, &[]);
        assert!(msg.contains("next hop 192.168.0.1"));
        assert!(!msg.contains("169.254.21.1"));
    }
}
