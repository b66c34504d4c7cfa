//! Tunnel Binder
//!
//! Turns one planned interconnect plus both sides' gateway handles into
//! symmetric per-side tunnel records. Pairing is by address slot index:
//! slot 0 on one side pairs with slot 0 on the other, slot 1 with slot 1.

use ipnet::Ipv4Net;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::AddressingError;

use super::types::{
    CloudPair, GatewayHandle, Interconnect, Network, PresharedKey, RedundancyMode,
    RoutePropagation, RouteTableRef, StaticRoute, Tunnel,
};

/// Length of the hex digest slice used in derived pre-shared keys
const PSK_HEX_LEN: usize = 40;

/// One side of a link: its gateway and the network behind it
#[derive(Debug, Clone, Copy)]
pub struct LinkSide<'a> {
    pub gateway: &'a GatewayHandle,
    pub network: &'a Network,
}

/// Point-to-point BGP addressing for one tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BgpLink {
    inside_cidr: Ipv4Net,
    first_host: Ipv4Addr,
    second_host: Ipv4Addr,
}

pub struct TunnelBinder {
    mode: RedundancyMode,
    psk_seed: String,
    bgp_link_block: Ipv4Net,
    ike_version: u8,
}

impl TunnelBinder {
    pub fn new(
        mode: RedundancyMode,
        psk_seed: impl Into<String>,
        bgp_link_block: Ipv4Net,
        ike_version: u8,
    ) -> Self {
        Self {
            mode,
            psk_seed: psk_seed.into(),
            bgp_link_block,
            ike_version,
        }
    }

    /// Bind the tunnels of one interconnect.
    ///
    /// Returns two records per tunnel index, first-side record first. Fails
    /// with [`AddressingError`] when a side's gateway does not belong to the
    /// pair or does not expose one address per tunnel.
    pub fn bind(
        &self,
        interconnect: &Interconnect,
        a: LinkSide<'_>,
        b: LinkSide<'_>,
    ) -> Result<Vec<Tunnel>, AddressingError> {
        let pair = interconnect.pair;
        let (first, second) = if a.gateway.cloud() == pair.first() {
            (a, b)
        } else {
            (b, a)
        };

        for side in [first, second] {
            if !pair.contains(side.gateway.cloud()) {
                return Err(AddressingError::ForeignGateway {
                    pair,
                    cloud: side.gateway.cloud(),
                });
            }
        }
        if first.gateway.cloud() == second.gateway.cloud() {
            return Err(AddressingError::ForeignGateway {
                pair,
                cloud: second.gateway.cloud(),
            });
        }

        let expected = interconnect.tunnel_count as usize;
        for side in [first, second] {
            let actual = side.gateway.external_addresses().len();
            if actual != expected {
                return Err(AddressingError::AddressCount {
                    cloud: side.gateway.cloud(),
                    mode: self.mode,
                    expected,
                    actual,
                });
            }
        }

        let with_bgp = self.mode == RedundancyMode::Ha
            || first.network.requires_bgp
            || second.network.requires_bgp;

        let mut tunnels = Vec::with_capacity(expected * 2);
        for index in 0..interconnect.tunnel_count {
            let slot = index as usize;
            let first_addr = &first.gateway.external_addresses()[slot];
            let second_addr = &second.gateway.external_addresses()[slot];
            let preshared_key = self.preshared_key(pair, index);
            let bgp = if with_bgp {
                Some(self.bgp_link(pair, index)?)
            } else {
                None
            };

            tunnels.push(Tunnel {
                interconnect: pair,
                index,
                owner: first.gateway.cloud(),
                peer: second.gateway.cloud(),
                local_addr: first_addr.clone(),
                peer_addr: second_addr.clone(),
                preshared_key: preshared_key.clone(),
                local_bgp_addr: bgp.map(|l| l.first_host),
                peer_bgp_addr: bgp.map(|l| l.second_host),
                inside_cidr: bgp.map(|l| l.inside_cidr),
                local_asn: first.gateway.asn(),
                peer_asn: second.gateway.asn(),
                peer_cidr: second.network.cidr,
                ike_version: self.ike_version,
            });
            tunnels.push(Tunnel {
                interconnect: pair,
                index,
                owner: second.gateway.cloud(),
                peer: first.gateway.cloud(),
                local_addr: second_addr.clone(),
                peer_addr: first_addr.clone(),
                preshared_key,
                local_bgp_addr: bgp.map(|l| l.second_host),
                peer_bgp_addr: bgp.map(|l| l.first_host),
                inside_cidr: bgp.map(|l| l.inside_cidr),
                local_asn: second.gateway.asn(),
                peer_asn: first.gateway.asn(),
                peer_cidr: first.network.cidr,
                ike_version: self.ike_version,
            });
        }

        debug!(
            pair = %pair,
            tunnels = interconnect.tunnel_count,
            bgp = with_bgp,
            "Bound interconnect tunnels"
        );

        Ok(tunnels)
    }

    /// Shared key for tunnel `index` of `pair`, identical on both sides
    fn preshared_key(&self, pair: CloudPair, index: u8) -> PresharedKey {
        let mut hasher = Sha256::new();
        hasher.update(self.psk_seed.as_bytes());
        hasher.update([0u8]);
        hasher.update(pair.to_string().as_bytes());
        hasher.update([0u8, index]);
        let digest = hasher.finalize();

        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        // AWS site-to-site VPN rejects keys that start with a zero
        PresharedKey::new(format!("k{}", &hex[..PSK_HEX_LEN]))
    }

    /// /30 at `block + index * 256 + ordinal * 4`
    fn bgp_link(&self, pair: CloudPair, index: u8) -> Result<BgpLink, AddressingError> {
        let exhausted = || AddressingError::LinkLocalExhausted {
            block: self.bgp_link_block,
            pair,
            index,
        };

        let base = u32::from(self.bgp_link_block.network())
            .checked_add(u32::from(index) * 256 + u32::from(pair.ordinal()) * 4)
            .ok_or_else(exhausted)?;
        let inside_cidr = Ipv4Net::new(Ipv4Addr::from(base), 30).map_err(|_| exhausted())?;

        let link_local = |addr: u32| addr >> 16 == u32::from(Ipv4Addr::new(169, 254, 0, 0)) >> 16;
        if !link_local(base) || !link_local(base + 3) {
            return Err(exhausted());
        }

        Ok(BgpLink {
            inside_cidr,
            first_host: Ipv4Addr::from(base + 1),
            second_host: Ipv4Addr::from(base + 2),
        })
    }
}

/// Static routes for tunnels that carry no BGP session, one per side
pub fn static_routes(tunnels: &[Tunnel]) -> Vec<StaticRoute> {
    tunnels
        .iter()
        .filter(|t| !t.has_bgp())
        .map(|t| StaticRoute {
            cloud: t.owner,
            interconnect: t.interconnect,
            tunnel_index: t.index,
            destination: t.peer_cidr,
        })
        .collect()
}

/// Route-table propagations for a gateway whose cloud does not program its
/// network from learned routes. Tables come out sorted and deduplicated; no
/// configured table means the main one.
pub fn route_propagations(gateway: &GatewayHandle, network: &Network) -> Vec<RoutePropagation> {
    if !gateway.cloud().propagates_vpn_routes() {
        return Vec::new();
    }

    let tables: BTreeSet<RouteTableRef> = if network.route_propagation_tables.is_empty() {
        BTreeSet::from([RouteTableRef::Main])
    } else {
        network
            .route_propagation_tables
            .iter()
            .map(|t| RouteTableRef::Named(t.trim().to_string()))
            .collect()
    };

    tables
        .into_iter()
        .map(|route_table| RoutePropagation {
            cloud: gateway.cloud(),
            gateway: gateway.name().to_string(),
            route_table,
        })
        .collect()
}
