// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel address assignment.
//!
//! The gateway owns the first host of the tunnel network. Edges get an
//! address derived from their id so that the same edge lands on the same
//! address whenever it is derived again.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use sha2::{Digest, Sha256};

/// The gateway's own address on the tunnel network.
pub fn gateway_address(network: Ipv4Net) -> Ipv4Addr {
	Ipv4Addr::from(u32::from(network.network()) + 1)
}

/// The gateway's address together with the network prefix, as assigned to
/// the interface (`10.0.0.1/24`).
pub fn gateway_interface_address(network: Ipv4Net) -> Ipv4Net {
	Ipv4Net::new(gateway_address(network), network.prefix_len()).unwrap_or(network)
}

/// Hosts available to edges: everything except the network, gateway and
/// broadcast addresses.
fn edge_host_count(network: Ipv4Net) -> u32 {
	let size = 1u64 << (32 - network.prefix_len() as u64);
	size.saturating_sub(3) as u32
}

/// Derive the tunnel address for `edge_id` at probe `index`.
///
/// SHA-256 of `"{edge_id}:{index}"` is reduced into the edge host range.
/// Returns `None` only when the network has no room for edges at all.
pub fn derive_allowed_ip(network: Ipv4Net, edge_id: &str, index: u32) -> Option<Ipv4Addr> {
	let hosts = edge_host_count(network);
	if hosts == 0 {
		return None;
	}

	let digest = Sha256::digest(format!("{edge_id}:{index}").as_bytes());
	let mut prefix = [0u8; 8];
	prefix.copy_from_slice(&digest[..8]);
	let offset = (u64::from_be_bytes(prefix) % u64::from(hosts)) as u32;

	Some(Ipv4Addr::from(u32::from(network.network()) + 2 + offset))
}

/// Pick an address for `edge_id` not present in `taken`.
///
/// Hashed probes come first. A nearly full network can defeat them, so the
/// lowest free host is used as a last resort; `None` means the network is
/// full.
pub fn assign_address(
	network: Ipv4Net,
	edge_id: &str,
	taken: &HashSet<Ipv4Addr>,
) -> Option<(Ipv4Addr, u32)> {
	let hosts = edge_host_count(network);
	let probes = hosts.saturating_mul(4).max(64);

	for index in 0..probes {
		let candidate = derive_allowed_ip(network, edge_id, index)?;
		if !taken.contains(&candidate) {
			return Some((candidate, index));
		}
	}

	let first = u32::from(network.network()) + 2;
	(first..first + hosts)
		.map(Ipv4Addr::from)
		.find(|addr| !taken.contains(addr))
		.map(|addr| (addr, probes))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn net(s: &str) -> Ipv4Net {
		s.parse().unwrap()
	}

	#[test]
	fn gateway_is_first_host() {
		assert_eq!(gateway_address(net("10.0.0.0/24")), Ipv4Addr::new(10, 0, 0, 1));
		assert_eq!(
			gateway_interface_address(net("10.0.0.0/24")).to_string(),
			"10.0.0.1/24"
		);
	}

	#[test]
	fn derivation_is_stable() {
		let network = net("10.0.0.0/24");
		assert_eq!(
			derive_allowed_ip(network, "edge-abc", 0),
			derive_allowed_ip(network, "edge-abc", 0)
		);
	}

	#[test]
	fn slash_30_has_a_single_edge_host() {
		let network = net("192.168.5.0/30");
		for index in 0..16 {
			assert_eq!(
				derive_allowed_ip(network, "edge-x", index),
				Some(Ipv4Addr::new(192, 168, 5, 2))
			);
		}
	}

	#[test]
	fn slash_31_has_no_edge_hosts() {
		assert_eq!(derive_allowed_ip(net("192.168.5.0/31"), "edge-x", 0), None);
	}

	#[test]
	fn assignment_falls_back_to_lowest_free_host() {
		let network = net("10.9.0.0/29");
		// Edge hosts are .2 through .6; leave only .5 free.
		let taken: HashSet<Ipv4Addr> = [2, 3, 4, 6]
			.into_iter()
			.map(|h| Ipv4Addr::new(10, 9, 0, h))
			.collect();
		let (addr, _) = assign_address(network, "edge-fallback", &taken).unwrap();
		assert_eq!(addr, Ipv4Addr::new(10, 9, 0, 5));
	}

	#[test]
	fn full_network_has_no_assignment() {
		let network = net("10.9.0.0/29");
		let taken: HashSet<Ipv4Addr> = (2..=6).map(|h| Ipv4Addr::new(10, 9, 0, h)).collect();
		assert_eq!(assign_address(network, "edge-full", &taken), None);
	}

	proptest! {
		#[test]
		fn derived_address_is_a_usable_edge_host(
			edge_id in "edge-[A-Za-z0-9_-]{12}",
			index in 0u32..1000,
			prefix in 8u8..=30,
		) {
			let network = Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), prefix).unwrap().trunc();
			let addr = derive_allowed_ip(network, &edge_id, index).unwrap();

			prop_assert!(network.contains(&addr));
			prop_assert_ne!(addr, network.network());
			prop_assert_ne!(addr, network.broadcast());
			prop_assert_ne!(addr, gateway_address(network));
		}

		#[test]
		fn assigned_address_avoids_taken_set(
			edge_id in "edge-[A-Za-z0-9]{12}",
			taken_hosts in proptest::collection::hash_set(2u8..=254, 0..200),
		) {
			let network = Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 24).unwrap();
			let taken: HashSet<Ipv4Addr> = taken_hosts
				.into_iter()
				.map(|h| Ipv4Addr::new(10, 0, 0, h))
				.collect();
			let (addr, _) = assign_address(network, &edge_id, &taken).unwrap();
			prop_assert!(!taken.contains(&addr));
			prop_assert!(network.contains(&addr));
		}
	}
}
