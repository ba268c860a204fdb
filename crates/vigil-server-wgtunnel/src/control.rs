// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host-side control of the WireGuard interface.
//!
//! `WgCommandControl` drives a kernel interface through `ip` and `wg`.
//! `MemoryControl` keeps the same state in process memory for development
//! and tests.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ipnet::IpNet;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};
use vigil_common_secret::SecretString;
use vigil_wgtunnel_common::{WgPrivateKey, WgPublicKey};

use crate::error::{Result, TunnelError};

/// A peer as it should be configured on the interface.
#[derive(Debug, Clone)]
pub struct PeerConfig {
	pub public_key: WgPublicKey,
	pub allowed_ips: Vec<IpNet>,
	pub preshared_key: Option<SecretString>,
}

impl PeerConfig {
	pub fn new(public_key: WgPublicKey, allowed_ips: Vec<IpNet>) -> Self {
		Self {
			public_key,
			allowed_ips,
			preshared_key: None,
		}
	}
}

/// Per-peer counters as reported by the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStats {
	pub public_key: WgPublicKey,
	pub endpoint: Option<String>,
	pub allowed_ips: Vec<IpNet>,
	/// `None` until the first handshake completes.
	pub last_handshake: Option<DateTime<Utc>>,
	pub rx_bytes: u64,
	pub tx_bytes: u64,
}

#[async_trait]
pub trait TunnelControl: Send + Sync {
	async fn interface_exists(&self) -> Result<bool>;

	/// Create the interface. An interface that already exists is success.
	async fn create_interface(&self) -> Result<()>;

	async fn configure_device(&self, private_key: &WgPrivateKey, listen_port: u16) -> Result<()>;

	/// The private key currently set on the interface, if any.
	async fn device_private_key(&self) -> Result<Option<WgPrivateKey>>;

	/// Assign an address. An address that is already assigned is success.
	async fn assign_address(&self, address: IpNet) -> Result<()>;

	async fn set_link_up(&self) -> Result<()>;

	async fn add_peer(&self, peer: &PeerConfig) -> Result<()>;

	async fn remove_peer(&self, public_key: &WgPublicKey) -> Result<()>;

	async fn peer_stats(&self) -> Result<Vec<PeerStats>>;
}

const ALREADY_EXISTS: &[&str] = &["File exists"];
const ALREADY_ASSIGNED: &[&str] = &["File exists", "already assigned"];

/// Drives a kernel WireGuard interface with `ip` and `wg`.
pub struct WgCommandControl {
	interface: String,
	timeout: Duration,
}

impl WgCommandControl {
	pub fn new(interface: impl Into<String>, timeout: Duration) -> Self {
		Self {
			interface: interface.into(),
			timeout,
		}
	}

	/// Run a command and return its stdout. Secrets are only ever passed on
	/// stdin so they never show up in the process table or in errors.
	async fn run(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<String> {
		let command_line = format!("{program} {}", args.join(" "));
		let mut cmd = Command::new(program);
		cmd.args(args)
			.stdin(if stdin.is_some() {
				Stdio::piped()
			} else {
				Stdio::null()
			})
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let spawn_error = |e: std::io::Error| TunnelError::Command {
			command: command_line.clone(),
			stderr: e.to_string(),
		};

		let execution = async {
			let mut child = cmd.spawn().map_err(spawn_error)?;
			if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
				pipe.write_all(input.as_bytes()).await.map_err(spawn_error)?;
				pipe.shutdown().await.map_err(spawn_error)?;
			}
			child.wait_with_output().await.map_err(spawn_error)
		};

		let output = tokio::time::timeout(self.timeout, execution)
			.await
			.map_err(|_| TunnelError::CommandTimeout {
				command: command_line.clone(),
				timeout: self.timeout,
			})??;

		if output.status.success() {
			debug!(command = %command_line, "command succeeded");
			return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
		}

		let mut combined = String::from_utf8_lossy(&output.stderr).trim().to_string();
		let stdout = String::from_utf8_lossy(&output.stdout);
		if !stdout.trim().is_empty() {
			combined.push(' ');
			combined.push_str(stdout.trim());
		}
		Err(TunnelError::Command {
			command: command_line,
			stderr: combined,
		})
	}

	async fn run_tolerating(&self, program: &str, args: &[&str], tolerated: &[&str]) -> Result<()> {
		match self.run(program, args, None).await {
			Ok(_) => Ok(()),
			Err(TunnelError::Command { command, stderr })
				if tolerated.iter().any(|t| stderr.contains(t)) =>
			{
				debug!(%command, %stderr, "tolerating command failure");
				Ok(())
			}
			Err(e) => Err(e),
		}
	}
}

#[async_trait]
impl TunnelControl for WgCommandControl {
	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn interface_exists(&self) -> Result<bool> {
		match self
			.run("ip", &["link", "show", "dev", &self.interface], None)
			.await
		{
			Ok(_) => Ok(true),
			Err(TunnelError::Command { stderr, .. }) if stderr.contains("does not exist") => Ok(false),
			Err(e) => Err(e),
		}
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn create_interface(&self) -> Result<()> {
		self.run_tolerating(
			"ip",
			&["link", "add", "dev", &self.interface, "type", "wireguard"],
			ALREADY_EXISTS,
		)
		.await
	}

	#[instrument(skip(self, private_key), fields(interface = %self.interface))]
	async fn configure_device(&self, private_key: &WgPrivateKey, listen_port: u16) -> Result<()> {
		let port = listen_port.to_string();
		let encoded = private_key.to_base64();
		self.run(
			"wg",
			&[
				"set",
				&self.interface,
				"private-key",
				"/dev/stdin",
				"listen-port",
				&port,
			],
			Some(encoded.expose()),
		)
		.await
		.map(|_| ())
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn device_private_key(&self) -> Result<Option<WgPrivateKey>> {
		let output = self
			.run("wg", &["show", &self.interface, "private-key"], None)
			.await?;
		parse_device_private_key(&output)
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn assign_address(&self, address: IpNet) -> Result<()> {
		let address = address.to_string();
		self.run_tolerating(
			"ip",
			&["addr", "add", &address, "dev", &self.interface],
			ALREADY_ASSIGNED,
		)
		.await
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn set_link_up(&self) -> Result<()> {
		self.run("ip", &["link", "set", "up", "dev", &self.interface], None)
			.await
			.map(|_| ())
	}

	#[instrument(skip(self, peer), fields(interface = %self.interface, public_key = %peer.public_key))]
	async fn add_peer(&self, peer: &PeerConfig) -> Result<()> {
		let key = peer.public_key.to_base64();
		let allowed = peer
			.allowed_ips
			.iter()
			.map(ToString::to_string)
			.collect::<Vec<_>>()
			.join(",");

		let mut args = vec!["set", self.interface.as_str(), "peer", key.as_str()];
		if !allowed.is_empty() {
			args.extend(["allowed-ips", allowed.as_str()]);
		}
		if peer.preshared_key.is_some() {
			args.extend(["preshared-key", "/dev/stdin"]);
		}

		self.run(
			"wg",
			&args,
			peer.preshared_key.as_ref().map(|psk| psk.expose().as_str()),
		)
		.await
		.map(|_| ())
	}

	#[instrument(skip(self), fields(interface = %self.interface, %public_key))]
	async fn remove_peer(&self, public_key: &WgPublicKey) -> Result<()> {
		let key = public_key.to_base64();
		self.run("wg", &["set", &self.interface, "peer", &key, "remove"], None)
			.await
			.map(|_| ())
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn peer_stats(&self) -> Result<Vec<PeerStats>> {
		let dump = self.run("wg", &["show", &self.interface, "dump"], None).await?;
		parse_wg_dump(&dump)
	}
}

/// Parse `wg show <iface> private-key`, which prints `(none)` for an
/// interface that has no key yet.
pub fn parse_device_private_key(output: &str) -> Result<Option<WgPrivateKey>> {
	match output.trim() {
		"" | "(none)" => Ok(None),
		encoded => Ok(Some(WgPrivateKey::from_base64(encoded)?)),
	}
}

/// Parse `wg show <iface> dump`.
///
/// The first line describes the interface itself (and carries its private
/// key); every following line is one tab-separated peer:
/// `public-key preshared-key endpoint allowed-ips latest-handshake rx tx keepalive`.
pub fn parse_wg_dump(dump: &str) -> Result<Vec<PeerStats>> {
	let malformed = |line: usize, what: &str| {
		TunnelError::Internal(format!("malformed wg dump line {line}: {what}"))
	};

	dump.lines()
		.enumerate()
		.skip(1)
		.filter(|(_, line)| !line.trim().is_empty())
		.map(|(index, line)| {
			let line_no = index + 1;
			let fields: Vec<&str> = line.split('\t').collect();
			if fields.len() < 8 {
				return Err(malformed(line_no, "expected 8 fields"));
			}

			let public_key = WgPublicKey::from_base64(fields[0])?;
			let endpoint = match fields[2] {
				"(none)" | "" => None,
				endpoint => Some(endpoint.to_string()),
			};
			let allowed_ips = match fields[3] {
				"(none)" | "" => Vec::new(),
				list => list
					.split(',')
					.map(|net| net.trim().parse::<IpNet>())
					.collect::<std::result::Result<_, _>>()
					.map_err(|_| malformed(line_no, "allowed-ips"))?,
			};
			let handshake: i64 = fields[4]
				.parse()
				.map_err(|_| malformed(line_no, "latest-handshake"))?;
			let last_handshake = if handshake == 0 {
				None
			} else {
				Utc.timestamp_opt(handshake, 0).single()
			};

			Ok(PeerStats {
				public_key,
				endpoint,
				allowed_ips,
				last_handshake,
				rx_bytes: fields[5].parse().map_err(|_| malformed(line_no, "transfer-rx"))?,
				tx_bytes: fields[6].parse().map_err(|_| malformed(line_no, "transfer-tx"))?,
			})
		})
		.collect()
}

#[derive(Debug, Default)]
struct MemoryState {
	exists: bool,
	up: bool,
	private_key: Option<WgPrivateKey>,
	listen_port: Option<u16>,
	addresses: Vec<IpNet>,
	peers: BTreeMap<WgPublicKey, PeerStats>,
	fail_peer_additions: bool,
}

/// In-process interface used by the `memory` backend.
#[derive(Debug, Default)]
pub struct MemoryControl {
	state: Mutex<MemoryState>,
}

impl MemoryControl {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make every subsequent `add_peer` fail until turned off again.
	pub fn fail_peer_additions(&self, fail: bool) {
		self.state.lock().fail_peer_additions = fail;
	}

	/// Pretend the peer completed a handshake at `at`.
	pub fn set_handshake(&self, public_key: &WgPublicKey, at: Option<DateTime<Utc>>) {
		if let Some(peer) = self.state.lock().peers.get_mut(public_key) {
			peer.last_handshake = at;
		}
	}

	pub fn set_transfer(&self, public_key: &WgPublicKey, rx_bytes: u64, tx_bytes: u64) {
		if let Some(peer) = self.state.lock().peers.get_mut(public_key) {
			peer.rx_bytes = rx_bytes;
			peer.tx_bytes = tx_bytes;
		}
	}

	pub fn peer_keys(&self) -> Vec<WgPublicKey> {
		self.state.lock().peers.keys().copied().collect()
	}

	pub fn allowed_ips(&self, public_key: &WgPublicKey) -> Option<Vec<IpNet>> {
		self.state
			.lock()
			.peers
			.get(public_key)
			.map(|p| p.allowed_ips.clone())
	}

	pub fn is_up(&self) -> bool {
		self.state.lock().up
	}

	pub fn addresses(&self) -> Vec<IpNet> {
		self.state.lock().addresses.clone()
	}

	pub fn configured_key(&self) -> Option<(WgPublicKey, u16)> {
		let state = self.state.lock();
		state
			.private_key
			.as_ref()
			.map(WgPrivateKey::public_key)
			.zip(state.listen_port)
	}
}

#[async_trait]
impl TunnelControl for MemoryControl {
	async fn interface_exists(&self) -> Result<bool> {
		Ok(self.state.lock().exists)
	}

	async fn create_interface(&self) -> Result<()> {
		self.state.lock().exists = true;
		Ok(())
	}

	async fn configure_device(&self, private_key: &WgPrivateKey, listen_port: u16) -> Result<()> {
		let mut state = self.state.lock();
		state.private_key = Some(private_key.clone());
		state.listen_port = Some(listen_port);
		Ok(())
	}

	async fn device_private_key(&self) -> Result<Option<WgPrivateKey>> {
		Ok(self.state.lock().private_key.clone())
	}

	async fn assign_address(&self, address: IpNet) -> Result<()> {
		let mut state = self.state.lock();
		if !state.addresses.contains(&address) {
			state.addresses.push(address);
		}
		Ok(())
	}

	async fn set_link_up(&self) -> Result<()> {
		self.state.lock().up = true;
		Ok(())
	}

	async fn add_peer(&self, peer: &PeerConfig) -> Result<()> {
		let mut state = self.state.lock();
		if state.fail_peer_additions {
			return Err(TunnelError::Command {
				command: format!("wg set peer {}", peer.public_key),
				stderr: "simulated failure".to_string(),
			});
		}
		let entry = state.peers.entry(peer.public_key).or_insert(PeerStats {
			public_key: peer.public_key,
			endpoint: None,
			allowed_ips: Vec::new(),
			last_handshake: None,
			rx_bytes: 0,
			tx_bytes: 0,
		});
		entry.allowed_ips = peer.allowed_ips.clone();
		Ok(())
	}

	async fn remove_peer(&self, public_key: &WgPublicKey) -> Result<()> {
		self.state.lock().peers.remove(public_key);
		Ok(())
	}

	async fn peer_stats(&self) -> Result<Vec<PeerStats>> {
		Ok(self.state.lock().peers.values().cloned().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use vigil_wgtunnel_common::WgKeyPair;

	fn key() -> WgPublicKey {
		*WgKeyPair::generate().public_key()
	}

	#[test]
	fn dump_skips_interface_line_and_parses_peers() {
		let a = key();
		let b = key();
		let dump = format!(
			"PRIVATE\tPUBLIC\t51820\toff\n\
			 {a}\t(none)\t203.0.113.7:41000\t10.0.0.17/32\t1700000000\t1024\t2048\t25\n\
			 {b}\t(none)\t(none)\t10.0.0.18/32,10.0.1.0/24\t0\t0\t0\toff\n"
		);

		let peers = parse_wg_dump(&dump).unwrap();
		assert_eq!(peers.len(), 2);

		assert_eq!(peers[0].public_key, a);
		assert_eq!(peers[0].endpoint.as_deref(), Some("203.0.113.7:41000"));
		assert_eq!(
			peers[0].last_handshake.map(|t| t.timestamp()),
			Some(1_700_000_000)
		);
		assert_eq!((peers[0].rx_bytes, peers[0].tx_bytes), (1024, 2048));

		assert_eq!(peers[1].endpoint, None);
		assert_eq!(peers[1].last_handshake, None);
		assert_eq!(peers[1].allowed_ips.len(), 2);
	}

	#[test]
	fn dump_with_only_interface_line_has_no_peers() {
		assert!(parse_wg_dump("PRIVATE\tPUBLIC\t51820\toff\n").unwrap().is_empty());
		assert!(parse_wg_dump("").unwrap().is_empty());
	}

	#[test]
	fn device_private_key_output_is_parsed() {
		let keypair = WgKeyPair::generate();
		let encoded = keypair.private_key().to_base64();
		let parsed = parse_device_private_key(&format!("{}\n", encoded.expose()))
			.unwrap()
			.unwrap();
		assert_eq!(&parsed.public_key(), keypair.public_key());

		assert!(parse_device_private_key("(none)\n").unwrap().is_none());
		assert!(parse_device_private_key("not-a-key").is_err());
	}

	#[test]
	fn truncated_peer_line_is_rejected() {
		let dump = format!("iface\nfoo\n{}\t(none)\n", key());
		assert!(parse_wg_dump(&dump).is_err());
	}

	proptest! {
		#[test]
		fn dump_counters_survive_parsing(rx in any::<u64>(), tx in any::<u64>(), hs in 1i64..4_000_000_000) {
			let k = key();
			let dump = format!("iface\n{k}\t(none)\t(none)\t10.0.0.2/32\t{hs}\t{rx}\t{tx}\toff\n");
			let peers = parse_wg_dump(&dump).unwrap();
			prop_assert_eq!(peers[0].rx_bytes, rx);
			prop_assert_eq!(peers[0].tx_bytes, tx);
			prop_assert_eq!(peers[0].last_handshake.map(|t| t.timestamp()), Some(hs));
		}
	}

	#[tokio::test]
	async fn memory_control_tracks_peers_and_failures() {
		let control = MemoryControl::new();
		assert!(!control.interface_exists().await.unwrap());
		control.create_interface().await.unwrap();
		control.create_interface().await.unwrap();
		assert!(control.interface_exists().await.unwrap());

		let k = key();
		let net: IpNet = "10.0.0.5/32".parse().unwrap();
		control.add_peer(&PeerConfig::new(k, vec![net])).await.unwrap();
		assert_eq!(control.peer_keys(), vec![k]);

		control.fail_peer_additions(true);
		assert!(control.add_peer(&PeerConfig::new(key(), vec![])).await.is_err());
		assert_eq!(control.peer_keys().len(), 1);

		control.remove_peer(&k).await.unwrap();
		assert!(control.peer_stats().await.unwrap().is_empty());
	}
}
