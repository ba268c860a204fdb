// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared WireGuard primitives for the Vigil tunnel gateway.

pub mod keys;
pub mod keys_file;
pub mod wg_config;

pub use keys::{KeyError, WgKeyPair, WgPrivateKey, WgPublicKey};
pub use keys_file::{
	load_key_pair_files, load_private_key_file, load_public_key_file, save_key_pair_files,
	KeyFileError,
};
pub use wg_config::{WgConfigError, WgQuickConfig, WgQuickInterface, WgQuickPeer};
