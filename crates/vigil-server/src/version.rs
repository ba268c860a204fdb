// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build information for vigil-server.

/// Format version info for display.
pub fn format_version_info() -> String {
	format!(
		"vigil-server version: {}\n\
         Platform:             {}-{}",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::OS,
		std::env::consts::ARCH,
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn includes_package_version() {
		assert!(format_version_info().contains(env!("CARGO_PKG_VERSION")));
	}
}
