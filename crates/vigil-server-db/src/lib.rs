// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for the Vigil tunnel gateway.
//!
//! - [`EdgeRepository`]: registered edges and their tunnel addresses
//! - [`CameraStatusRepository`]: per-camera capability snapshots and
//!   training eligibility

pub mod camera;
pub mod edge;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use camera::CameraStatusRepository;
pub use edge::{EdgeRepository, EdgeStore};
pub use error::{DbError, Result};
pub use migrations::run_migrations;
pub use pool::create_pool;
pub use types::{
	CameraCapability, EdgeCameraStatus, EdgeRecord, EdgeStatus, NewEdge, StatusTransition,
	TrainingEligibility,
};
