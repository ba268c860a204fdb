// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

/// Create a SqlitePool with WAL mode and foreign keys enforced.
///
/// `acquire_timeout` bounds how long a caller waits for a connection, so a
/// wedged writer cannot stall request handlers indefinitely.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(
	database_url: &str,
	max_connections: u32,
	acquire_timeout: Duration,
) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.foreign_keys(true)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(max_connections)
		.acquire_timeout(acquire_timeout)
		.connect_with(options)
		.await?;

	tracing::debug!("database pool created");
	Ok(pool)
}
