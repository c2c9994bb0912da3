// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared unit test support.

use tracing_subscriber::EnvFilter;

/// Routes `tracing` output to the test harness's captured output. Safe to
/// call from every test.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace")),
        )
        .with_test_writer()
        .try_init();
}
