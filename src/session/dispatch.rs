// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded retry around a vendor call.

use tracing::warn;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::error::VendorError;
use crate::types::{Message, Vendor, VendorReply};

/// A vendor call that failed on every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Exhausted {
    pub attempts: u32,
    /// The error of the final attempt.
    pub error: VendorError,
}

/// Call the vendor up to `attempts` times (at least once), returning the first
/// success. There is no delay between attempts.
pub async fn send(
    vendor: &dyn Vendor,
    messages: &[Message],
    attempts: u32,
) -> Result<VendorReply, Exhausted> {
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match vendor.dispatch(messages).await {
            Ok(reply) => return Ok(reply),
            Err(error) if attempt >= attempts => return Err(Exhausted { attempts, error }),
            Err(error) => {
                warn!(
                    vendor = vendor.name(),
                    attempt,
                    attempts,
                    "Vendor call failed, retrying: {}",
                    error
                );
                #[cfg(feature = "telemetry")]
                GLOBAL_METRICS.record_retry(&operation_name(vendor));
                attempt += 1;
            }
        }
    }
}

/// Metrics key of a vendor's calls, matching what the adapters record.
#[cfg(feature = "telemetry")]
fn operation_name(vendor: &dyn Vendor) -> String {
    let kind = if vendor.is_streaming() { "stream" } else { "chat" };
    format!("{}.{}", vendor.name(), kind)
}
