// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Per-class cap on verbose failure logging.
//!
//! Under a sustained outage every attempt fails the same way; only the first
//! few occurrences of each class are worth a full log line.

use crate::models::error::ErrorClass;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// Occurrences per class logged in full
pub const VERBOSE_LOG_LIMIT: u64 = 10;

#[derive(Debug)]
pub struct ErrorLog {
    limit: u64,
    seen: Mutex<HashMap<&'static str, u64>>,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(VERBOSE_LOG_LIMIT)
    }
}

impl ErrorLog {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Count one failed attempt and log it if still under the cap.
    /// Unclassified failures are always logged.
    /// Returns whether a full log line was written.
    pub fn record(&self, class: ErrorClass, url: &str, message: &str, detail: &str) -> bool {
        let occurrence = {
            let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
            let count = seen.entry(class.key()).or_insert(0);
            *count += 1;
            *count
        };

        if class == ErrorClass::Unclassified {
            error!(
                url,
                occurrence,
                "unknown failure in the fetcher: {}\n{}",
                message,
                detail
            );
            return true;
        }

        if occurrence <= self.limit {
            warn!(url, %class, occurrence, "fetch attempt failed: {}\n{}", message, detail);
            if occurrence == self.limit {
                warn!(%class, "further {} failures will not be logged in full", class);
            }
            true
        } else {
            debug!(url, %class, occurrence, "fetch attempt failed: {}", message);
            false
        }
    }

    pub fn occurrences(&self, class: ErrorClass) -> u64 {
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(class.key())
            .copied()
            .unwrap_or(0)
    }
}
