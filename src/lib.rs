// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Network-fetch core of the lala crawler.
//!
//! [`services::fetcher::FetchEngine`] retrieves a URL with bounded retries and
//! classifies every failure; [`services::resolver::ResolverCache`] pre-resolves
//! hosts so DNS trouble is reported separately from connection trouble.

pub mod models;
pub mod services;

/// Crate version, with the CI patch override applied (see `build.rs`).
pub const VERSION: &str = env!("FETCHER_VERSION");
