// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

pub mod error_log;
pub mod fetcher;
pub mod hickory;
pub mod logging;
pub mod policy;
pub mod resolver;
pub mod stats;
