// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod batch;
pub mod errors;
pub mod ports;
pub mod services;
pub mod session;
pub mod settings;
pub mod status;
pub mod submission;
pub mod types;
pub mod upload_cache;

#[cfg(test)]
pub(crate) mod test_support;
