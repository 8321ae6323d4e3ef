// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

#[async_trait]
/// Time source and sleeping boundary.
/// Makes polling, backoff and pacing deterministic in tests.
pub trait ClockPort: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;

    async fn sleep(&self, duration: Duration);
}
