// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod control_file;
pub mod listing;
pub mod remote_path;
pub mod retry;
pub mod sacct;
pub mod shell;
