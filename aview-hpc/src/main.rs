// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use aview_hpc::adapters::cli;
use aview_hpc::{commands, config, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli::ParsedOpts {
        opts,
        verbose_override,
    } = cli::parse_opts();

    let config::LoadResult { config, report } =
        config::load_with_report(opts.config.clone(), opts.overrides(verbose_override))?;
    logging::init(config.verbose);
    report.log();

    commands::run(opts, config, report).await
}
