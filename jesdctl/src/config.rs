// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use anyhow::bail;
use common::logging::LogFormat;
use slog::o;
use slog::Drain;
use slog::Level;
use slog::Logger;

/// The tunable settings for a `jesdctl` run.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Config {
    pub log_file: Option<String>,
    pub log_format: LogFormat,
    pub log_level: Level,
    /// Probability of a fault in every simulated operation.
    pub chaos: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Human,
            log_level: Level::Info,
            chaos: None,
        }
    }
}

impl Config {
    /// Build the root logger, dropping records below the configured level.
    pub fn logger(&self, name: &'static str) -> anyhow::Result<Logger> {
        let log = common::logging::init(name, &self.log_file, self.log_format)?;
        let drain = slog::LevelFilter::new(log, self.log_level).fuse();
        Ok(Logger::root(drain, o!()))
    }
}

/// Parse a log level, accepting either the full name or slog's short form.
pub(crate) fn parse_level(s: &str) -> Result<Level, String> {
    s.parse::<Level>()
        .map_err(|_| format!("'{s}' is not a valid log level"))
}

fn update_from_cli(opts: &crate::Opt, config: &mut Config) {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    if let Some(level) = opts.log_level {
        config.log_level = level;
    }

    if let Some(chaos) = opts.chaos {
        config.chaos = Some(chaos);
    }
}

/// Start from the defaults and apply whatever was given on the command line.
pub(crate) fn build_config(opts: &crate::Opt) -> anyhow::Result<Config> {
    let mut config = Config::default();
    update_from_cli(opts, &mut config);

    if let Some(p) = config.chaos {
        if !(0.0..=1.0).contains(&p) {
            bail!("chaos probability {p} is outside of [0, 1]");
        }
    }
    Ok(config)
}
