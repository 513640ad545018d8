// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::io::stdout;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use common::logging::LogFormat;
use jesd204::LinkId;
use jesd204::LinkSelect;
use slog::error;
use slog::info;
use slog::Logger;
use structopt::StructOpt;

mod board;
mod config;
mod show;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "jesdctl",
    about = "bring up JESD204 links on simulated hardware"
)]
pub(crate) struct Opt {
    #[structopt(
        long,
        help = "send log data to the named file rather than stdout"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<LogFormat>,

    #[structopt(
        long,
        help = "drop log records below this level",
        parse(try_from_str = config::parse_level)
    )]
    log_level: Option<slog::Level>,

    #[structopt(
        long,
        help = "probability of a fault in every simulated operation"
    )]
    chaos: Option<f64>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
pub(crate) enum Command {
    /// Print the ILAS configuration sent on each lane of a board's links.
    Ilas {
        #[structopt(parse(from_os_str))]
        board: PathBuf,
        #[structopt(long, help = "only show this link")]
        link: Option<LinkId>,
    },
    /// Check a board description, and print the rates of its links.
    Check {
        #[structopt(parse(from_os_str))]
        board: PathBuf,
    },
    /// Bring up a board's links on simulated hardware.
    Bringup {
        #[structopt(parse(from_os_str))]
        board: PathBuf,
        #[structopt(
            long,
            use_delimiter = true,
            help = "links to bring up, rather than all of them"
        )]
        links: Vec<LinkId>,
        #[structopt(long, help = "print the results as json")]
        json: bool,
        #[structopt(long, help = "disable the links again once running")]
        stop: bool,
    },
}

fn check(log: &Logger, path: &Path) -> anyhow::Result<()> {
    let board = board::load(path)?;
    show::rates(stdout(), &board)?;
    for link in &board.links {
        link.validate()
            .with_context(|| format!("link {} is misconfigured", link.id))?;
    }
    // Building the topology checks the device graph and every core version.
    board.build(log, Box::new(dal::StdDelay))?;
    info!(log, "board description is valid"; "board" => %path.display());
    Ok(())
}

fn bringup(
    log: &Logger,
    config: &config::Config,
    path: &Path,
    links: &[LinkId],
    json: bool,
    stop: bool,
) -> anyhow::Result<()> {
    let mut board_config = board::load(path)?;
    if let Some(p) = config.chaos {
        board_config.set_chaos(p);
    }
    let mut board = board_config.build(log, Box::new(dal::StdDelay))?;

    let select = if links.is_empty() {
        LinkSelect::All
    } else {
        LinkSelect::only(links.iter().copied())
    };
    let result = board.topology.start(&select);
    if let Err(e) = &result {
        error!(log, "bring-up failed"; "error" => %e);
    }

    let report = show::Report::collect(
        &mut board,
        &select,
        result.as_ref().err().map(|e| e.to_string()),
    )?;
    if json {
        serde_json::to_writer_pretty(stdout(), &report)?;
        println!();
    } else {
        report.write(stdout())?;
    }

    result.context("bringing up links")?;
    if stop {
        board.topology.stop(&select).context("stopping links")?;
        info!(log, "links stopped");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opts = Opt::from_args();
    let config = config::build_config(&opts)?;
    let log = config.logger("jesdctl")?;

    match &opts.cmd {
        Command::Ilas { board, link } => {
            let links = board::load(board)?.initialized_links(&log)?;
            show::ilas(stdout(), &links, *link)
        }
        Command::Check { board } => check(&log, board),
        Command::Bringup {
            board,
            links,
            json,
            stop,
        } => bringup(&log, &config, board, links, *json, *stop),
    }
}
