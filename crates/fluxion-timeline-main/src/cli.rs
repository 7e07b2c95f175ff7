// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use clap::{Parser, Subcommand};
use fluxion_timeline::TabKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fluxion-timeline")]
#[command(about = "Plan-vs-actual timeline of the FluxION battery forecast", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML or JSON). Defaults to the usual search order.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print one tab of a plan as JSON
    Show(ViewArgs),

    /// Keep a session open and print the tab after every refresh until Ctrl-C
    Watch(ViewArgs),

    /// Fetch the active timeline and print its blocks, summary and variances
    Timeline,
}

#[derive(Parser)]
pub struct ViewArgs {
    /// Plan to show (hybrid, autonomy). Without it the planner settings decide.
    #[arg(long)]
    pub plan: Option<String>,

    /// Tab to show
    #[arg(long, default_value = "today", value_parser = parse_tab)]
    pub tab: TabKind,
}

fn parse_tab(value: &str) -> Result<TabKind, String> {
    TabKind::parse(value).ok_or_else(|| {
        format!("unknown tab '{value}' (expected yesterday, today, tomorrow, detail or history)")
    })
}
