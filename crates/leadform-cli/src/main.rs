//! `leadform` CLI: submit a lead to the collector and follow the redirect.
//!
//! Hosts the lead pipeline outside a browser: the process start is the page
//! load (configuration is read and the address lookup starts), the `submit`
//! command is the visitor pressing the button, and the process exit after
//! the redirect is the page unload.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod host;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leadform_core::config::{CollectorConfig, FallbackEncoding};
use leadform_core::enricher::{AddressLookup, HttpAddressLookup};

use crate::host::SubmitRequest;

// ── ANSI color helpers ───────────────────────────────────────────────

pub(crate) const RESET: &str = "\x1b[0m";
pub(crate) const BOLD: &str = "\x1b[1m";
pub(crate) const DIM: &str = "\x1b[2m";
pub(crate) const RED: &str = "\x1b[31m";
pub(crate) const GREEN: &str = "\x1b[32m";
pub(crate) const YELLOW: &str = "\x1b[33m";
pub(crate) const CYAN: &str = "\x1b[36m";

pub(crate) fn success(msg: &str) {
    println!("  {GREEN}✓{RESET} {msg}");
}

pub(crate) fn warning(msg: &str) {
    println!("  {YELLOW}!{RESET} {msg}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<22}{RESET} {value}");
}

// ── CLI structure ────────────────────────────────────────────────────

/// leadform: submit leads to a collector endpoint.
#[derive(Parser)]
#[command(
    name = "leadform",
    version,
    about = "leadform CLI: submit a lead to the collector endpoint and follow the redirect",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         LEADFORM_COLLECTOR_URL   Collector endpoint (required)\n  \
         LEADFORM_REDIRECT_URL    Post-submit redirect target\n  \
         LEADFORM_LOOKUP_URL      IP-echo service\n  \
         LEADFORM_LOG_LEVEL       Log filter (default: info)\n\n\
         {DIM}Examples:{RESET}\n  \
         leadform doctor\n  \
         leadform lookup\n  \
         leadform submit --name Amal --email amal@example.com"
    ),
)]
struct Cli {
    /// Emit logs as JSON.
    #[arg(long, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit one lead and wait for the redirect.
    Submit {
        /// Prospect name.
        #[arg(long, default_value = "")]
        name: String,
        /// Prospect email.
        #[arg(long, default_value = "")]
        email: String,
        /// Prospect phone (optional).
        #[arg(long, default_value = "")]
        phone: String,
        /// Give the address lookup this many milliseconds to finish before
        /// submitting (default: submit immediately).
        #[arg(long)]
        wait_for_address: Option<u64>,
    },
    /// Resolve the public client address once.
    Lookup,
    /// Validate configuration and print the effective settings.
    Doctor,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = CollectorConfig::from_env().context("invalid configuration")?;
    init_tracing(&config, cli.json_logs);

    match cli.command {
        Commands::Submit {
            name,
            email,
            phone,
            wait_for_address,
        } => {
            let request = SubmitRequest {
                name,
                email,
                phone,
                wait_for_address: wait_for_address.map(std::time::Duration::from_millis),
            };
            host::run_submit(&config, request).await
        }
        Commands::Lookup => cmd_lookup(&config).await,
        Commands::Doctor => {
            cmd_doctor(&config);
            Ok(())
        }
    }
}

fn init_tracing(config: &CollectorConfig, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn cmd_lookup(config: &CollectorConfig) -> Result<()> {
    let lookup = HttpAddressLookup::new(config).context("failed to build HTTP client")?;

    println!();
    match lookup.lookup().await {
        Ok(ip) => success(&format!("client address: {BOLD}{ip}{RESET}")),
        Err(e) => {
            warning("client address unavailable, leads will carry an empty ip");
            println!("    {DIM}{e}{RESET}");
        }
    }
    println!();
    Ok(())
}

fn cmd_doctor(config: &CollectorConfig) {
    println!();
    println!("  {CYAN}{BOLD}leadform configuration{RESET}");
    println!();
    kv_line("collector", config.collector_url.as_str());
    kv_line("redirect", config.redirect_url.as_str());
    kv_line("address lookup", config.lookup_url.as_str());
    kv_line(
        "settle delay",
        &format!("{}ms", config.settle_delay.as_millis()),
    );
    kv_line(
        "in-flight delay",
        &format!("{}ms", config.in_flight_delay.as_millis()),
    );
    kv_line(
        "fallback encoding",
        match config.fallback_encoding {
            FallbackEncoding::UrlEncoded => "urlencoded",
            FallbackEncoding::Multipart => "multipart",
        },
    );
    kv_line("beacon capacity", &config.beacon_capacity.to_string());
    kv_line(
        "request timeout",
        &format!("{}ms", config.request_timeout.as_millis()),
    );
    kv_line(
        "required fields",
        if config.require_phone {
            "name, email, phone"
        } else {
            "name, email"
        },
    );
    println!();
    success("configuration OK");
    println!();
}
