//! ipscout - extract IPv4 addresses from text and enrich them with GeoIP
//! and RDAP registry data.
//!
//! This is the command-line interface for the ipscout library.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::Parser;
use ipscout::{
    AddressSet, EnrichConfig, Enricher, HttpLookupClient, LookupCache, LookupKind, LookupRecord,
    ResultMap,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Get the version string for ipscout
fn get_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(env!("CARGO_PKG_VERSION"), "-UNRELEASED")
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Command-line arguments for the enrichment tool.
#[derive(Parser, Debug)]
#[clap(author, version, about = "Extract IPv4 addresses from text and enrich them with GeoIP and RDAP data", long_about = None)]
struct Args {
    /// Text file to scan for IPv4 addresses
    file: PathBuf,

    /// Retrieve GeoIP information for the extracted addresses
    #[clap(short = 'g', long)]
    geo: bool,

    /// Retrieve RDAP registry information for the extracted addresses
    #[clap(short = 'r', long)]
    rdap: bool,

    /// Run an interactive command shell instead of a one-shot batch
    #[clap(short = 'i', long)]
    interactive: bool,

    /// Maximum number of addresses to process per run
    #[clap(short = 'q', long = "max-ips")]
    max_ips: Option<usize>,

    /// Clear the cache(s) for the selected kinds before running
    #[clap(long)]
    force: bool,

    /// Directory holding the per-kind cache files
    #[clap(long, default_value = ".")]
    cache_dir: PathBuf,

    /// Maximum number of lookups in flight at once (default: CPU count)
    #[clap(long)]
    concurrency: Option<usize>,

    /// Retries per address after a transient failure
    #[clap(long, default_value_t = 3)]
    retries: u32,

    /// Output results as a single JSON document
    #[clap(long)]
    json: bool,

    /// Enable verbose output (-v for info, -vv for debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// JSON output structure for a full batch run
#[derive(Debug, serde::Serialize)]
struct JsonOutput {
    version: String,
    file: String,
    addresses_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    geoip: Option<BTreeMap<String, LookupRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rdap: Option<BTreeMap<String, LookupRecord>>,
}

fn main() {
    // Quick check for help/version before starting the async runtime
    let raw_args: Vec<String> = std::env::args().collect();
    if raw_args.len() == 2 && (raw_args[1] == "--version" || raw_args[1] == "-V") {
        println!("ipscout {}", get_version());
        return;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    if let Err(e) = runtime.block_on(async_main()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "ipscout=info",
        _ => "ipscout=debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn selected_kinds(args: &Args) -> Vec<LookupKind> {
    let mut kinds = Vec::new();
    if args.geo {
        kinds.push(LookupKind::Geo);
    }
    if args.rdap {
        kinds.push(LookupKind::Rdap);
    }
    kinds
}

fn build_enricher(args: &Args, force: bool) -> Result<Enricher> {
    let mut builder = EnrichConfig::builder()
        .max_retries(args.retries)
        .force_refresh(force);
    if let Some(concurrency) = args.concurrency {
        builder = builder.concurrency(concurrency);
    }
    if let Some(max) = args.max_ips {
        builder = builder.max_addresses(max);
    }
    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("invalid options: {e}"))?;

    let client = Arc::new(HttpLookupClient::new()?);
    Ok(Enricher::new(client, config)?)
}

/// Sorted view of a result mapping, for stable printed output
fn sorted(results: ResultMap) -> BTreeMap<String, LookupRecord> {
    results
        .into_iter()
        .map(|(addr, record)| (addr.to_string(), record))
        .collect()
}

async fn async_main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    if args.interactive {
        return run_interactive(&args, &text).await;
    }

    let addresses = AddressSet::from_text(&text);
    if !args.json {
        println!(
            "{} unique addresses found in {}",
            addresses.len(),
            args.file.display()
        );
    }

    let kinds = selected_kinds(&args);
    if addresses.is_empty() || kinds.is_empty() {
        if args.json {
            let output = JsonOutput {
                version: get_version().to_string(),
                file: args.file.display().to_string(),
                addresses_found: addresses.len(),
                geoip: None,
                rdap: None,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        return Ok(());
    }

    let enricher = build_enricher(&args, args.force)?;
    let mut output = JsonOutput {
        version: get_version().to_string(),
        file: args.file.display().to_string(),
        addresses_found: addresses.len(),
        geoip: None,
        rdap: None,
    };

    for kind in kinds {
        let cache = LookupCache::for_kind(&args.cache_dir, kind)?;
        let results = enricher.run(&addresses, kind, &cache).await?;
        let results = sorted(results);

        if args.json {
            match kind {
                LookupKind::Geo => output.geoip = Some(results),
                LookupKind::Rdap => output.rdap = Some(results),
            }
        } else {
            print_banner(kind, &results)?;
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

fn print_banner(kind: LookupKind, results: &BTreeMap<String, LookupRecord>) -> Result<()> {
    match kind {
        LookupKind::Geo => println!("**** GEO IP INFORMATION ****"),
        LookupKind::Rdap => println!("**** RDAP INFORMATION ****"),
    }
    println!("{}", serde_json::to_string_pretty(results)?);
    println!();
    Ok(())
}

fn print_interactive_help() {
    println!();
    println!("Available commands:");
    println!("    e or extract:  Extract, count, and show the addresses in the file.");
    println!("    g or geoip  :  Run GeoIP lookups for the extracted addresses.");
    println!("    r or rdap   :  Run RDAP lookups for the extracted addresses.");
    println!("    h or help   :  Show this help.");
    println!("    q or quit   :  Exit.");
    println!();
}

async fn run_interactive(args: &Args, text: &str) -> Result<()> {
    // Force refresh is a batch-mode override; a shell session re-clearing
    // the cache on every lookup command would defeat it.
    let enricher = build_enricher(args, false)?;
    let mut addresses: Option<AddressSet> = None;

    loop {
        print!("Input a command: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            return Ok(()); // EOF
        }

        match line.trim() {
            "q" | "quit" => return Ok(()),
            "h" | "help" => print_interactive_help(),
            "e" | "extract" => {
                let set = addresses.get_or_insert_with(|| AddressSet::from_text(text));
                println!("{} addresses were found in the file:", set.len());
                for addr in set.iter() {
                    println!("    {addr}");
                }
            }
            "g" | "geoip" | "r" | "rdap" => {
                let Some(set) = addresses.as_ref() else {
                    println!("Nothing extracted yet; run 'extract' first.");
                    continue;
                };
                let kind = if line.trim().starts_with('g') {
                    LookupKind::Geo
                } else {
                    LookupKind::Rdap
                };
                println!("Performing {kind} lookups for the extracted addresses");
                let cache = LookupCache::for_kind(&args.cache_dir, kind)?;
                match enricher.run(set, kind, &cache).await {
                    Ok(results) => print_banner(kind, &sorted(results))?,
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            "" => {}
            other => println!("Unknown command {other:?}; try 'help'."),
        }
    }
}
