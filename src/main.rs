use anyhow::Context;
use clap::Parser;
use probe_census::cli::{args::Args, commands};
use std::process;

fn main() {
    // Parse command line arguments
    let args = Args::parse();

    // If no subcommand was provided, show help and available commands
    if args.command.is_none() {
        show_help_and_commands();
        process::exit(0);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        let shutdown_signal = async {
            // Without a signal handler, never resolve and let the command finish
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = commands::run(args) => result,
            _ = shutdown_signal => {
                eprintln!("\nReceived CTRL+C, shutting down...");
                Err(probe_census::Error::processing_interrupted(
                    "Processing interrupted by user",
                ))
            }
        }
    });

    let result = result.context("probe-census failed");
    match result {
        Ok(()) => process::exit(0),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}

/// Show help information and available commands when no subcommand is provided
fn show_help_and_commands() {
    println!("probe-census - NTP and SNMPv3 responder census");
    println!("==============================================");
    println!();
    println!("Scan geolocated address lists for UDP responders with zmap, decode the");
    println!("replies and join them with the address metadata they were scanned from.");
    println!();
    println!("USAGE:");
    println!("    probe-census [OPTIONS] <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("    preprocess    Split raw address lists into per-family whitelists");
    println!("    scan-ips      Scan whitelists and filter the responses");
    println!("    postprocess   Decode filtered responses and merge address metadata");
    println!("    run-all       Run all three stages in sequence");
    println!();
    println!("EXAMPLES:");
    println!("    # Classify, scan and decode in one go:");
    println!("    probe-census run-all ipv4 ntp ./raw_ips");
    println!();
    println!("    # Decode SNMPv3 results of an earlier scan with 10 workers:");
    println!("    probe-census --data-dir data/2024_05_01_12 postprocess ipv4 snmpv3 -j 10");
    println!();
    println!("For detailed help on any command, use:");
    println!("    probe-census <COMMAND> --help");
}
