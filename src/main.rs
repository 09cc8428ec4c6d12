//! depositd CLI
//!
//! Runs the deposit pipeline scheduler or a single cycle, and exposes the
//! operator actions (wallet lookup, cancellation, deactivation, stats).

use clap::{Parser, Subcommand};
use depositd::types::{format_amount, Network};
use depositd::{DepositTrackerService, DepositdConfig, DepositdError};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "depositd")]
#[command(about = "Custodial USDT deposit pipeline for Ethereum, BSC and TRON")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scan / confirm / sweep scheduler until ctrl-c
    Run,

    /// Run one scan cycle on every network
    Scan,

    /// Run one confirmation pass
    Confirm,

    /// Run one sweep cycle
    Sweep,

    /// Show (or create) a user's deposit wallet
    Wallet {
        /// User identifier
        user_id: String,
    },

    /// Print the addresses for a derivation index
    Derive {
        index: u32,
    },

    /// Cancel a CONFIRMING deposit order
    Cancel {
        order_no: String,

        /// Reason recorded on the order
        #[arg(short, long, default_value = "cancelled by operator")]
        reason: String,
    },

    /// Show pipeline statistics
    Stats,

    /// Stop watching a deposit address
    Deactivate {
        /// eth | bsc | tron
        network: Network,
        address: String,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match DepositdConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(2);
        }
    };

    if let Err(e) = depositd::logging::init_from_config(&config) {
        eprintln!("Warning: {}", e);
    }

    if let Err(e) = run(cli.command, config).await {
        eprintln!("[{}] {}", e.error_code(), e);
        process::exit(1);
    }
}

async fn run(command: Commands, config: DepositdConfig) -> Result<(), DepositdError> {
    if matches!(command, Commands::Run) {
        config.print_summary();
    }
    let service = DepositTrackerService::from_config(config)?;

    match command {
        Commands::Run => {
            Arc::new(service).run().await?;
        }
        Commands::Scan => {
            let created = service.process_new_deposits().await?;
            println!("New deposit orders: {}", created);
        }
        Commands::Confirm => {
            let completed = service.confirm_pending_deposits().await?;
            println!("Completed deposit orders: {}", completed);
        }
        Commands::Sweep => {
            let reports = service.sweep_all().await?;
            let currency = &service.config().currency;
            for (network, network_reports) in &reports {
                println!("[{}] {} address(es)", network, network_reports.len());
                for report in network_reports {
                    match (&report.tx_hash, &report.error) {
                        (Some(tx_hash), _) => println!(
                            "  {} {} -> {}",
                            report.address,
                            format_amount(report.amount, currency),
                            tx_hash
                        ),
                        (None, Some(error)) => println!("  {} skipped: {}", report.address, error),
                        (None, None) => println!("  {} no result", report.address),
                    }
                }
            }
        }
        Commands::Wallet { user_id } => {
            let wallet = service.get_or_create_wallet(&user_id).await?;
            println!("User: {}", wallet.user_id);
            println!("Derivation index: {}", wallet.derivation_index);
            for address in &wallet.addresses {
                println!(
                    "  {:<5} {:<44} received={} swept={} {}",
                    address.network,
                    address.address,
                    address.total_received,
                    address.total_swept,
                    if address.is_active { "" } else { "(inactive)" }
                );
            }
            let balance = service.get_balance(&user_id).await?;
            println!("Available: {}  Frozen: {}", balance.available, balance.frozen);
        }
        Commands::Derive { index } => {
            for derived in service.derive_all_addresses(index)? {
                println!("{:<5} {:<44} {}", derived.network, derived.address, derived.derivation_path);
            }
        }
        Commands::Cancel { order_no, reason } => {
            let order = service.cancel_order(&order_no, &reason).await?;
            println!("Order {} is now {}", order.order_no, order.status);
        }
        Commands::Stats => {
            let stats = service.stats().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).map_err(|e| DepositdError::validation(e.to_string()))?
            );
        }
        Commands::Deactivate { network, address } => {
            if service.deactivate_address(network, &address).await? {
                println!("Deactivated {} address {}", network, address);
            } else {
                println!("{} address {} is not active", network, address);
            }
        }
    }

    Ok(())
}
