use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use icmpx::{Client, Config, Outcome, SelectionPolicy, SeriesOptions};
use tracing::info;

/// A minimal `ping`-style client over `icmpx`.
#[derive(Parser, Debug)]
#[command(name = "ping", version, about = "Send ICMP echo requests")]
struct Cli {
    /// Address to probe.
    address: String,

    /// Stop after sending COUNT probes.
    #[arg(short = 'c', long = "count")]
    count: Option<u32>,

    /// Packet size in bytes, including the IP header.
    #[arg(short = 's', long = "size")]
    size: Option<usize>,

    /// Socket kind selection policy.
    #[arg(short = 'p', long = "policy", default_value = "raw,dgram")]
    policy: String,

    /// Interval between probes, in milliseconds.
    #[arg(short = 'i', long = "interval")]
    interval_ms: Option<u64>,

    /// Per-probe timeout, in milliseconds.
    #[arg(short = 'W', long = "timeout", default_value_t = 1000)]
    timeout_ms: u64,
}

const MIN_SIZE: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(size) = cli.size {
        if size < MIN_SIZE {
            eprintln!("ping: size must be more than {MIN_SIZE}");
            return ExitCode::FAILURE;
        }
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ping: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let policy = SelectionPolicy::parse(&cli.policy)
        .with_context(|| format!("invalid policy {:?} (expected raw, dgram, raw,dgram, or dgram,raw)", cli.policy))?;

    let mut builder = Config::builder().policy(policy).timeout(Duration::from_millis(cli.timeout_ms));
    if let Some(size) = cli.size {
        builder = builder.size(size);
    }
    let config = builder.build().context("invalid configuration")?;

    info!(address = %cli.address, "starting probe series");
    let client = Client::new(config);
    let options = SeriesOptions {
        size: cli.size,
        interval: cli.interval_ms.map(Duration::from_millis),
        count: cli.count,
    };
    // Address parsing/normalization (InvalidAddress on malformed input) is
    // the library's job, per the ambient-stack error-handling split; the CLI
    // just forwards the raw string and lets `PingError` propagate.
    let mut series = client.series(&cli.address, options).context("failed to start probe series")?;

    let mut sent: u32 = 0;
    let mut received: u32 = 0;

    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            next = series.next() => {
                match next {
                    Some(Ok(outcome)) => {
                        sent += 1;
                        report_outcome(&cli.address, sent, outcome, &mut received);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }
            _ = sigint.recv() => {
                info!("received SIGINT, stopping");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, stopping");
                break;
            }
        }
    }

    print_summary(sent, received);
    Ok(())
}

fn report_outcome(address: &str, seq: u32, outcome: Outcome, received: &mut u32) {
    match outcome {
        Outcome::Rtt(rtt) => {
            *received += 1;
            println!("reply from {address}: seq={seq} time={:.3}ms", rtt.as_secs_f64() * 1000.0);
        }
        Outcome::Lost => {
            println!("no reply from {address}: seq={seq}");
        }
    }
}

fn print_summary(sent: u32, received: u32) {
    let loss_pct = if sent == 0 { 0.0 } else { (sent - received) as f64 / sent as f64 * 100.0 };
    println!("--- ping statistics ---");
    println!("{sent} packets transmitted, {received} received, {loss_pct:.1}% packet loss");
}
