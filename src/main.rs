// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, ops::RangeInclusive, path::PathBuf, str::FromStr, sync::Arc};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bridge_witness::{
    api::router,
    config::{Configuration, LOG_FORMAT_ENV},
    error::{WitnessError, WitnessResult},
    state::AppState,
    storage::open_database,
    witness::{build_service, Service},
};

/// Cross-chain bridge witness.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Main configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Secret configuration file layered over the main one
    #[arg(long)]
    secret: Option<PathBuf>,

    /// `continuously`, or heights and `start-end` ranges separated by commas
    #[arg(long, default_value = "continuously")]
    blocks: BlockSelection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BlockSelection {
    Continuously,
    /// Inclusive height ranges, replayed in the order given
    Ranges(Vec<RangeInclusive<u64>>),
}

impl BlockSelection {
    fn heights(&self) -> impl Iterator<Item = u64> + '_ {
        let ranges: &[RangeInclusive<u64>] = match self {
            Self::Continuously => &[],
            Self::Ranges(ranges) => ranges,
        };
        ranges.iter().cloned().flatten()
    }
}

impl FromStr for BlockSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("continuously") {
            return Ok(Self::Continuously);
        }
        let mut ranges = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_height(start)?;
                    let end = parse_height(end)?;
                    if start > end {
                        return Err(format!("empty block range {part}"));
                    }
                    ranges.push(start..=end);
                }
                None => {
                    let height = parse_height(part)?;
                    ranges.push(height..=height);
                }
            }
        }
        if ranges.is_empty() {
            return Err(format!("no block heights in {s:?}"));
        }
        Ok(Self::Ranges(ranges))
    }
}

fn parse_height(text: &str) -> Result<u64, String> {
    text.trim()
        .parse()
        .map_err(|e| format!("invalid block height {text:?}: {e}"))
}

fn setup_logger() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(env_filter);
    match std::env::var(LOG_FORMAT_ENV).as_deref() {
        Ok("json") => logger.json().init(),
        _ => logger.pretty().init(),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_logger();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "Witness exited with error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> WitnessResult<()> {
    let cfg = Configuration::load(args.config.as_deref(), args.secret.as_deref())?;
    let db = open_database(&cfg.database.path)?;
    let service = Arc::new(build_service(&cfg, db)?);
    tracing::info!(
        chain = %cfg.chain,
        destination = %cfg.destination_chain,
        cashiers = cfg.cashiers.len(),
        witness = service.signer_address().as_deref().unwrap_or("observer"),
        "Witness configured"
    );

    if args.blocks == BlockSelection::Continuously {
        return serve(service, cfg.status_port).await;
    }
    for height in args.blocks.heights() {
        service.process_one_block(height).await?;
    }
    Ok(())
}

async fn serve(service: Arc<Service>, port: u16) -> WitnessResult<()> {
    service.start().await;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WitnessError::Config(format!("cannot bind status API on {addr}: {e}")))?;
    tracing::info!(%addr, "Status API listening");

    let shutdown = service.shutdown_token();
    let cancelled = shutdown.clone();
    let app = router(AppState::new(service.clone()));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Received ctrl-c, shutting down"),
                _ = shutdown.cancelled() => tracing::warn!("Witness service cancelled itself"),
            }
        })
        .await;

    let halted_itself = cancelled.is_cancelled();
    service.stop().await;
    served.map_err(|e| WitnessError::Config(format!("status API failed: {e}")))?;
    if halted_itself {
        return Err(WitnessError::Config(
            "service stopped on a process-fatal error".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuously_is_the_default() {
        let args = Args::parse_from(["bridge-witness"]);
        assert_eq!(args.blocks, BlockSelection::Continuously);
        assert!(args.config.is_none());
    }

    #[test]
    fn block_lists_and_ranges() {
        let args = Args::parse_from(["bridge-witness", "--blocks", "7, 10-12,3"]);
        assert_eq!(
            args.blocks,
            BlockSelection::Ranges(vec![7..=7, 10..=12, 3..=3])
        );
        assert_eq!(args.blocks.heights().collect::<Vec<_>>(), vec![7, 10, 11, 12, 3]);
    }

    #[test]
    fn wide_ranges_are_not_expanded() {
        let blocks: BlockSelection = "0-4000000000".parse().unwrap();
        assert_eq!(blocks, BlockSelection::Ranges(vec![0..=4_000_000_000]));
        assert_eq!(blocks.heights().nth(2), Some(2));
    }

    #[test]
    fn bad_block_lists_are_rejected() {
        assert!("12-10".parse::<BlockSelection>().is_err());
        assert!("ten".parse::<BlockSelection>().is_err());
        assert!(",".parse::<BlockSelection>().is_err());
    }
}
