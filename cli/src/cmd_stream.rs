//! `chainstream stream`: run a session and print the price series.
//!
//! Stdout gets one line per observation (`<block> <price> trade|carried`)
//! and one per undo signal; logs go to stderr.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use chainstream_core::config::{DEFAULT_CHAIN, DEFAULT_ENDPOINT, DEFAULT_OUTPUT_MODULE};
use chainstream_core::cursor::{CursorManager, CursorStore, MemoryCursorStore};
use chainstream_core::package::load_package;
use chainstream_core::types::BlockRange;
use chainstream_core::{DecodeFailurePolicy, SessionConfig, StreamDriver, StreamError};
use chainstream_solana::{PriceObservation, PriceSink, PriceTracker};
use chainstream_storage::{FileCursorStore, SqliteCursorStore};
use chainstream_ws::WsTransport;

#[derive(Debug, Args)]
pub struct StreamArgs {
    /// API token sent as a bearer credential
    #[arg(long, env = "CHAINSTREAM_AUTH_TOKEN", hide_env_values = true, default_value = "")]
    pub auth_token: String,
    /// Streaming endpoint
    #[arg(long, env = "CHAINSTREAM_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
    /// Package path or http(s) URL
    #[arg(long, env = "CHAINSTREAM_PACKAGE")]
    pub package: String,
    /// Output module to stream
    #[arg(long, env = "CHAINSTREAM_MODULE", default_value = DEFAULT_OUTPUT_MODULE)]
    pub module: String,
    /// Mint address to track (exact, case-sensitive)
    #[arg(long, env = "CHAINSTREAM_MINT")]
    pub mint: String,
    /// First block when no cursor is saved
    #[arg(long, env = "CHAINSTREAM_START_BLOCK", default_value_t = 0)]
    pub start_block: u64,
    /// Stop after this block
    #[arg(long, env = "CHAINSTREAM_STOP_BLOCK")]
    pub stop_block: Option<u64>,
    /// Chain slug (part of the cursor key)
    #[arg(long, env = "CHAINSTREAM_CHAIN", default_value = DEFAULT_CHAIN)]
    pub chain: String,
    /// Request production mode
    #[arg(long, env = "CHAINSTREAM_PRODUCTION_MODE")]
    pub production_mode: bool,
    /// Persist cursors to this JSON file
    #[arg(long, env = "CHAINSTREAM_CURSOR_FILE", conflicts_with = "cursor_db")]
    pub cursor_file: Option<PathBuf>,
    /// Persist cursors to this SQLite database
    #[arg(long, env = "CHAINSTREAM_CURSOR_DB")]
    pub cursor_db: Option<String>,
    /// Forget the saved cursor and start from --start-block
    #[arg(long)]
    pub reset_cursor: bool,
    /// Skip blocks whose payload fails to decode instead of stopping
    #[arg(long, env = "CHAINSTREAM_SKIP_UNDECODABLE")]
    pub skip_undecodable: bool,
    /// Print observations as JSON lines
    #[arg(long)]
    pub json: bool,
}

impl StreamArgs {
    fn session(&self) -> SessionConfig {
        SessionConfig {
            auth_token: self.auth_token.clone(),
            endpoint_url: self.endpoint.clone(),
            package_reference: self.package.clone(),
            output_module: self.module.clone(),
            monitored_asset: self.mint.clone(),
            start_block: self.start_block,
            stop_block: self.stop_block,
            chain: self.chain.clone(),
            production_mode: self.production_mode,
            decode_failure: if self.skip_undecodable {
                DecodeFailurePolicy::Skip
            } else {
                DecodeFailurePolicy::Abort
            },
        }
    }

    async fn cursor_store(&self) -> Result<Arc<dyn CursorStore>> {
        if let Some(path) = &self.cursor_file {
            return Ok(Arc::new(FileCursorStore::new(path.clone())));
        }
        if let Some(db) = &self.cursor_db {
            let store = SqliteCursorStore::open(db)
                .await
                .with_context(|| format!("opening cursor database '{db}'"))?;
            return Ok(Arc::new(store));
        }
        tracing::warn!("no --cursor-file or --cursor-db; progress will not survive a restart");
        Ok(Arc::new(MemoryCursorStore::new()))
    }
}

pub async fn run(args: StreamArgs) -> Result<()> {
    let session = args.session();
    session.validate().context("invalid configuration")?;

    let package = load_package(&session.package_reference)
        .await
        .with_context(|| format!("loading package '{}'", session.package_reference))?;

    let cursors = CursorManager::new(args.cursor_store().await?, session.cursor_key());
    if args.reset_cursor {
        cursors.reset().await.context("resetting saved cursor")?;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping");
            on_signal.cancel();
        }
    });

    let transport = Arc::new(WsTransport::new(&session.endpoint_url, &session.auth_token));
    let mut driver = StreamDriver::builder(transport, Arc::new(package))
        .config(session.driver_config())
        .cursor_store(cursors)
        .cancellation(cancel)
        .build()
        .context("preparing stream")?;

    let mut tracker = PriceTracker::new(&session.monitored_asset, PrintSink { json: args.json });

    let result = driver.run(&mut tracker).await;

    let metrics = driver.metrics();
    tracing::info!(
        blocks = metrics.forward_blocks,
        observations = tracker.series().len(),
        undo_signals = metrics.undo_signals,
        reconnects = metrics.reconnects,
        skipped = metrics.skipped_envelopes,
        cursor_save_failures = metrics.cursor_save_failures,
        "session summary"
    );
    result.context("stream failed")
}

struct PrintSink {
    json: bool,
}

#[async_trait]
impl PriceSink for PrintSink {
    async fn on_observation(&mut self, obs: &PriceObservation) -> Result<(), StreamError> {
        if self.json {
            let line = serde_json::to_string(obs).map_err(|e| StreamError::Handler {
                handler: "print".into(),
                reason: e.to_string(),
            })?;
            println!("{line}");
        } else {
            let source = if obs.carried_forward { "carried" } else { "trade" };
            println!("{} {:.12} {}", obs.block_number, obs.price, source);
        }
        Ok(())
    }

    async fn on_reorg(&mut self, invalidated: BlockRange) -> Result<(), StreamError> {
        if self.json {
            println!(
                "{}",
                serde_json::json!({ "undo": { "first": invalidated.first, "last": invalidated.last } })
            );
        } else {
            println!("undo {}..={}", invalidated.first, invalidated.last);
        }
        Ok(())
    }
}
