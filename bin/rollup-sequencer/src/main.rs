//! Rollup sequencer binary entrypoint.

use std::{process, sync::Arc};

use anyhow::{Context, Result};
use argh::from_env;
use rollup_admission::RateLimiter;
use rollup_block_cache::BlockCache;
use rollup_common::logging;
use rollup_config::SequencerConfig;
use rollup_lock::{InMemoryLockStore, SequencerLock};
use rollup_proof_pipeline::{NativeProverPool, ProofPipeline};
use rollup_publish_timer::PublishTimeManager;
use rollup_sequencer::{
    InMemoryWorldState, LoggingPublisher, RollupCoordinator, SequencerService, SequencerState,
    ServiceConfig,
};
use tokio::{runtime, signal};
use tracing::*;

use crate::{
    args::Args,
    rpc::{start_rpc, RollupRpcImpl},
};

mod args;
mod rpc;

fn main() -> Result<()> {
    let args: Args = from_env();

    let config = args.load_config()?;
    init_logging(&config)?;

    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("rollup-rt")
        .build()
        .context("failed to build runtime")?;

    rt.block_on(run(config))?;

    info!("Exiting rollup sequencer");
    Ok(())
}

fn init_logging(config: &SequencerConfig) -> Result<()> {
    let section = &config.logging;
    logging::init_logging_from_config(logging::LoggingInitConfig {
        service_base_name: "rollup-sequencer",
        service_label: section.service_label.as_deref(),
        log_dir: section.log_dir.as_deref(),
        log_file_prefix: Some(section.log_file_prefix.as_str()),
        json_format: Some(section.json_format),
        directives: &section.directives,
        default_log_prefix: "rollup",
    })
    .context("failed to initialize logging")
}

async fn run(config: SequencerConfig) -> Result<()> {
    let limiter = Arc::new(RateLimiter::new(config.admission.daily_tx_limit));
    let timer = PublishTimeManager::new(config.publish.rollup_timeout_duration_secs)
        .with_bridges(config.publish.bridges.clone());

    let owner = config
        .lock
        .owner
        .clone()
        .unwrap_or_else(|| format!("rollup-sequencer-{}", process::id()));
    let lock = SequencerLock::new(
        config.lock.name.clone(),
        owner,
        Arc::new(InMemoryLockStore::new()),
        config.lock.lock_config(),
    );

    let (_, channels) = NativeProverPool::new(config.prover.workers).start();
    let pipeline = Arc::new(ProofPipeline::new(channels, config.pipeline_config()));

    let blocks = Arc::new(BlockCache::new());
    let coordinator = RollupCoordinator::new(
        pipeline,
        Arc::new(InMemoryWorldState::new()),
        Arc::new(LoggingPublisher::new()),
        blocks.clone(),
    )
    .with_root_verifier(config.prover.use_root_verifier);

    let (service, handle) = SequencerService::new(
        SequencerState::new(config.rollup_size(), 0, 0),
        lock,
        coordinator,
        limiter,
        timer.clone(),
        ServiceConfig {
            poll_interval: config.poll_interval(),
            command_buffer: config.rollup.command_buffer,
        },
    );
    let shutdown = service.shutdown_token();
    let mut service_task = tokio::spawn(service.run());

    let addr = config.rpc.socket_addr()?;
    let rpc_handle = start_rpc(addr, RollupRpcImpl::new(handle, blocks, timer)).await?;
    info!(%addr, "rpc server listening");

    let service_res = tokio::select! {
        res = signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("received ctrl-c, shutting down");
            shutdown.cancel();
            (&mut service_task).await
        }
        res = &mut service_task => {
            warn!("sequencer service exited");
            res
        }
    };

    if rpc_handle.stop().is_err() {
        debug!("rpc server already stopped");
    }
    rpc_handle.stopped().await;

    service_res
        .context("sequencer task panicked")?
        .context("sequencer service failed")
}
