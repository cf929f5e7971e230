/// opencv
/// https://docs.rs/opencv/latest/opencv/all.html
///
/// nalgebra
/// https://docs.rs/nalgebra/latest/nalgebra/
///
/// ndarray
/// https://docs.rs/ndarray/latest/ndarray/all.html
///
extern crate opencv;

mod camera;
mod codec;
mod config;
mod dataset;
mod engine;
mod error;
mod global_cast;
mod global_types;
mod runner;
mod save;
mod signal;
mod sync;
mod utility;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;

use crate::config::{RunnerConfig, StreamConfig};
use crate::engine::TrajectoryEngine;
use crate::runner::{Clock, MonotonicClock, Runner};
use crate::signal::ShutdownToken;

/// 主线程检查退出标志的间隔
const SUPERVISOR_POLL: Duration = Duration::from_millis(100);

/// RGB-D + 里程计关键帧前端
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// runner 配置文件
    #[arg(short, long, default_value = "configs/runner.json")]
    config: PathBuf,

    /// 覆盖配置里的回放目录
    #[arg(long)]
    replay_root: Option<PathBuf>,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_nanos()
        .init();

    if let Err(e) = run(Args::parse()) {
        log::error!("[Main] {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = RunnerConfig::load(&args.config)?;
    if let Some(root) = args.replay_root {
        config.replay.root = root;
    }
    log::info!(
        "[Main] Runner config:\n{}",
        serde_json::to_string_pretty(&config)?
    );
    let stream = StreamConfig::load(&config.stream_config_path)?;
    log::info!(
        "[Main] Stream config:\n{}",
        serde_json::to_string_pretty(&stream)?
    );

    let transport = dataset::detect_transport(&config, &stream)
        .context("no usable transport, cannot start")?;

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
    let runner = Arc::new(Runner::new(&config, &stream, clock.clone()));
    let shutdown = ShutdownToken::new();
    signal::setup_ctrl_c_handler(shutdown.clone())?;

    let engine = TrajectoryEngine::new(config.keyframe.clone(), config.output_path.as_deref())?;
    let mut dispatcher = runner.dispatcher(engine, shutdown.clone());
    let rate = config.ros_rate;
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let dispatch_handle = std::thread::Builder::new()
        .name("dispatcher".into())
        .spawn(move || {
            dispatcher.run(rate, clock.as_ref());
            // 引擎在此落盘
            drop(dispatcher);
            let _ = done_tx.send(());
        })
        .context("failed to spawn dispatcher")?;

    log::info!("[Main] Using {} transport", transport.name());
    let transport_handles = transport.start(runner.clone(), shutdown.clone())?;
    log::info!("[Main] Runner started. Waiting for data stream...");

    while !shutdown.is_requested() {
        std::thread::sleep(SUPERVISOR_POLL);
    }

    log::info!("[Main] Shutting down...");
    let grace = Duration::from_secs_f64(config.shutdown_grace_period.max(0.0));
    match done_rx.recv_timeout(grace) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if dispatch_handle.join().is_err() {
                log::error!("[Main] dispatcher thread panicked");
            }
        }
        Err(RecvTimeoutError::Timeout) => {
            log::warn!(
                "[Main] dispatcher still busy after {:.1}s",
                grace.as_secs_f64()
            );
            if config.force_exit {
                log::warn!("[Main] Forcing exit.");
                std::process::exit(0);
            }
            if dispatch_handle.join().is_err() {
                log::error!("[Main] dispatcher thread panicked");
            }
        }
    }

    for handle in transport_handles {
        if handle.join().is_err() {
            log::error!("[Main] transport thread panicked");
        }
    }
    log::info!(
        "[Main] {} observations fused ({} queued), {} messages dropped by sync. Exit complete.",
        runner.frame_count(),
        runner.slot().pushed(),
        runner.sync_dropped()
    );
    Ok(())
}
