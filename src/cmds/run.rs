//! The daemon: reads decoded records from stdin, fans them out by stream
//! key, and drives the trigger/upload pipeline until shutdown.

use std::sync::Arc;

use base::clock::RealClocks;
use base::{Error, FastHashSet};
use bpaf::Bpaf;
use core::config::Config;
use core::event::StreamKey;
use core::registry::Registry;
use core::uploader::{S3Uploader, Uploader};
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

use crate::decode;

use super::VariantArgs;

/// Runs the log-shipping daemon: decode, fan out by stream, trigger, upload.
#[derive(Bpaf, Debug)]
#[bpaf(command("run"))]
pub struct Args {
    #[bpaf(external(super::variant_args))]
    variant: VariantArgs,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let rt = super::new_runtime()?;
    rt.block_on(run_async(args.variant.variant()))
}

async fn run_async(variant: core::config::Variant) -> Result<i32, Error> {
    let cfg =
        Config::from_env(variant).map_err(|e| base::err!(InvalidArgument, msg("{e}")))?;
    let clocks = Arc::new(RealClocks);
    let registry = Arc::new(Registry::new(cfg.clone()).map_err(|e| base::err!(Internal, msg("{e}")))?);
    let uploader: Arc<dyn Uploader> = Arc::new(
        S3Uploader::new(&cfg)
            .await
            .map_err(|e| base::err!(Unavailable, msg("{e}")))?,
    );

    let recovered = core::recovery::recover(&registry, uploader.as_ref())
        .await
        .map_err(|e| base::err!(Internal, msg("{e}")))?;
    if recovered > 0 {
        info!(recovered, "recovered disk-buffered streams at startup");
    }

    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let mut timered_tags: FastHashSet<StreamKey> = FastHashSet::default();
    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        process_line(&cfg, &registry, &clocks, &uploader, &mut timered_tags, &shutdown_rx, &line).await;
                    }
                    Ok(None) => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "error reading stdin");
                        break;
                    }
                }
            }
        }
    }

    drop(shutdown_tx);
    for manager in registry.streams() {
        manager.close(&cfg, uploader.as_ref()).await;
    }
    Ok(0)
}

async fn process_line(
    cfg: &Config,
    registry: &Arc<Registry>,
    clocks: &Arc<RealClocks>,
    uploader: &Arc<dyn Uploader>,
    timered_tags: &mut FastHashSet<StreamKey>,
    shutdown_rx: &base::shutdown::Receiver,
    line: &str,
) {
    if line.trim().is_empty() {
        return;
    }
    let decoded = match decode::decode_line(cfg, line) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "dropping record that failed to decode");
            return;
        }
    };
    let tag = match StreamKey::new(decoded.tag) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "dropping record with invalid stream key");
            return;
        }
    };

    let manager = match registry.get_or_create(tag.clone()) {
        Ok(m) => m,
        Err(e) => {
            error!(tag = %tag, error = %e, "could not create stream");
            return;
        }
    };

    if timered_tags.insert(tag.clone()) {
        let manager = manager.clone();
        let clocks = clocks.clone();
        let cfg = cfg.clone();
        let uploader = uploader.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            manager.run_timers(clocks, cfg, uploader, shutdown_rx).await;
        });
    }

    if let Err(e) = manager
        .ingest(&[decoded.event], clocks.as_ref(), cfg, uploader.as_ref())
        .await
    {
        warn!(tag = %tag, error = %e, "ingest failed");
    }
}
