//! Standalone subcommand that runs crash recovery (L6, §4.6) and exits,
//! without starting the ingest daemon. Useful after an unclean shutdown
//! when the collector itself restarts the daemon separately.

use std::sync::Arc;

use base::Error;
use bpaf::Bpaf;
use core::config::Config;
use core::registry::Registry;

use super::VariantArgs;

/// Uploads any disk-buffered streams left behind by an unclean shutdown,
/// then exits.
#[derive(Bpaf, Debug)]
#[bpaf(command("recover"))]
pub struct Args {
    #[bpaf(external(super::variant_args))]
    variant: VariantArgs,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let rt = super::new_runtime()?;
    rt.block_on(async move {
        let cfg = Config::from_env(args.variant.variant())
            .map_err(|e| base::err!(InvalidArgument, msg("{e}")))?;
        let registry = Arc::new(
            Registry::new(cfg.clone()).map_err(|e| base::err!(Internal, msg("{e}")))?,
        );
        let uploader = core::uploader::S3Uploader::new(&cfg)
            .await
            .map_err(|e| base::err!(Unavailable, msg("{e}")))?;
        let recovered = core::recovery::recover(&registry, &uploader)
            .await
            .map_err(|e| base::err!(Internal, msg("{e}")))?;
        tracing::info!(recovered, "recovery complete");
        Ok(0)
    })
}
