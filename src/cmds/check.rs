//! Subcommand to validate configuration without starting the daemon.

use base::Error;
use bpaf::Bpaf;
use core::config::Config;

use super::VariantArgs;

/// Validates configuration (from the environment) and exits.
#[derive(Bpaf, Debug)]
#[bpaf(command("check"))]
pub struct Args {
    #[bpaf(external(super::variant_args))]
    variant: VariantArgs,
}

pub fn run(args: Args) -> Result<i32, Error> {
    match Config::from_env(args.variant.variant()) {
        Ok(cfg) => {
            println!("configuration OK:");
            println!("  s3_bucket:        {}", cfg.s3_bucket);
            println!("  s3_region:        {}", cfg.s3_region);
            println!("  s3_bucket_prefix: {}", cfg.s3_bucket_prefix);
            println!("  id:               {}", cfg.id);
            println!("  use_disk_buffer:  {}", cfg.use_disk_buffer);
            if cfg.use_disk_buffer {
                println!("  disk_buffer_path: {}", cfg.disk_buffer_path.display());
            }
            Ok(0)
        }
        Err(e) => {
            eprintln!("configuration error: {e}");
            Ok(1)
        }
    }
}
