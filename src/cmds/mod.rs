use bpaf::Bpaf;
use core::config::Variant;

pub mod check;
pub mod recover;
pub mod run;

/// Picks which of the two trigger variants (§4.2/§4.3) this invocation
/// implements. Each is a distinct deployable binary upstream; here it's a
/// flag so both remain reachable from one crate.
#[derive(Bpaf, Copy, Clone, Debug)]
pub struct VariantArgs {
    /// Use the dual-timer (hard/soft, level-sensitive) trigger instead of
    /// the size-based one.
    #[bpaf(long("time-based"), switch)]
    time_based: bool,
}

impl VariantArgs {
    pub fn variant(&self) -> Variant {
        if self.time_based {
            Variant::TimeBased
        } else {
            Variant::SizeBased
        }
    }
}

pub(crate) fn new_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}
