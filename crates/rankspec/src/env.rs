use std::env;
use std::sync::OnceLock;

static RANKSPEC_PASS_STATS: OnceLock<bool> = OnceLock::new();
static RANKSPEC_VERIFY: OnceLock<bool> = OnceLock::new();
static RANKSPEC_BINARY_RANK_CEILING: OnceLock<Option<usize>> = OnceLock::new();
static RANKSPEC_NARY_RANK_CEILING: OnceLock<Option<usize>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => default,
    }
}

fn read_usize(name: &str) -> Option<usize> {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
}

/// Logs per-function conversion statistics at `info` level.
pub(crate) fn pass_stats_enabled() -> bool {
    *RANKSPEC_PASS_STATS.get_or_init(|| read_flag("RANKSPEC_PASS_STATS", false))
}

/// Re-indexes each function after conversion to check SSA invariants.
pub(crate) fn verify_enabled() -> bool {
    *RANKSPEC_VERIFY.get_or_init(|| read_flag("RANKSPEC_VERIFY", true))
}

pub(crate) fn binary_rank_ceiling_override() -> Option<usize> {
    *RANKSPEC_BINARY_RANK_CEILING.get_or_init(|| read_usize("RANKSPEC_BINARY_RANK_CEILING"))
}

pub(crate) fn nary_rank_ceiling_override() -> Option<usize> {
    *RANKSPEC_NARY_RANK_CEILING.get_or_init(|| read_usize("RANKSPEC_NARY_RANK_CEILING"))
}
