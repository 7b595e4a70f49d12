use std::fs;
use std::path::Path;

use anyhow::Context;
use swarm_abstract::{TransferConfig, TransferConfigOverride};

/// Defaults, then the optional TOML file, then command-line flags.
/// A `timeout_secs` of zero keeps RTT estimation.
pub fn transfer_config(
    file: Option<&Path>,
    max_conn: Option<usize>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<TransferConfig> {
    let mut config = TransferConfig::default();
    if let Some(path) = file {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let overrides: TransferConfigOverride =
            toml::from_str(&content).context("Failed to parse config file")?;
        overrides.apply_to(&mut config);
    }
    if let Some(max_conn) = max_conn {
        config.max_conn = max_conn;
    }
    match timeout_secs {
        Some(0) => config.fixed_timeout_ms = None,
        Some(secs) => config.fixed_timeout_ms = Some(secs.saturating_mul(1000)),
        None => {}
    }
    Ok(config)
}
