use anyhow::Context;
use small_qr_relay::{init_logging, run, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::load().context("failed to load relay configuration")?;
    let _log_guard = init_logging(&config.log_dir());

    run(config).await.context("print relay failed")
}
