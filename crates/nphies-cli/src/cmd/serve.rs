use std::path::Path;

use anyhow::Context;

pub fn run(root: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::select! {
            res = nphies_server::serve(root, port) => res.context("server failed"),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })
}
