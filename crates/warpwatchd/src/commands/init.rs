use std::path::Path;

use anyhow::bail;
use warpwatch_core::WatchConfig;

pub fn init(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let content = WatchConfig::scaffold().to_toml_string()?;
    std::fs::write(output, content)?;
    println!("✓ Generated {}", output.display());
    Ok(())
}
