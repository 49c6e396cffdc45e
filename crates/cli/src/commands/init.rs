//! `chatbi init` — Write a default configuration file.

use chatbi_config::AppConfig;
use std::path::Path;

pub fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");

    println!("ChatBI — Setup");
    println!("==============\n");

    if write_default_config(&config_path, force)? {
        println!("Created config.toml at: {}", config_path.display());
        println!("\nNext steps:");
        println!("   1. Set CHATBI_API_KEY or add api_key to the config file");
        println!("   2. Run: chatbi serve");
        println!("   3. POST questions to /api/query\n");
    } else {
        println!("Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force.\n");
    }

    Ok(())
}

/// Write the default config to `path`, creating parent directories.
/// Returns `false` when a file already exists and `force` is unset.
fn write_default_config(path: &Path, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
