//! `chatbi serve` — Start the HTTP API server.

use chatbi_config::AppConfig;
use chatbi_core::tool::ToolRegistry;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("ChatBI API");
    println!("   Listening: {}", config.bind_address());
    println!("   Model:     {}", config.default_model);
    println!(
        "   Memory:    {} turns per session, {} in context",
        config.memory.max_turns_per_session, config.memory.context_turns
    );

    chatbi_gateway::start(config, ToolRegistry::new()).await?;

    Ok(())
}
