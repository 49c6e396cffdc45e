//! `chatbi ask` — Single-question or interactive mode.
//!
//! Runs requests through the same coordinator the HTTP API uses, so
//! follow-up questions in one session see the earlier turns.

use std::io::Write;
use std::sync::Arc;

use chatbi_agent::{ChatRequest, StreamEventKind, StreamingCoordinator};
use chatbi_config::AppConfig;
use chatbi_core::event::EventBus;
use chatbi_core::tool::ToolRegistry;
use chatbi_memory::MemoryStore;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    message: Option<String>,
    session: String,
    model: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CHATBI_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let model = model.unwrap_or_else(|| config.default_model.clone());
    tracing::debug!(session = %session, model = %model, "Starting ask");
    let agent = chatbi_gateway::build_agent(&config, ToolRegistry::new())?;
    let memory = Arc::new(MemoryStore::new(config.memory.max_turns_per_session));
    let coordinator = Arc::new(
        StreamingCoordinator::new(agent, memory, Arc::new(EventBus::default()))
            .with_memory_config(&config.memory),
    );

    if let Some(question) = message {
        ask_once(&coordinator, &session, &model, question).await?;
        return Ok(());
    }

    println!();
    println!("  ChatBI — Interactive Mode");
    println!();
    println!("  Model:     {model}");
    println!("  Session:   {session}");
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }
        ask_once(&coordinator, &session, &model, question.to_string()).await?;
        println!();
    }

    Ok(())
}

/// Run one question, printing the answer as it streams in.
async fn ask_once(
    coordinator: &Arc<StreamingCoordinator>,
    session: &str,
    model: &str,
    question: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = ChatRequest {
        session_id: session.to_string(),
        request_id: uuid::Uuid::new_v4().to_string(),
        query: question,
        model: model.to_string(),
    };

    let mut rx = coordinator.stream(request);
    let mut printed = String::new();
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event.kind {
            StreamEventKind::Start => eprintln!("  {}", event.message),
            StreamEventKind::Response => {
                let text = delta(&printed, &event.message);
                if !text.is_empty() {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                printed = event.message;
            }
            StreamEventKind::Error => {
                eprintln!("\n  {}", event.message);
                return Ok(());
            }
        }
    }
    println!();
    Ok(())
}

/// The part of `message` not yet shown. Events carry the whole answer so
/// far; when it doesn't extend what was printed, it's shown in full.
fn delta<'a>(printed: &str, message: &'a str) -> &'a str {
    if printed == message {
        ""
    } else if let Some(rest) = message.strip_prefix(printed) {
        rest
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_prints_only_new_text() {
        assert_eq!(delta("", "Hel"), "Hel");
        assert_eq!(delta("Hel", "Hello"), "lo");
        assert_eq!(delta("Hello", "Hello"), "");
    }

    #[test]
    fn delta_shows_replacement_in_full() {
        assert_eq!(delta("", "East leads."), "East leads.");
        assert_eq!(delta("partial", "Here is the chart."), "Here is the chart.");
    }
}
