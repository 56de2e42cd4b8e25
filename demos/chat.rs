//! Interactive chat with a bot-chat conversation.
//!
//! Usage:
//!   OPENAI_API_KEY=sk-... cargo run --example chat
//!   cargo run --example chat -- --backend customllm --base-url http://localhost:8000 --model llama3
//!   OPENAI_API_KEY=sk-... cargo run --example chat -- --name Alice --prefix-names
//!
//! Ctrl-C or type "exit" / "quit" to leave. "/summary" compacts the history.

use std::io::{self, BufRead, Write};

use clap::Parser;
use serde::Deserialize;
use serde_json::json;

use bot_chat::{
    BackendVariant, ChatEvent, ConversationManager, ManagerConfig, OpenAiProvider, Participant,
    ResponseMode,
};

#[derive(Parser)]
#[command(name = "chat", about = "Chat with a bot in the space")]
struct Cli {
    /// Backend: "openai", "realtime", or "customllm"
    #[arg(long, default_value = "openai")]
    backend: String,

    /// Model to use
    #[arg(long, default_value = "gpt-4o")]
    model: String,

    /// API base URL
    #[arg(long, default_value = "https://api.openai.com")]
    base_url: String,

    /// System prompt
    #[arg(long, short = 's')]
    system: Option<String>,

    /// Your name in the conversation
    #[arg(long, default_value = "Visitor")]
    name: String,

    /// Prefix every user message with the speaker's name
    #[arg(long)]
    prefix_names: bool,

    /// Compact the history once it exceeds this many estimated tokens
    #[arg(long, default_value_t = 3200)]
    summary_trigger: u64,

    /// Do not offer any tool to the model
    #[arg(long)]
    no_tools: bool,
}

#[derive(Deserialize)]
struct RollArgs {
    sides: u32,
}

fn parse_backend(name: &str) -> BackendVariant {
    match name {
        "openai" => BackendVariant::OpenAi,
        "realtime" => BackendVariant::Realtime,
        "customllm" => BackendVariant::CustomLlm,
        other => {
            eprintln!("error: unknown backend '{other}'. Use 'openai', 'realtime', or 'customllm'.");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut provider = OpenAiProvider::new(&cli.base_url);
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        provider = provider.with_api_key(key);
    }

    let config = ManagerConfig {
        model: cli.model.clone(),
        backend: parse_backend(&cli.backend),
        summary_token_trigger: cli.summary_trigger,
        enable_tools: !cli.no_tools,
        prefix_with_user_names: cli.prefix_names,
        ..Default::default()
    };

    let manager = ConversationManager::new(provider, config);
    manager.set_answer_sink(|answer| {
        eprint!("\x1b[1;32mbot>\x1b[0m ");
        println!("{answer}");
    });
    manager.set_summary_formatter(|summary| {
        format!("You are chatting in a virtual space. Summary of the conversation so far: {summary}")
    });
    manager.register_tool(
        "roll_dice",
        "Roll a die with the given number of sides and return the result.",
        json!({
            "type": "object",
            "properties": {"sides": {"type": "integer", "description": "Number of sides"}},
            "required": ["sides"]
        }),
        |args: RollArgs| async move {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0);
            (nanos % args.sides.max(1) + 1).to_string()
        },
        ResponseMode::Synchronous,
    );

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ChatEvent::StartTalking => eprintln!("\x1b[2m  [typing...]\x1b[0m"),
                ChatEvent::StopTalking => {}
                ChatEvent::Error { error } => {
                    eprintln!("\x1b[1;31merror:\x1b[0m {error}");
                    eprintln!("Beep bop... Sorry, I'm currently facing issues.");
                }
            }
        }
    });

    if let Some(ref sys) = cli.system {
        manager.replace_first_system_message(sys);
    }

    eprintln!("bot-chat");
    eprintln!("backend: {}", cli.backend);
    eprintln!("model: {}", cli.model);
    eprintln!("---");

    let me = Participant::new("local-user", cli.name.clone());
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        eprint!("\x1b[1;36m{}>\x1b[0m ", cli.name);
        io::stderr().flush().ok();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "exit" | "quit" | "/q") {
            break;
        }
        if trimmed == "/summary" {
            match manager.summarize(200).await {
                Ok(summary) => eprintln!("\x1b[35m  [summary]\x1b[0m {summary}"),
                Err(e) => eprintln!("\x1b[1;31merror:\x1b[0m {e}"),
            }
            continue;
        }

        manager.add_user_message(trimmed, me.clone());
        manager.idle().await;

        let usage = manager.usage();
        eprintln!(
            "\x1b[2m  [{}in / {}out tokens]\x1b[0m",
            usage.input_tokens, usage.output_tokens
        );
    }

    manager.stop();
    eprintln!("bye.");
}
