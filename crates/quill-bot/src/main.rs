use std::sync::Arc;
use std::time::Duration;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quill_bot::config::Config;
use quill_channels::{ChannelClient, CliChannel, IncomingMessage};
use quill_core::{MessageProcessor, Response, ResponseKind, ThreadStateManager};
use quill_llm::OpenAiClient;
use quill_persist::{PersistenceClient, SqliteStore};
use quill_types::ThreadKey;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    tracing::info!("Starting Quill bot");
    tracing::info!("Model: {}, db: {}", config.llm.model, config.bot.db_path);

    // LLM client
    let mut llm_client = OpenAiClient::new(config.openai_api_key.clone())?;
    if let Some(base_url) = &config.llm.base_url {
        llm_client = llm_client.with_base_url(base_url.clone());
    }
    let llm_client = Arc::new(llm_client);

    // Persistence
    let persist: Arc<dyn PersistenceClient> = Arc::new(SqliteStore::open(&config.bot.db_path)?);
    tracing::info!("SQLite store opened at {}", config.bot.db_path);

    // Thread state manager + processor
    let manager = Arc::new(ThreadStateManager::new());
    let processor = Arc::new(MessageProcessor::new(
        llm_client,
        Arc::clone(&persist),
        Arc::clone(&manager),
        config.llm.clone().into(),
    ));

    // Periodic idle-thread sweep
    let sweep_manager = Arc::clone(&manager);
    let sweep_interval = Duration::from_secs(config.bot.cleanup_interval_secs);
    let max_age = Duration::from_secs(config.bot.thread_max_age_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let removed = sweep_manager.cleanup_old_threads(max_age).await;
            if removed > 0 {
                tracing::info!("Cleanup removed {} idle thread(s)", removed);
            }
        }
    });

    let channel: Arc<dyn ChannelClient> = Arc::new(CliChannel::new(&config.bot.image_dir));

    run_repl(processor, channel, persist, manager).await
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn run_repl(
    processor: Arc<MessageProcessor>,
    channel: Arc<dyn ChannelClient>,
    persist: Arc<dyn PersistenceClient>,
    manager: Arc<ThreadStateManager>,
) -> anyhow::Result<()> {
    println!("Quill ready. /help for commands, /quit to exit.");

    let mut rl = DefaultEditor::new()?;
    let mut session = 0u64;
    let mut message_counter = 0u64;

    loop {
        let readline = tokio::task::spawn_blocking(move || {
            let result = rl.readline("quill> ");
            (rl, result)
        })
        .await?;
        rl = readline.0;

        let line = match readline.1 {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(&line);

        let thread_id = format!("session-{}", session);
        let key = ThreadKey::new("cli", &thread_id);

        // REPL commands
        match line.as_str() {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("/new            start a new conversation thread");
                println!("/stats          show thread manager stats");
                println!("/config <option> <value>   set a per-thread override");
                println!("/quit           exit");
                continue;
            }
            "/new" => {
                session += 1;
                println!("Started a new thread (session-{})", session);
                continue;
            }
            "/stats" => {
                let stats = processor.manager().stats().await;
                println!(
                    "active threads: {}, locked: {}",
                    stats.active_threads, stats.locked_threads
                );
                continue;
            }
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("/config ") {
            let mut parts = rest.splitn(2, ' ');
            match (parts.next(), parts.next()) {
                (Some(option), Some(value)) => {
                    match persist.set_config_override(&key, option, value).await {
                        Ok(()) => println!("Set {} = {}", option, value),
                        Err(e) => println!("Error: {}", e),
                    }
                }
                _ => println!("Usage: /config <option> <value>"),
            }
            continue;
        }
        if line.starts_with('/') {
            println!("Unknown command: {} (/help for commands)", line);
            continue;
        }

        message_counter += 1;
        let message = IncomingMessage::new(
            "cli",
            thread_id.as_str(),
            line.as_str(),
            format!("{}", message_counter),
        );

        let response = processor.process(message, Arc::clone(&channel)).await;
        render(&response, &channel, &thread_id).await;
    }

    let stats = manager.stats().await;
    tracing::info!("Shutting down with {} active thread(s)", stats.active_threads);
    Ok(())
}

async fn render(response: &Response, channel: &Arc<dyn ChannelClient>, thread_id: &str) {
    let result = match response.kind {
        ResponseKind::Image => match &response.image {
            Some(image) => {
                channel
                    .send_image("cli", thread_id, &image.base64_data, &response.text)
                    .await
            }
            None => channel.send_message("cli", thread_id, &response.text).await,
        },
        ResponseKind::Error => {
            channel
                .send_message("cli", thread_id, &format!("Error: {}", response.text))
                .await
        }
        _ => {
            let formatted = channel.format_text(&response.text);
            channel.send_message("cli", thread_id, &formatted).await
        }
    };

    if let Err(e) = result {
        tracing::error!("Failed to deliver response: {}", e);
    }
}
