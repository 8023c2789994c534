//! `aiwire` command-line front end.

use aiwire_client::{
    deadline_token, handler_fn, AiwireError, CancellationToken, ChatChunk, ChatRequest, Client,
    ClientConfig, FineTuningEvent, Message, Response, StreamOutcome, Termination,
};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aiwire", about = "Streaming AI API client", version)]
struct Cli {
    /// Path to a TOML config file (defaults to AIWIRE_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ChatArgs {
    /// Model name
    #[arg(short, long)]
    model: String,
    /// Optional system prompt
    #[arg(short, long)]
    system: Option<String>,
    /// Give up after this many seconds, keeping the partial answer
    #[arg(short, long)]
    timeout: Option<u64>,
    /// Completion length cap
    #[arg(long)]
    max_tokens: Option<u32>,
    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,
    /// Write the raw event stream instead of the text
    #[arg(long)]
    raw: bool,
    /// The user prompt
    prompt: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a chat completion to stdout
    Chat(ChatArgs),
    /// Follow a fine-tuning job's events; Ctrl-C cancels the job
    Events {
        /// Job id, e.g. ftjob-abc123
        job_id: String,
    },
    /// Cancel a fine-tuning job
    Cancel {
        /// Job id, e.g. ftjob-abc123
        job_id: String,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// A token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            on_signal.cancel();
        }
    });
    token
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let config = match path {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::from_env()?,
    };
    Ok(config)
}

fn write_stdout(text: &str) -> Result<(), AiwireError> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn report_chat(outcome: &StreamOutcome<Response>) {
    let response = &outcome.value;
    let finish = response
        .choices
        .first()
        .and_then(|c| c.finish_reason.as_deref())
        .unwrap_or("none");
    match response.usage {
        Some(usage) => eprintln!(
            "[finish: {finish}, tokens: {} prompt + {} completion = {}]",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        ),
        None => eprintln!("[finish: {finish}]"),
    }
    match outcome.termination {
        Termination::Done => {}
        Termination::SourceClosed => warn!("Stream ended without its end marker; answer may be truncated"),
        Termination::Cancelled => warn!("Stream cancelled; answer is partial"),
    }
    if outcome.skipped_frames > 0 {
        warn!(skipped = outcome.skipped_frames, "Some frames could not be decoded");
    }
}

async fn chat(client: &Client, args: ChatArgs) -> anyhow::Result<()> {
    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(args.prompt));

    let mut request = ChatRequest::new(args.model, messages);
    if let Some(max_tokens) = args.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = args.temperature {
        request = request.with_temperature(temperature);
    }

    let interrupt = interrupt_token();
    let token = match args.timeout {
        Some(secs) => deadline_token(&interrupt, Duration::from_secs(secs)),
        None => interrupt.child_token(),
    };

    if args.raw {
        let mut stdout = tokio::io::stdout();
        let stats = client.relay_chat(&request, &mut stdout, token).await?;
        info!(chunks = stats.chunks, bytes = stats.bytes, cancelled = stats.cancelled, "Relay done");
        return Ok(());
    }

    let outcome = client
        .chat_stream_with(
            &request,
            &mut handler_fn(|chunk: &ChatChunk| write_stdout(&chunk.text())),
            token,
        )
        .await?;
    write_stdout("\n")?;
    report_chat(&outcome);
    Ok(())
}

fn print_event(event: &FineTuningEvent) -> Result<(), AiwireError> {
    let when = event
        .created_at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let mut line = format!("{when} [{}] {}", event.level, event.message);
    if let Some(data) = &event.data {
        line.push(' ');
        line.push_str(&data.to_string());
    }
    line.push('\n');
    write_stdout(&line)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let client = Client::new(load_config(cli.config.as_deref())?)?;

    match cli.command {
        Commands::Chat(args) => chat(&client, args).await?,
        Commands::Events { job_id } => {
            let outcome = client
                .fine_tuning_events_with(&job_id, &mut handler_fn(print_event), interrupt_token())
                .await?;
            info!(
                job_id = %job_id,
                events = outcome.value.len(),
                termination = ?outcome.termination,
                "Event feed closed"
            );
        }
        Commands::Cancel { job_id } => {
            let job = client.cancel_fine_tuning_job(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat() {
        let cli = Cli::try_parse_from([
            "aiwire", "--config", "aiwire.toml", "chat", "-m", "gpt-test", "--timeout", "30",
            "--raw", "hello there",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("aiwire.toml")));
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.model, "gpt-test");
                assert_eq!(args.timeout, Some(30));
                assert!(args.raw);
                assert_eq!(args.prompt, "hello there");
                assert!(args.system.is_none());
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn test_parse_job_commands() {
        let cli = Cli::try_parse_from(["aiwire", "events", "ftjob-1", "--json-logs"]).unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Events { job_id } if job_id == "ftjob-1"));

        let cli = Cli::try_parse_from(["aiwire", "cancel", "ftjob-2"]).unwrap();
        assert!(matches!(cli.command, Commands::Cancel { job_id } if job_id == "ftjob-2"));
    }

    #[test]
    fn test_chat_requires_model() {
        assert!(Cli::try_parse_from(["aiwire", "chat", "hi"]).is_err());
    }
}
