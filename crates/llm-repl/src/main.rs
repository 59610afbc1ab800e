use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::Parser;
use llm_repl_ai::{create_service, LlmService};

mod config;
mod history;
mod logging;
mod repl;
mod style;
mod transcript;

use config::{load_config, CliOverrides};
use history::CommandHistory;
use repl::Repl;

#[derive(Parser, Debug)]
#[command(
    name = "llm-repl",
    version,
    about = "Interactive chat client for OpenAI-compatible LLM APIs"
)]
struct Cli {
    /// Configuration file (default: ~/.llm-repl/config.toml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
    /// groq, together or ollama
    #[arg(short = 'p', long)]
    provider: Option<String>,
    #[arg(short = 'm', long)]
    model: Option<String>,
    #[arg(short = 'k', long = "api-key")]
    api_key: Option<String>,
    #[arg(short = 't', long)]
    temperature: Option<f64>,
    #[arg(long = "max-tokens")]
    max_tokens: Option<usize>,
    /// Print whole replies instead of streaming them
    #[arg(long = "no-stream", default_value_t = false)]
    no_stream: bool,
    /// Send one prompt, print the reply and exit
    #[arg(long)]
    prompt: Option<String>,
    /// Debug logging, mirrored to stderr
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            provider: self.provider.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            no_stream: self.no_stream,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let mut config =
        load_config(cli.config.as_deref(), &cli.overrides()).map_err(|error| error.to_string())?;
    let _log_guard = logging::init_tracing(&config.log, cli.verbose);

    let missing_key =
        config.service.provider.requires_api_key() && config.service.api_key.is_none();
    let service = create_service(config.service.clone());

    if let Some(prompt) = cli.prompt.as_deref() {
        return run_one_shot(service.as_ref(), prompt, config.repl.streaming).await;
    }

    if missing_key {
        let env = config
            .service
            .provider
            .profile()
            .api_key_env
            .unwrap_or("the provider API key variable");
        eprintln!(
            "warning: no API key configured for {}; set {env} or pass --api-key",
            config.service.provider
        );
    } else if !service.is_available().await {
        eprintln!(
            "warning: {} is not reachable; requests may fail",
            config.service.provider
        );
    }

    config.repl.color = io::stdout().is_terminal();
    let history = CommandHistory::load(config.repl.history_file.clone(), config.repl.max_history);
    let mut repl = Repl::new(service, config.repl, history, io::stdout());
    repl.print_banner()
        .map_err(|error| format!("terminal output failed: {error}"))?;
    repl.run()
        .await
        .map_err(|error| format!("terminal I/O failed: {error}"))
}

async fn run_one_shot(service: &dyn LlmService, prompt: &str, streaming: bool) -> Result<(), String> {
    one_shot(service, prompt, streaming, &mut io::stdout()).await
}

/// Prints one completion to `out`. The first write failure (a closed pipe,
/// say) fails the run even when the completion itself succeeded.
async fn one_shot<W: Write + Send>(
    service: &dyn LlmService,
    prompt: &str,
    streaming: bool,
    out: &mut W,
) -> Result<(), String> {
    let mut write_error: Option<io::Error> = None;
    let response = if streaming {
        service
            .stream_complete_prompt(prompt, &mut |content: &str, done: bool| {
                let written = if done {
                    writeln!(out)
                } else {
                    write!(out, "{content}").and_then(|()| out.flush())
                };
                if let Err(error) = written {
                    write_error.get_or_insert(error);
                }
            })
            .await
    } else {
        let response = service.complete_prompt(prompt).await;
        if response.success {
            if let Err(error) = writeln!(out, "{}", response.content).and_then(|()| out.flush()) {
                write_error = Some(error);
            }
        }
        response
    };

    if !response.success {
        return Err(response.error);
    }
    match write_error {
        Some(error) => Err(format!("failed to write response: {error}")),
        None => Ok(()),
    }
}

#[cfg(test)]
#[path = "../tests/unit/main_unit.rs"]
mod tests;
