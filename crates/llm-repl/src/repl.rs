use std::future::Future;
use std::io::{self, Write};

use llm_repl_ai::{CompletionResponse, Conversation, LlmService};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{expand_home_path, ReplSettings};
use crate::history::CommandHistory;
use crate::style::{Color, Style};
use crate::transcript::{load_conversation, save_conversation};

pub const INTERRUPT_MESSAGE: &str = "Interrupt received. Type '/exit' to quit.";

/// Context window assumed for models missing from the catalog.
const DEFAULT_CONTEXT_TOKENS: usize = 8192;

const HELP_TEXT: &str = "\
Commands:
  /help              Show this help
  /exit, /quit       Leave the session
  /clear             Clear the conversation (keeps the system prompt)
  /history           Show the conversation
  /save [file]       Save the conversation (default: conversation.json)
  /load <file>       Load a saved conversation
  /model [id]        List models or switch to another one
  /system [prompt]   Show or replace the system prompt
  /stream [on|off]   Toggle streamed output
  /tokens            Show the estimated token count
Anything else is sent to the model.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplCommand {
    Help,
    Exit,
    Clear,
    History,
    Save { path: Option<String> },
    Load { path: Option<String> },
    Model { id: Option<String> },
    System { prompt: Option<String> },
    Stream { setting: Option<String> },
    Tokens,
    Unknown { command: String },
    Prompt { text: String },
}

pub(crate) struct ReplCommandParser;

impl ReplCommandParser {
    pub(crate) fn parse(input: &str) -> Option<ReplCommand> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "?" {
            return Some(ReplCommand::Help);
        }
        if !trimmed.starts_with('/') {
            return Some(ReplCommand::Prompt {
                text: trimmed.to_string(),
            });
        }

        let (command, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (trimmed, ""),
        };
        let argument = if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        };

        Some(match command {
            "/help" => ReplCommand::Help,
            "/exit" | "/quit" => ReplCommand::Exit,
            "/clear" => ReplCommand::Clear,
            "/history" => ReplCommand::History,
            "/save" => ReplCommand::Save { path: argument },
            "/load" => ReplCommand::Load { path: argument },
            "/model" => ReplCommand::Model { id: argument },
            "/system" => ReplCommand::System { prompt: argument },
            "/stream" => ReplCommand::Stream { setting: argument },
            "/tokens" => ReplCommand::Tokens,
            _ => ReplCommand::Unknown {
                command: command.to_string(),
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplFlow {
    Continue,
    Exit,
}

enum TurnOutcome {
    Finished {
        response: CompletionResponse,
        text: String,
    },
    Interrupted,
}

/// One interactive session. Owns the conversation and runs one completion
/// at a time.
pub struct Repl<W: Write + Send> {
    service: Box<dyn LlmService>,
    conversation: Conversation,
    settings: ReplSettings,
    history: CommandHistory,
    style: Style,
    out: W,
}

impl<W: Write + Send> Repl<W> {
    pub fn new(
        service: Box<dyn LlmService>,
        settings: ReplSettings,
        history: CommandHistory,
        out: W,
    ) -> Self {
        let mut conversation = Conversation::new();
        if !service.system_prompt().is_empty() {
            conversation.set_system_prompt(service.system_prompt());
        }
        Self {
            style: Style::new(settings.color),
            service,
            conversation,
            settings,
            history,
            out,
        }
    }

    pub fn print_banner(&mut self) -> io::Result<()> {
        let title = format!(
            "LLM REPL ({} / {})",
            self.service.provider(),
            self.service.current_model()
        );
        writeln!(self.out, "{}", self.style.paint(&title, Color::Cyan))?;
        writeln!(self.out, "Type /help for commands, /exit to quit.")
    }

    /// Reads stdin until EOF or `/exit`. Ctrl-C at the prompt or during a
    /// completion prints a notice instead of ending the process.
    pub async fn run(&mut self) -> io::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let prompt = self.style.paint(&self.settings.prompt_prefix, Color::Cyan);
            write!(self.out, "{prompt}")?;
            self.out.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    writeln!(self.out)?;
                    self.notice(INTERRUPT_MESSAGE)?;
                    continue;
                }
            };
            let Some(line) = line else {
                writeln!(self.out)?;
                return Ok(());
            };

            self.history.add(&line);
            if self.handle_line_with_interrupt(&line, ctrl_c_signal()).await? == ReplFlow::Exit {
                return Ok(());
            }
        }
    }

    pub async fn handle_line(&mut self, line: &str) -> io::Result<ReplFlow> {
        self.handle_line_with_interrupt(line, std::future::pending())
            .await
    }

    /// Like [`Repl::handle_line`], abandoning an in-flight completion when
    /// `interrupt` resolves first.
    pub async fn handle_line_with_interrupt<I>(
        &mut self,
        line: &str,
        interrupt: I,
    ) -> io::Result<ReplFlow>
    where
        I: Future<Output = ()>,
    {
        let Some(command) = ReplCommandParser::parse(line) else {
            return Ok(ReplFlow::Continue);
        };

        match command {
            ReplCommand::Help => writeln!(self.out, "{HELP_TEXT}")?,
            ReplCommand::Exit => {
                writeln!(self.out, "Goodbye!")?;
                return Ok(ReplFlow::Exit);
            }
            ReplCommand::Clear => self.clear_conversation()?,
            ReplCommand::History => self.show_history()?,
            ReplCommand::Save { path } => self.save(path.as_deref())?,
            ReplCommand::Load { path } => self.load(path.as_deref())?,
            ReplCommand::Model { id } => self.model(id.as_deref())?,
            ReplCommand::System { prompt } => self.system(prompt.as_deref())?,
            ReplCommand::Stream { setting } => self.stream_setting(setting.as_deref())?,
            ReplCommand::Tokens => {
                let estimate = self.conversation.estimate_tokens();
                let budget = self.context_budget();
                writeln!(self.out, "Estimated tokens: {estimate} (budget {budget})")?;
            }
            ReplCommand::Unknown { command } => self.error(&format!(
                "Unknown command: {command}. Type /help for available commands."
            ))?,
            ReplCommand::Prompt { text } => self.run_prompt(&text, interrupt).await?,
        }
        Ok(ReplFlow::Continue)
    }

    async fn run_prompt<I>(&mut self, text: &str, interrupt: I) -> io::Result<()>
    where
        I: Future<Output = ()>,
    {
        self.conversation.add_user(text);
        // The stored log is only cut once the turn succeeds.
        let mut request = self.conversation.clone();
        let budget = self.context_budget();
        request.truncate_to_token_limit(budget, self.settings.keep_recent.max(1));

        let prefix = self.style.paint(&self.settings.ai_prefix, Color::Green);
        write!(self.out, "{prefix}")?;
        self.out.flush()?;

        let outcome = if self.settings.streaming {
            self.stream_turn(&request, interrupt).await?
        } else {
            self.complete_turn(&request, interrupt).await?
        };

        match outcome {
            TurnOutcome::Finished { response, text } if response.success => {
                tracing::debug!(
                    model = %response.model,
                    tokens_used = response.tokens_used,
                    "turn completed"
                );
                self.conversation = request;
                self.conversation.add_assistant(text);
            }
            TurnOutcome::Finished { response, .. } => {
                self.conversation.pop();
                self.error(&format!("Error: {}", response.error))?;
            }
            TurnOutcome::Interrupted => {
                self.conversation.pop();
                writeln!(self.out)?;
                self.notice(INTERRUPT_MESSAGE)?;
            }
        }
        Ok(())
    }

    async fn stream_turn<I>(
        &mut self,
        request: &Conversation,
        interrupt: I,
    ) -> io::Result<TurnOutcome>
    where
        I: Future<Output = ()>,
    {
        let Self { service, out, .. } = self;
        let mut text = String::new();
        let mut write_error: Option<io::Error> = None;

        let response = {
            let mut on_chunk = |content: &str, done: bool| {
                let written = if done {
                    writeln!(out)
                } else {
                    text.push_str(content);
                    write!(out, "{content}").and_then(|()| out.flush())
                };
                if let Err(error) = written {
                    write_error.get_or_insert(error);
                }
            };
            tokio::select! {
                biased;
                _ = interrupt => None,
                response = service.stream_complete(request, &mut on_chunk) => Some(response),
            }
        };

        if let Some(error) = write_error {
            return Err(error);
        }
        Ok(match response {
            Some(response) => TurnOutcome::Finished { response, text },
            None => TurnOutcome::Interrupted,
        })
    }

    async fn complete_turn<I>(
        &mut self,
        request: &Conversation,
        interrupt: I,
    ) -> io::Result<TurnOutcome>
    where
        I: Future<Output = ()>,
    {
        let response = tokio::select! {
            biased;
            _ = interrupt => return Ok(TurnOutcome::Interrupted),
            response = self.service.complete(request) => response,
        };
        if response.success {
            writeln!(self.out, "{}", response.content)?;
        } else {
            writeln!(self.out)?;
        }
        Ok(TurnOutcome::Finished {
            text: response.content.clone(),
            response,
        })
    }

    /// Explicit limit when configured, else the model's context window minus
    /// the room reserved for the reply.
    fn context_budget(&self) -> usize {
        if let Some(limit) = self.settings.context_token_limit {
            return limit.max(1);
        }
        let current = self.service.current_model();
        let context_length = self
            .service
            .available_models()
            .into_iter()
            .find(|model| model.id == current)
            .map(|model| model.context_length)
            .unwrap_or(DEFAULT_CONTEXT_TOKENS);
        context_length
            .saturating_sub(self.service.max_tokens())
            .max(1)
    }

    fn clear_conversation(&mut self) -> io::Result<()> {
        self.conversation.clear();
        if !self.service.system_prompt().is_empty() {
            self.conversation
                .set_system_prompt(self.service.system_prompt());
        }
        self.notice("Conversation cleared.")
    }

    fn show_history(&mut self) -> io::Result<()> {
        if self.conversation.is_empty() {
            return writeln!(self.out, "(no messages)");
        }
        write!(self.out, "{}", self.conversation.transcript())
    }

    fn save(&mut self, path: Option<&str>) -> io::Result<()> {
        let path = expand_home_path(
            path.unwrap_or(&self.settings.default_save_file),
            &self.settings.home_dir,
        );
        match save_conversation(&path, &self.conversation) {
            Ok(()) => self.notice(&format!("Conversation saved to {}", path.display())),
            Err(error) => self.error(&format!("Error: {error}")),
        }
    }

    fn load(&mut self, path: Option<&str>) -> io::Result<()> {
        let Some(path) = path else {
            return self.error("Usage: /load <file>");
        };
        let path = expand_home_path(path, &self.settings.home_dir);
        match load_conversation(&path) {
            Ok(conversation) => {
                self.conversation = conversation;
                let count = self.conversation.len();
                self.notice(&format!(
                    "Conversation loaded from {} ({count} messages)",
                    path.display()
                ))
            }
            Err(error) => self.error(&format!("Error: {error}")),
        }
    }

    fn model(&mut self, id: Option<&str>) -> io::Result<()> {
        let Some(id) = id else {
            writeln!(self.out, "Available models:")?;
            let current = self.service.current_model().to_string();
            for model in self.service.available_models() {
                let marker = if model.id == current { "*" } else { " " };
                writeln!(
                    self.out,
                    "{marker} {} - {} ({} tokens)",
                    model.id, model.name, model.context_length
                )?;
            }
            return writeln!(self.out, "Current model: {current}");
        };
        match self.service.set_model(id) {
            Ok(()) => {
                let current = self.service.current_model().to_string();
                self.notice(&format!("Model set to {current}"))
            }
            Err(error) => self.error(&format!("Error: {}", error.message)),
        }
    }

    fn system(&mut self, prompt: Option<&str>) -> io::Result<()> {
        let Some(prompt) = prompt else {
            let current = self.service.system_prompt().to_string();
            return writeln!(self.out, "System prompt: {current}");
        };
        self.service.set_system_prompt(prompt);
        self.conversation.set_system_prompt(prompt);
        self.notice("System prompt updated.")
    }

    fn stream_setting(&mut self, setting: Option<&str>) -> io::Result<()> {
        let enabled = match setting {
            None => !self.settings.streaming,
            Some("on") => true,
            Some("off") => false,
            Some(_) => return self.error("Usage: /stream [on|off]"),
        };
        self.settings.streaming = enabled;
        self.notice(if enabled {
            "Streaming enabled."
        } else {
            "Streaming disabled."
        })
    }

    fn notice(&mut self, message: &str) -> io::Result<()> {
        let line = self.style.paint(message, Color::Yellow);
        writeln!(self.out, "{line}")
    }

    fn error(&mut self, message: &str) -> io::Result<()> {
        let line = self.style.paint(message, Color::Red);
        writeln!(self.out, "{line}")
    }
}

async fn ctrl_c_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[path = "../tests/unit/repl_unit.rs"]
mod tests;
