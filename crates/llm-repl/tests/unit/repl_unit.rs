use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use llm_repl_ai::{
    ChunkSink, LlmError, LlmErrorCode, MessageRole, ModelInfo, ProviderKind,
};
use tempfile::tempdir;
use tokio::task::JoinHandle;

use super::*;

#[derive(Clone)]
struct ScriptedTurn {
    chunks: Vec<String>,
    response: CompletionResponse,
}

fn reply(content: &str) -> ScriptedTurn {
    ScriptedTurn {
        chunks: Vec::new(),
        response: CompletionResponse::succeeded(content, 5, "scripted-model"),
    }
}

fn streamed(chunks: &[&str]) -> ScriptedTurn {
    ScriptedTurn {
        chunks: chunks.iter().map(|chunk| chunk.to_string()).collect(),
        response: CompletionResponse::succeeded("", 0, "scripted-model"),
    }
}

fn failure(error: &str) -> ScriptedTurn {
    ScriptedTurn {
        chunks: Vec::new(),
        response: CompletionResponse::failed(
            Some(LlmErrorCode::ServerError),
            error,
            "scripted-model",
        ),
    }
}

struct ScriptedService {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    seen: Arc<Mutex<Vec<Conversation>>>,
    model: String,
    system_prompt: String,
    temperature: f64,
    max_tokens: usize,
}

impl ScriptedService {
    fn next_turn(&self, conversation: &Conversation) -> ScriptedTurn {
        self.seen
            .lock()
            .expect("seen log")
            .push(conversation.clone());
        self.turns
            .lock()
            .expect("scripted turns")
            .pop_front()
            .unwrap_or_else(|| failure("no scripted turn left"))
    }

    fn prompt_conversation(&self, prompt: &str) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.set_system_prompt(self.system_prompt.as_str());
        conversation.add_user(prompt);
        conversation
    }
}

#[async_trait]
impl LlmService for ScriptedService {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn complete(&self, conversation: &Conversation) -> CompletionResponse {
        self.next_turn(conversation).response
    }

    async fn complete_prompt(&self, prompt: &str) -> CompletionResponse {
        let conversation = self.prompt_conversation(prompt);
        self.complete(&conversation).await
    }

    fn complete_async(&self, conversation: Conversation) -> JoinHandle<CompletionResponse> {
        let response = self.next_turn(&conversation).response;
        tokio::spawn(async move { response })
    }

    async fn stream_complete(
        &self,
        conversation: &Conversation,
        on_chunk: &mut ChunkSink<'_>,
    ) -> CompletionResponse {
        let turn = self.next_turn(conversation);
        for chunk in &turn.chunks {
            on_chunk(chunk.as_str(), false);
        }
        on_chunk("", true);
        turn.response
    }

    async fn stream_complete_prompt(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkSink<'_>,
    ) -> CompletionResponse {
        let conversation = self.prompt_conversation(prompt);
        self.stream_complete(&conversation, on_chunk).await
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo::new("scripted-model", "Scripted", 4_096),
            ModelInfo::new("other-model", "Other", 1_024),
        ]
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn set_model(&mut self, model_id: &str) -> Result<(), LlmError> {
        if model_id.trim().is_empty() {
            return Err(LlmError::new(
                LlmErrorCode::ConfigurationError,
                "model id must not be empty",
            ));
        }
        self.model = model_id.to_string();
        Ok(())
    }

    fn current_model(&self) -> &str {
        &self.model
    }

    fn set_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
    }

    fn temperature(&self) -> f64 {
        self.temperature
    }

    fn set_max_tokens(&mut self, max_tokens: usize) {
        self.max_tokens = max_tokens;
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn set_system_prompt(&mut self, prompt: &str) {
        self.system_prompt = prompt.to_string();
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

fn repl_with(
    turns: Vec<ScriptedTurn>,
    settings: ReplSettings,
) -> (Repl<Vec<u8>>, Arc<Mutex<Vec<Conversation>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let service = ScriptedService {
        turns: Mutex::new(turns.into()),
        seen: Arc::clone(&seen),
        model: "scripted-model".to_string(),
        system_prompt: "Be helpful.".to_string(),
        temperature: 0.7,
        max_tokens: 1_024,
    };
    let repl = Repl::new(
        Box::new(service),
        settings,
        CommandHistory::in_memory(10),
        Vec::new(),
    );
    (repl, seen)
}

fn non_streaming() -> ReplSettings {
    ReplSettings {
        streaming: false,
        ..ReplSettings::default()
    }
}

fn output(repl: &Repl<Vec<u8>>) -> String {
    String::from_utf8_lossy(&repl.out).into_owned()
}

#[test]
fn parser_recognizes_commands_arguments_and_prompts() {
    assert_eq!(ReplCommandParser::parse("   "), None);
    assert_eq!(ReplCommandParser::parse("/help"), Some(ReplCommand::Help));
    assert_eq!(ReplCommandParser::parse("?"), Some(ReplCommand::Help));
    assert_eq!(ReplCommandParser::parse("/quit"), Some(ReplCommand::Exit));
    assert_eq!(ReplCommandParser::parse("/exit"), Some(ReplCommand::Exit));
    assert_eq!(
        ReplCommandParser::parse("/save"),
        Some(ReplCommand::Save { path: None })
    );
    assert_eq!(
        ReplCommandParser::parse("/load  chats/a.json "),
        Some(ReplCommand::Load {
            path: Some("chats/a.json".to_string())
        })
    );
    assert_eq!(
        ReplCommandParser::parse("/system Be   brief."),
        Some(ReplCommand::System {
            prompt: Some("Be   brief.".to_string())
        })
    );
    assert_eq!(
        ReplCommandParser::parse("/systemx"),
        Some(ReplCommand::Unknown {
            command: "/systemx".to_string()
        })
    );
    assert_eq!(
        ReplCommandParser::parse("  what is 2+2? "),
        Some(ReplCommand::Prompt {
            text: "what is 2+2?".to_string()
        })
    );
}

#[tokio::test]
async fn new_session_starts_with_service_system_prompt() {
    let (repl, _) = repl_with(Vec::new(), non_streaming());
    assert_eq!(repl.conversation.len(), 1);
    assert_eq!(repl.conversation.system_prompt(), Some("Be helpful."));
}

#[tokio::test]
async fn prompt_turn_appends_user_and_assistant_messages() {
    let (mut repl, seen) = repl_with(vec![reply("4")], non_streaming());

    let flow = repl.handle_line("2+2?").await.expect("handle prompt");

    assert_eq!(flow, ReplFlow::Continue);
    assert!(output(&repl).contains("AI: 4\n"));
    let messages = repl.conversation.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].content, "2+2?");
    assert_eq!(messages[2].role, MessageRole::Assistant);
    assert_eq!(messages[2].content, "4");

    let seen = seen.lock().expect("seen log");
    assert_eq!(seen[0].last().map(|message| message.content.as_str()), Some("2+2?"));
}

#[tokio::test]
async fn streaming_turn_prints_deltas_and_stores_accumulated_reply() {
    let (mut repl, _) = repl_with(
        vec![streamed(&["Hel", "lo", "!"])],
        ReplSettings::default(),
    );

    repl.handle_line("greet me").await.expect("handle prompt");

    assert!(output(&repl).contains("AI: Hello!\n"));
    assert_eq!(
        repl.conversation.last().map(|message| message.content.as_str()),
        Some("Hello!")
    );
}

#[tokio::test]
async fn failed_turn_reports_error_and_drops_unanswered_message() {
    let (mut repl, _) = repl_with(vec![failure("HTTP 500: boom")], non_streaming());

    repl.handle_line("hello").await.expect("handle prompt");

    assert!(output(&repl).contains("Error: HTTP 500: boom"));
    assert_eq!(repl.conversation.len(), 1);
}

#[tokio::test]
async fn interrupt_abandons_turn_without_touching_conversation() {
    let (mut repl, seen) = repl_with(vec![streamed(&["never"])], ReplSettings::default());

    repl.handle_line_with_interrupt("hello", async {})
        .await
        .expect("handle interrupted prompt");

    assert!(output(&repl).contains(INTERRUPT_MESSAGE));
    assert!(!output(&repl).contains("never"));
    assert_eq!(repl.conversation.len(), 1);
    assert!(seen.lock().expect("seen log").is_empty());
}

#[tokio::test]
async fn conversation_is_truncated_to_budget_before_request() {
    let settings = ReplSettings {
        streaming: false,
        keep_recent: 2,
        context_token_limit: Some(10),
        ..ReplSettings::default()
    };
    let (mut repl, seen) = repl_with(vec![reply("ok")], settings);
    for index in 0..6 {
        repl.conversation
            .add_user(format!("{index} {}", "long ".repeat(20)));
    }

    repl.handle_line("latest").await.expect("handle prompt");

    let seen = seen.lock().expect("seen log");
    let sent = &seen[0];
    assert_eq!(sent.len(), 3);
    assert_eq!(sent.system_prompt(), Some("Be helpful."));
    assert_eq!(
        sent.last().map(|message| message.content.as_str()),
        Some("latest")
    );
}

#[tokio::test]
async fn clear_keeps_system_prompt() {
    let (mut repl, _) = repl_with(vec![reply("a")], non_streaming());
    repl.handle_line("q").await.expect("prompt");

    repl.handle_line("/clear").await.expect("clear");

    assert_eq!(repl.conversation.len(), 1);
    assert_eq!(repl.conversation.system_prompt(), Some("Be helpful."));
    assert!(output(&repl).contains("Conversation cleared."));
}

#[tokio::test]
async fn system_command_updates_service_and_conversation() {
    let (mut repl, _) = repl_with(Vec::new(), non_streaming());

    repl.handle_line("/system Answer in haiku.")
        .await
        .expect("system");

    assert_eq!(repl.service.system_prompt(), "Answer in haiku.");
    assert_eq!(repl.conversation.system_prompt(), Some("Answer in haiku."));
    assert_eq!(repl.conversation.len(), 1);

    repl.handle_line("/system").await.expect("show system");
    assert!(output(&repl).contains("System prompt: Answer in haiku."));
}

#[tokio::test]
async fn history_command_prints_transcript() {
    let (mut repl, _) = repl_with(vec![reply("hi there")], non_streaming());
    repl.handle_line("hello").await.expect("prompt");

    repl.handle_line("/history").await.expect("history");

    assert!(output(&repl)
        .contains("[System] Be helpful.\n[User] hello\n[Assistant] hi there\n"));
}

#[tokio::test]
async fn save_and_load_round_trip_through_files() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("chat.json");
    let (mut repl, _) = repl_with(vec![reply("saved reply")], non_streaming());
    repl.handle_line("remember this").await.expect("prompt");
    let original = repl.conversation.clone();

    repl.handle_line(&format!("/save {}", path.display()))
        .await
        .expect("save");
    repl.handle_line("/clear").await.expect("clear");
    repl.handle_line(&format!("/load {}", path.display()))
        .await
        .expect("load");

    assert_eq!(repl.conversation, original);
    assert!(output(&repl).contains("(3 messages)"));

    repl.handle_line("/load").await.expect("load usage");
    assert!(output(&repl).contains("Usage: /load <file>"));
}

#[tokio::test]
async fn model_command_lists_and_switches_models() {
    let (mut repl, _) = repl_with(Vec::new(), non_streaming());

    repl.handle_line("/model").await.expect("list models");
    let listing = output(&repl);
    assert!(listing.contains("* scripted-model - Scripted (4096 tokens)"));
    assert!(listing.contains("  other-model - Other (1024 tokens)"));

    repl.handle_line("/model other-model")
        .await
        .expect("switch model");
    assert_eq!(repl.service.current_model(), "other-model");
    assert!(output(&repl).contains("Model set to other-model"));
}

#[tokio::test]
async fn stream_command_toggles_and_validates() {
    let (mut repl, _) = repl_with(Vec::new(), ReplSettings::default());

    repl.handle_line("/stream").await.expect("toggle");
    assert!(!repl.settings.streaming);
    repl.handle_line("/stream on").await.expect("enable");
    assert!(repl.settings.streaming);
    repl.handle_line("/stream maybe").await.expect("invalid");
    assert!(output(&repl).contains("Usage: /stream [on|off]"));
}

#[tokio::test]
async fn tokens_command_reports_estimate_and_budget() {
    let (mut repl, _) = repl_with(Vec::new(), non_streaming());

    repl.handle_line("/tokens").await.expect("tokens");

    assert!(output(&repl).contains("Estimated tokens: 2 (budget 3072)"));
}

#[tokio::test]
async fn unknown_command_and_exit() {
    let (mut repl, _) = repl_with(Vec::new(), non_streaming());

    let flow = repl.handle_line("/bogus").await.expect("unknown");
    assert_eq!(flow, ReplFlow::Continue);
    assert!(output(&repl).contains("Unknown command: /bogus"));

    let flow = repl.handle_line("/exit").await.expect("exit");
    assert_eq!(flow, ReplFlow::Exit);
}

#[tokio::test]
async fn save_and_load_expand_home_relative_paths() {
    let home = tempdir().expect("create temp home");
    let settings = ReplSettings {
        streaming: false,
        home_dir: home.path().to_path_buf(),
        ..ReplSettings::default()
    };
    let (mut repl, _) = repl_with(vec![reply("kept")], settings);
    repl.handle_line("remember").await.expect("prompt");
    let original = repl.conversation.clone();

    repl.handle_line("/save ~/chats/session.json")
        .await
        .expect("save");
    assert!(home.path().join("chats/session.json").is_file());

    repl.handle_line("/clear").await.expect("clear");
    repl.handle_line("/load ~/chats/session.json")
        .await
        .expect("load");
    assert_eq!(repl.conversation, original);
    assert!(!output(&repl).contains("Error:"));
}

#[tokio::test]
async fn failed_turn_keeps_history_that_truncation_would_drop() {
    let settings = ReplSettings {
        streaming: false,
        keep_recent: 2,
        context_token_limit: Some(10),
        ..ReplSettings::default()
    };
    let (mut repl, seen) = repl_with(vec![failure("HTTP 503: busy")], settings);
    for index in 0..6 {
        repl.conversation
            .add_user(format!("{index} {}", "long ".repeat(20)));
    }
    let before = repl.conversation.clone();

    repl.handle_line("latest").await.expect("handle prompt");

    assert_eq!(seen.lock().expect("seen log")[0].len(), 3);
    assert_eq!(repl.conversation, before);
}

#[tokio::test]
async fn successful_turn_stores_truncated_log_with_reply() {
    let settings = ReplSettings {
        streaming: false,
        keep_recent: 2,
        context_token_limit: Some(10),
        ..ReplSettings::default()
    };
    let (mut repl, _) = repl_with(vec![reply("done")], settings);
    for index in 0..6 {
        repl.conversation
            .add_user(format!("{index} {}", "long ".repeat(20)));
    }

    repl.handle_line("latest").await.expect("handle prompt");

    let contents: Vec<&str> = repl
        .conversation
        .messages()
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(contents.len(), 4);
    assert_eq!(contents[0], "Be helpful.");
    assert_eq!(&contents[2..], ["latest", "done"]);
}
