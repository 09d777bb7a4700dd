use std::sync::Arc;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::completion::{RetryNotice, RetryObserver};
use crate::controller::{ChatController, DisplaySink, Reply};
use crate::sentiment;
use crate::session::ChatHistory;
use crate::store::SessionStore;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Quit,
    Help,
    Clear,
    Save,
    /// `None` restores the configured default prompt.
    System(Option<String>),
    Sentiment(String),
}

/// Parses a `/command`; plain text returns `None`.
pub fn parse_command(line: &str) -> Option<Result<ChatCommand, String>> {
    let rest = line.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (rest, ""),
    };
    let cmd = match name {
        "quit" | "exit" => Ok(ChatCommand::Quit),
        "help" => Ok(ChatCommand::Help),
        "clear" => Ok(ChatCommand::Clear),
        "save" => Ok(ChatCommand::Save),
        "system" if arg.is_empty() => Ok(ChatCommand::System(None)),
        "system" => Ok(ChatCommand::System(Some(arg.to_string()))),
        "sentiment" if arg.is_empty() => Err("usage: /sentiment <text>".to_string()),
        "sentiment" => Ok(ChatCommand::Sentiment(arg.to_string())),
        other => Err(format!("unknown command /{other}; try /help")),
    };
    Some(cmd)
}

pub fn help_text() -> &'static str {
    "/system <text>   set the system prompt (no text: back to default)\n\
     /save            append this conversation to the session archive\n\
     /clear           start a fresh conversation\n\
     /sentiment <t>   score the polarity of some text\n\
     /quit            leave"
}

struct TerminalSink;

impl RetryObserver for TerminalSink {
    fn retrying(&self, n: &RetryNotice) {
        println!(
            "⚠️ Just a minute... the server is busy. Retrying your question ({}/{})...",
            n.attempt + 1,
            n.max_attempts
        );
    }
}

impl DisplaySink for TerminalSink {
    fn composing(&self, active: bool) {
        if active {
            println!("💭 Eliza is typing...");
        }
    }

    fn render(&self, history: &ChatHistory) {
        if let Some(last) = history.last() {
            println!("Eliza: {}\n", last.content);
        }
    }
}

/// Needs the multi-threaded runtime: reading a line parks this worker thread.
pub async fn run(mut controller: ChatController, store: SessionStore) -> anyhow::Result<()> {
    let store = Arc::new(store);
    let mut rl = DefaultEditor::new()?;
    println!("Eliza, support bot. Type /help for commands, /quit to exit.\n");

    loop {
        let read = tokio::task::block_in_place(|| rl.readline("You: "));
        let line = match read {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        match parse_command(line) {
            None => {
                if let Some(Reply::Failed(e)) = controller.submit(line, &TerminalSink).await {
                    tracing::debug!(error = %e, "reply was an error");
                }
            }
            Some(Err(msg)) => println!("{msg}"),
            Some(Ok(ChatCommand::Quit)) => break,
            Some(Ok(ChatCommand::Help)) => println!("{}", help_text()),
            Some(Ok(ChatCommand::Clear)) => {
                controller.clear();
                println!("Conversation cleared.");
            }
            Some(Ok(ChatCommand::Save)) => {
                let store = store.clone();
                let messages = controller.snapshot();
                match tokio::task::spawn_blocking(move || store.save(messages)).await? {
                    Ok(rec) => println!(
                        "Saved {} messages at {}.",
                        rec.messages.len(),
                        rec.timestamp
                    ),
                    Err(e) => println!("Save failed: {e}"),
                }
            }
            Some(Ok(ChatCommand::System(prompt))) => {
                match &prompt {
                    Some(p) => println!("System prompt set to: {p}"),
                    None => println!("System prompt reset to default."),
                }
                controller.set_system_prompt(prompt);
            }
            Some(Ok(ChatCommand::Sentiment(text))) => println!("{:+.2}", sentiment::score(&text)),
        }
    }
    println!("Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert!(parse_command("hello /there").is_none());
    }

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(parse_command("/quit"), Some(Ok(ChatCommand::Quit)));
        assert_eq!(parse_command("/exit"), Some(Ok(ChatCommand::Quit)));
        assert_eq!(parse_command("/save"), Some(Ok(ChatCommand::Save)));
        assert_eq!(
            parse_command("/system  Be brief. "),
            Some(Ok(ChatCommand::System(Some("Be brief.".into()))))
        );
        assert_eq!(parse_command("/system"), Some(Ok(ChatCommand::System(None))));
        assert_eq!(
            parse_command("/sentiment I love it"),
            Some(Ok(ChatCommand::Sentiment("I love it".into())))
        );
    }

    #[test]
    fn bad_commands_report_usage() {
        assert!(matches!(parse_command("/sentiment"), Some(Err(_))));
        assert!(matches!(
            parse_command("/frobnicate"),
            Some(Err(m)) if m.contains("/frobnicate")
        ));
    }
}
