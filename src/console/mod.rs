use crate::chat::ChatService;
use crate::error::ChatError;
use crate::history::{Role, Session};
use anyhow::Result;
use console::style;
use futures_util::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Line-oriented REPL over the orchestrator's public contract. Holds only
/// presentation state (the active session id); everything durable lives
/// behind the `ChatService`.
pub struct Console {
    service: Arc<ChatService>,
    owner_id: String,
    exchange_timeout: Duration,
    active: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    New(Option<String>),
    List,
    Open(String),
    History,
    Delete(String),
    Help,
    Quit,
    Say(String),
    Empty,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    if !trimmed.starts_with('/') {
        return Command::Say(trimmed.to_string());
    }

    let (keyword, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (trimmed, ""),
    };

    match keyword {
        "/new" => Command::New((!rest.is_empty()).then(|| rest.to_string())),
        "/list" => Command::List,
        "/open" => Command::Open(rest.to_string()),
        "/history" => Command::History,
        "/delete" => Command::Delete(rest.to_string()),
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

/// Unparseable ids are a validation problem, reported without exiting.
fn validate_session_id(id: &str) -> Result<(), ChatError> {
    if Uuid::parse_str(id).is_err() {
        return Err(ChatError::Validation(format!(
            "'{id}' is not a valid session id"
        )));
    }
    Ok(())
}

fn session_line(session: &Session) -> String {
    format!(
        "{}  {}  ({} turns, last activity {})",
        session.id,
        session.title,
        session.turns.len(),
        session.last_message_at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn role_label(role: Role) -> console::StyledObject<&'static str> {
    match role {
        Role::System => style("system").dim(),
        Role::User => style("you").cyan(),
        Role::Assistant => style("assistant").green(),
    }
}

impl Console {
    pub fn new(service: Arc<ChatService>, owner_id: String, exchange_timeout: Duration) -> Self {
        Self {
            service,
            owner_id,
            exchange_timeout,
            active: None,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        println!(
            "{} type a message, or /help for commands",
            style("palaver").bold()
        );

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        loop {
            print!("{} ", style(">").bold());
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break; // EOF
            };

            match parse_command(&line) {
                Command::Empty => {}
                Command::Quit => break,
                Command::Help => Self::print_help(),
                Command::New(title) => self.cmd_new(title.as_deref().unwrap_or("")).await,
                Command::List => self.cmd_list().await,
                Command::Open(id) => self.cmd_open(&id).await,
                Command::History => self.cmd_history().await,
                Command::Delete(id) => self.cmd_delete(&id).await,
                Command::Say(text) => self.cmd_say(&text).await,
                Command::Unknown(keyword) => {
                    println!("{} unknown command {keyword}", style("!").red());
                }
            }
        }

        Ok(())
    }

    fn print_help() {
        println!("  /new [title]   start a new session");
        println!("  /list          list your sessions");
        println!("  /open <id>     switch to a session");
        println!("  /history       show the active session's turns");
        println!("  /delete <id>   delete a session");
        println!("  /quit          leave");
        println!("  anything else is sent to the active session");
    }

    fn report(error: &ChatError) {
        match error {
            ChatError::Cancelled => println!("\n{} cancelled", style("·").yellow()),
            other => println!("{} {other}", style("!").red()),
        }
    }

    async fn cmd_new(&mut self, title: &str) {
        match self.service.start_new_session(&self.owner_id, title).await {
            Ok(session) => {
                println!("started {}", style(&session.id).dim());
                self.active = Some(session.id);
            }
            Err(error) => Self::report(&error),
        }
    }

    async fn cmd_list(&self) {
        match self.service.list_sessions(&self.owner_id).await {
            Ok(sessions) if sessions.is_empty() => println!("no sessions yet — try /new"),
            Ok(sessions) => {
                for session in sessions {
                    println!("  {}", session_line(&session));
                }
            }
            Err(error) => Self::report(&error),
        }
    }

    async fn cmd_open(&mut self, id: &str) {
        if let Err(error) = validate_session_id(id) {
            Self::report(&error);
            return;
        }
        match self.service.get_session(id).await {
            Ok(session) => {
                println!("opened {}", style(&session.title).bold());
                self.active = Some(session.id);
            }
            Err(error) => Self::report(&error),
        }
    }

    async fn cmd_history(&self) {
        let Some(id) = self.active.as_deref() else {
            println!("no active session — /new or /open first");
            return;
        };
        match self.service.get_session(id).await {
            Ok(session) => {
                for turn in session.sorted_turns() {
                    println!("[{}] {}", role_label(turn.role), turn.content);
                }
            }
            Err(error) => Self::report(&error),
        }
    }

    async fn cmd_delete(&mut self, id: &str) {
        if let Err(error) = validate_session_id(id) {
            Self::report(&error);
            return;
        }
        match self.service.delete_session(id).await {
            Ok(true) => {
                println!("deleted");
                if self.active.as_deref() == Some(id) {
                    self.active = None;
                }
            }
            Ok(false) => println!("nothing to delete"),
            Err(error) => Self::report(&error),
        }
    }

    async fn cmd_say(&mut self, text: &str) {
        let Some(session_id) = self.active.clone() else {
            println!("no active session — /new or /open first");
            return;
        };

        // The deadline and Ctrl-C both act purely through the token; the
        // core has no timer of its own.
        let cancel = CancellationToken::new();
        let mut stream = self
            .service
            .send_message_stream(&session_id, text, cancel.clone());

        let deadline = tokio::time::sleep(self.exchange_timeout);
        tokio::pin!(deadline);
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);

        loop {
            tokio::select! {
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(text)) => {
                            print!("{text}");
                            let _ = std::io::stdout().flush();
                        }
                        Some(Err(error)) => {
                            Self::report(&error);
                            break;
                        }
                        None => {
                            println!();
                            break;
                        }
                    }
                }
                // Once the token is cancelled neither wakeup source is
                // polled again; a completed Sleep must not be re-polled.
                () = &mut deadline, if !cancel.is_cancelled() => cancel.cancel(),
                _ = &mut interrupt, if !cancel.is_cancelled() => cancel.cancel(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_text_is_a_message() {
        assert_eq!(
            parse_command("hello there"),
            Command::Say("hello there".into())
        );
    }

    #[test]
    fn blank_line_is_empty() {
        assert_eq!(parse_command("   "), Command::Empty);
    }

    #[test]
    fn new_without_title() {
        assert_eq!(parse_command("/new"), Command::New(None));
    }

    #[test]
    fn new_with_title() {
        assert_eq!(
            parse_command("/new Garden planning"),
            Command::New(Some("Garden planning".into()))
        );
    }

    #[test]
    fn open_keeps_id_argument() {
        assert_eq!(parse_command("/open abc-123"), Command::Open("abc-123".into()));
    }

    #[test]
    fn quit_and_exit_are_synonyms() {
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(parse_command("/exit"), Command::Quit);
    }

    #[test]
    fn unknown_slash_command_is_flagged() {
        assert_eq!(
            parse_command("/frobnicate now"),
            Command::Unknown("/frobnicate".into())
        );
    }

    #[test]
    fn malformed_session_id_fails_validation() {
        let err = validate_session_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[test]
    fn uuid_session_id_passes_validation() {
        let id = Uuid::new_v4().to_string();
        assert!(validate_session_id(&id).is_ok());
    }

    #[test]
    fn session_line_shows_title_and_turn_count() {
        let session = Session::new("u1", "Garden");
        let line = session_line(&session);
        assert!(line.contains("Garden"));
        assert!(line.contains("0 turns"));
    }
}
