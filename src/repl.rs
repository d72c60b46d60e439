use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;
use uuid::Uuid;

use crate::dispatch::{DispatchOutcome, MessageDispatcher};
use crate::session::{ChatSession, Message, Role};
use crate::store::SessionStore;

const HELP: &str = "\
/new              start a new chat
/list             list chats
/switch <n|id>    switch to chat n (or an id prefix; numbers past
                  the end of the list match id prefixes)
/delete <n|id>    delete a chat
/help             show this help
/quit             exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    List,
    Switch(String),
    Delete(String),
    Help,
    Quit,
    Send(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Ok(Command::Send(line.to_string()));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((n, a)) => (n, a.trim()),
            None => (rest, ""),
        };
        let need_arg = |arg: &str| {
            if arg.is_empty() {
                Err(format!("/{name} needs a chat number or id"))
            } else {
                Ok(arg.to_string())
            }
        };
        match name {
            "new" => Ok(Command::New),
            "list" | "ls" => Ok(Command::List),
            "switch" | "s" => need_arg(arg).map(Command::Switch),
            "delete" | "rm" => need_arg(arg).map(Command::Delete),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(format!("unknown command /{other}, try /help")),
        }
    }
}

/// Resolves `n` (1-based position) or a unique id prefix to a session id.
/// A number past the end of the list is tried as an id prefix.
fn resolve_target(store: &SessionStore, target: &str) -> Option<Uuid> {
    if let Ok(n) = target.parse::<usize>() {
        let by_position = n.checked_sub(1).and_then(|i| store.sessions().get(i));
        if let Some(s) = by_position {
            return Some(s.id);
        }
    }
    let mut matches = store
        .sessions()
        .iter()
        .filter(|s| s.id.to_string().starts_with(target));
    match (matches.next(), matches.next()) {
        (Some(s), None) => Some(s.id),
        _ => None,
    }
}

fn print_message(out: &mut impl Write, m: &Message) -> std::io::Result<()> {
    let who = match m.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    writeln!(out, "[{}] {}: {}", m.timestamp.format("%H:%M"), who, m.content)
}

fn print_transcript(out: &mut impl Write, s: &ChatSession) -> std::io::Result<()> {
    writeln!(out, "== {} ==", s.name)?;
    for m in &s.messages {
        print_message(out, m)?;
    }
    Ok(())
}

fn print_list(out: &mut impl Write, store: &SessionStore) -> std::io::Result<()> {
    if store.sessions().is_empty() {
        return writeln!(out, "no chats yet, /new starts one");
    }
    for (i, s) in store.sessions().iter().enumerate() {
        let marker = if store.active_id() == Some(s.id) { '*' } else { ' ' };
        let short = s.id.to_string();
        writeln!(
            out,
            "{marker} {:>2}. {}  ({}, {} messages)",
            i + 1,
            s.name,
            &short[..8],
            s.messages.len()
        )?;
    }
    Ok(())
}

/// Drives the dispatcher from a line source until EOF or `/quit`.
pub async fn run<R, W>(dispatcher: &MessageDispatcher, input: R, out: &mut W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    {
        let mut store = dispatcher.store().lock().await;
        match store.sessions().last().map(|s| s.id) {
            Some(id) => store.select(id)?,
            None => {
                store.create()?;
            }
        }
        if let Some(active) = store.active() {
            print_transcript(out, active)?;
        }
    }
    writeln!(out, "type /help for commands")?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(c) => c,
            Err(msg) => {
                writeln!(out, "{msg}")?;
                continue;
            }
        };
        debug!(?command, "repl command");
        match command {
            Command::Quit => break,
            Command::Help => writeln!(out, "{HELP}")?,
            Command::List => print_list(out, &*dispatcher.store().lock().await)?,
            Command::New => {
                let mut store = dispatcher.store().lock().await;
                match store.create() {
                    Ok(id) => {
                        if let Some(s) = store.get(id) {
                            print_transcript(out, s)?;
                        }
                    }
                    Err(e) => writeln!(out, "error: {e}")?,
                }
            }
            Command::Switch(target) => {
                let mut store = dispatcher.store().lock().await;
                let Some(id) = resolve_target(&store, &target) else {
                    writeln!(out, "no chat matches {target:?}")?;
                    continue;
                };
                match store.select(id) {
                    Ok(()) => {
                        if let Some(s) = store.active() {
                            print_transcript(out, s)?;
                        }
                    }
                    Err(e) => writeln!(out, "error: {e}")?,
                }
            }
            Command::Delete(target) => {
                let mut store = dispatcher.store().lock().await;
                let Some(id) = resolve_target(&store, &target) else {
                    writeln!(out, "no chat matches {target:?}")?;
                    continue;
                };
                if let Err(e) = store.delete(id) {
                    writeln!(out, "error: {e}")?;
                }
                match store.active() {
                    Some(s) => writeln!(out, "deleted; now in {}", s.name)?,
                    None => writeln!(out, "deleted; no chats left, /new starts one")?,
                }
            }
            Command::Send(text) => {
                let Some(id) = dispatcher.store().lock().await.active_id() else {
                    writeln!(out, "no active chat, /new starts one")?;
                    continue;
                };
                if text.trim().is_empty() {
                    continue;
                }
                writeln!(out, "…")?;
                out.flush()?;
                match dispatcher.send(id, &text).await {
                    Ok(DispatchOutcome::Ignored(reason)) => debug!(?reason, "send ignored"),
                    Ok(_) => {
                        let store = dispatcher.store().lock().await;
                        if let Some(reply) = store.get(id).and_then(|s| s.last_message()) {
                            print_message(out, reply)?;
                        }
                    }
                    Err(e) => writeln!(out, "error: {e}")?,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BearerToken, FlowInvocationRequest, FlowInvoker, TransportError};
    use crate::dispatch::{FlowTarget, FALLBACK_REPLY};
    use crate::storage::MemoryStorage;
    use crate::tweaks::Tweaks;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct Echo;

    #[async_trait]
    impl FlowInvoker for Echo {
        async fn invoke(
            &self,
            req: &FlowInvocationRequest,
            _: &BearerToken,
        ) -> Result<Value, TransportError> {
            if req.input_value == "break" {
                return Ok(json!({"outputs": []}));
            }
            let text = format!("echo: {}", req.input_value);
            let message = json!({"message": {"text": text}});
            Ok(json!({"outputs": [{"outputs": [{"outputs": {"message": message}}]}]}))
        }
    }

    fn dispatcher(mem: &MemoryStorage) -> MessageDispatcher {
        let store = SessionStore::load(Arc::new(mem.clone()));
        let target = FlowTarget {
            flow_id: "f".into(),
            workspace_id: "w".into(),
            token: BearerToken::new("t"),
            tweaks: Tweaks::default(),
        };
        MessageDispatcher::new(Arc::new(Mutex::new(store)), Arc::new(Echo), target)
    }

    async fn drive(mem: &MemoryStorage, script: &str) -> String {
        let d = dispatcher(mem);
        let mut out = Vec::new();
        run(&d, script.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("/new"), Ok(Command::New));
        assert_eq!(Command::parse("  /switch 2 "), Ok(Command::Switch("2".into())));
        assert_eq!(Command::parse("/rm abc"), Ok(Command::Delete("abc".into())));
        assert_eq!(Command::parse("hello there"), Ok(Command::Send("hello there".into())));
        assert!(Command::parse("/switch").is_err());
        assert!(Command::parse("/bogus").is_err());
    }

    #[tokio::test]
    async fn conversation_round_trip_is_persisted() {
        let mem = MemoryStorage::new();
        let out = drive(&mem, "hello\nbreak\n/quit\nnever sent\n").await;
        assert!(out.contains("echo: hello"));
        assert!(out.contains(FALLBACK_REPLY));
        assert!(!out.contains("never sent"));

        let store = SessionStore::load(Arc::new(mem.clone()));
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.sessions()[0].messages.len(), 5);
    }

    #[tokio::test]
    async fn new_switch_delete_manage_sessions() {
        let mem = MemoryStorage::new();
        drive(&mem, "/new\n/switch 1\nfirst chat\n/delete 2\n/list\n").await;

        let store = SessionStore::load(Arc::new(mem.clone()));
        assert_eq!(store.sessions().len(), 1);
        let contents: Vec<_> =
            store.sessions()[0].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[1..], ["first chat", "echo: first chat"]);
    }

    #[tokio::test]
    async fn restart_resumes_most_recent_chat() {
        let mem = MemoryStorage::new();
        drive(&mem, "/new\nin the second\n").await;
        let out = drive(&mem, "").await;
        assert!(out.contains("echo: in the second"));
    }

    #[test]
    fn numeric_target_past_the_list_matches_id_prefix() {
        let doc = json!([
            {"id": "12345678-0000-4000-8000-000000000001", "name": "a", "messages": []},
            {"id": "98765432-0000-4000-8000-000000000002", "name": "b", "messages": []}
        ]);
        let store = SessionStore::load(Arc::new(MemoryStorage::with_document(doc.to_string())));
        let first = store.sessions()[0].id;
        let second = store.sessions()[1].id;

        assert_eq!(resolve_target(&store, "2"), Some(second));
        assert_eq!(resolve_target(&store, "1234"), Some(first));
        assert_eq!(resolve_target(&store, "98765"), Some(second));
        assert_eq!(resolve_target(&store, "3"), None);
    }
}
