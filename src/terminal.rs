use chrono::{Local, TimeZone};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::common::{ChatCommand, ChatEvent};

/// Line-oriented front-end for the chat room: prints events as they arrive
/// and forwards non-empty stdin lines as outgoing messages.
pub async fn run(mut events: mpsc::Receiver<ChatEvent>, commands: mpsc::Sender<ChatCommand>) {
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let done = matches!(event, ChatEvent::Disconnected);
                render(event);
                if done {
                    break;
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if commands.send(ChatCommand::SendMessage(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("stdin error: {err}");
                        break;
                    }
                }
            }
        }
    }
}

fn render(event: ChatEvent) {
    match event {
        ChatEvent::Connected => println!("-- connected; type a line and press enter to send --"),
        ChatEvent::MessageReceived(message) => {
            let when = Local
                .timestamp_millis_opt(message.ts)
                .single()
                .map(|time| time.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "--:--:--".to_string());
            let who = message.email.as_deref().unwrap_or(&message.user_id);
            // The avatar is a URL; a marker is all a terminal can show of it.
            let marker = if message.avatar_url.is_some() { "*" } else { " " };
            println!("[{when}]{marker}{who}: {}", message.text);
        }
        ChatEvent::PresenceSynced(state) => {
            let online = state.len();
            let connections: usize = state.values().map(Vec::len).sum();
            println!("-- online: {online} ({connections} connections) --");
        }
        ChatEvent::Disconnected => println!("-- disconnected --"),
    }
}
