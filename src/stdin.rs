//! Line-based control interface on stdin, mainly for development.
//!
//! Commands drive a single local session; the real transport is the TCP
//! frame stream in `net`.

use crate::session::Sessions;
use crate::source::fmt_duration;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

/// All stdin commands target this session.
const SESSION: u64 = 0;

pub fn start(sessions: Arc<Sessions>) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            handle_line(&sessions, &line).await;
        }
    });
}

async fn handle_line(sessions: &Arc<Sessions>, line: &str) {
    let line = line.trim();
    let (command, rest) = match line.split_once(' ') {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "play" => {
            if rest.is_empty() {
                warn!("Usage: play <url, playlist or search terms>");
                return;
            }
            match sessions.enqueue(SESSION, rest).await {
                Ok(position) => info!("Queued at position {position}"),
                Err(e) => warn!("Could not queue '{rest}': {e}"),
            }
        }
        "skip" => match sessions.skip(SESSION).await {
            Ok(Some(title)) => info!("Skipped, next up: {title}"),
            Ok(None) => info!("Skipped, queue is empty"),
            Err(e) => warn!("Could not skip: {e}"),
        },
        "remove" => match rest.parse::<usize>() {
            Ok(position) => match sessions.remove(SESSION, position).await {
                Ok(title) => info!("Removed: {title}"),
                Err(e) => warn!("Could not remove entry {position}: {e}"),
            },
            Err(_) => warn!("Usage: remove <position>"),
        },
        "clear" => match sessions.clear(SESSION).await {
            Ok(count) => info!("Cleared {count} pending entries"),
            Err(e) => warn!("Could not clear queue: {e}"),
        },
        "queue" => match sessions.list_queue(SESSION, 10).await {
            Ok(items) => {
                for item in items {
                    let duration = item
                        .duration_secs
                        .map(fmt_duration)
                        .unwrap_or_else(|| "?".to_string());
                    info!("{}: {} [{duration}]", item.position, item.title);
                }
            }
            Err(e) => warn!("Could not list queue: {e}"),
        },
        "sfx" => {
            if rest.is_empty() || rest == "list" {
                info!("Available effects: {}", sessions.effect_names().join(", "));
            } else if rest == "stop" {
                if let Err(e) = sessions.stop_effects(SESSION) {
                    warn!("Could not stop effects: {e}");
                }
            } else if let Err(e) = sessions.trigger_effect(SESSION, rest) {
                warn!("Could not play effect '{rest}': {e}");
            }
        }
        "pause" => {
            if let Err(e) = sessions.pause(SESSION) {
                warn!("Could not pause: {e}");
            }
        }
        "resume" => {
            if let Err(e) = sessions.resume(SESSION) {
                warn!("Could not resume: {e}");
            }
        }
        other => warn!("Unknown command: {other}"),
    }
}
