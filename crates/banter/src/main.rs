//! A minimal terminal chat client for OpenAI-compatible services.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::time::Duration;

use banter_core::transcript::Message;
use banter_core::{Controller, ControllerBuilder};
use banter_model::Role;
use banter_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

enum UiEvent {
    Busy(bool),
    Snapshot(Vec<Message>),
    Error(String),
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(api_key) = env::var("OPENROUTER_API_KEY") else {
        eprintln!("OPENROUTER_API_KEY environment variable is not set");
        return;
    };

    let mut config = OpenAIConfigBuilder::with_api_key(api_key);
    if let Ok(base_url) = env::var("OPENROUTER_BASE_URL") {
        config = config.with_base_url(base_url);
    }
    if let Ok(model) = env::var("OPENROUTER_MODEL") {
        config = config.with_model(model);
    }
    let provider = OpenAIProvider::new(config.build());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let controller = ControllerBuilder::with_provider(provider)
        .on_snapshot({
            let event_tx = event_tx.clone();
            move |snapshot| {
                event_tx.send(UiEvent::Snapshot(snapshot)).ok();
            }
        })
        .on_busy({
            let event_tx = event_tx.clone();
            move |busy| {
                event_tx.send(UiEvent::Busy(busy)).ok();
            }
        })
        .on_error({
            let event_tx = event_tx.clone();
            move |err| {
                event_tx.send(UiEvent::Error(err.to_string())).ok();
            }
        })
        .build();

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    let mut transcript = Vec::new();

    'outer: loop {
        print!("> ");
        std::io::stdout().flush().unwrap();

        let Some(line) = read_line().await else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        controller.submit(line);

        let mut progress_bar = None;

        loop {
            // Create a new progress bar if it has been finished.
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar.set_message("💬 Waiting for a reply...");
                    progress_bar
                })
                .inc(1);

            let sleep = sleep(Duration::from_millis(100));
            let event = select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        break 'outer;
                    };
                    event
                },
                _ = sleep => {
                    continue;
                }
            };

            match event {
                UiEvent::Snapshot(snapshot) => {
                    transcript = snapshot;
                }
                UiEvent::Error(message) => {
                    // Finish the progress bar before printing anything.
                    if let Some(progress_bar) = &progress_bar {
                        progress_bar.finish_and_clear();
                    }
                    progress_bar = None;

                    let bar = BAR_CHAR.bright_red();
                    println!("{bar}⚠️  {}", message.bright_red());
                }
                UiEvent::Busy(busy) => {
                    if busy {
                        continue;
                    }
                    if let Some(progress_bar) = &progress_bar {
                        progress_bar.finish_and_clear();
                    }

                    print_last_reply(&transcript);
                    break;
                }
            }
        }
    }

    controller.shutdown();
}

fn print_last_reply(transcript: &[Message]) {
    let Some(reply) = transcript
        .iter()
        .rev()
        .find(|msg| msg.role == Role::Assistant)
    else {
        return;
    };
    println!(
        "{}🤖 {}",
        BAR_CHAR.bright_cyan(),
        reply.text.bright_white()
    );
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
