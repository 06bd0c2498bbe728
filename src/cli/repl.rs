use futures::StreamExt;
use log::{ error, info };
use std::error::Error;
use std::io::Write;
use tokio::io::{ AsyncBufReadExt, BufReader };

use crate::error::ClientError;
use crate::llm::registry::{ availability, suggest };
use crate::llm::Availability;
use crate::models::ModelRef;
use crate::session::{ ChatSession, ResponseStyle, TurnState };

const HELP: &str = "\
Commands:
  /models          list installed models
  /model NAME      switch model, pulling it if needed
  /pull NAME       pull a model from the registry
  /style NAME      none, detailed, concise or creative
  /temp X          sampling temperature between 0 and 1
  /image PATH      attach an image to the next message
  /history         print the conversation
  /clear           clear the conversation
  /quit            exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Models,
    Model(String),
    Pull(String),
    Style(String),
    Temperature(String),
    Image(String),
    History,
    Clear,
    Help,
    Quit,
    Say(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim().to_string()),
        None => (rest, String::new()),
    };
    match name.to_lowercase().as_str() {
        "models" => Command::Models,
        "model" => Command::Model(arg),
        "pull" => Command::Pull(arg),
        "style" => Command::Style(arg),
        "temp" | "temperature" => Command::Temperature(arg),
        "image" => Command::Image(arg),
        "history" => Command::History,
        "clear" => Command::Clear,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Say(line.to_string()),
    }
}

fn prompt(session: &ChatSession) {
    print!("[{}] > ", session.model());
    let _ = std::io::stdout().flush();
}

async fn print_models(session: &ChatSession) {
    let models = session.list_models().await;
    if models.is_empty() {
        println!("No models found (is the server running at {}?)", session.client().config().base_url);
        return;
    }
    for model in models {
        let marker = if model.same_family(session.model()) { "*" } else { " " };
        println!(" {} {}", marker, model);
    }
}

async fn switch_model(session: &mut ChatSession, name: &str) {
    let model = ModelRef::new(name);
    if model.is_empty() {
        println!("Error: Please specify a model name.");
        return;
    }
    let installed = session.list_models().await;
    match availability(&model, &installed) {
        Availability::Exact => println!("Model '{}' is already available.", model),
        Availability::Family(found) => {
            println!("Model '{}' is already available as '{}'.", model, found);
        }
        Availability::Missing => {
            let suggestions = suggest(&model, &installed, 3);
            if !suggestions.is_empty() {
                let names: Vec<String> = suggestions.iter().map(|m| m.to_string()).collect();
                println!("'{}' is not installed. Similar: {}", model, names.join(", "));
            }
            println!("Pulling '{}'...", model);
            match session.ensure_model(&model, None).await {
                Ok(provisioned) => println!("{}", provisioned.message),
                Err(e) => {
                    println!("Error: {}", e);
                    return;
                }
            }
        }
    }
    session.set_model(model);
}

async fn pull_model(session: &ChatSession, name: &str) {
    let model = ModelRef::new(name);
    println!("Starting model pull...");
    match session.ensure_model(&model, None).await {
        Ok(provisioned) => println!("{}", provisioned.message),
        Err(e @ ClientError::ModelNotVisibleAfterPull { .. }) => println!("Warning: {}", e),
        Err(e) => println!("Error: {}", e),
    }
}

async fn run_turn(session: &mut ChatSession) {
    let mut turn = match session.run_turn() {
        Ok(turn) => turn,
        Err(e) => {
            println!("Error: {}", e);
            return;
        }
    };

    let mut stdout = std::io::stdout();
    let mut shown_status: Option<String> = None;
    while let Some(update) = turn.next().await {
        if update.status.is_some() && update.status != shown_status {
            println!("\n[{}]", update.status.as_deref().unwrap_or_default());
        }
        shown_status = update.status.clone();
        if let Some(delta) = &update.delta {
            let _ = write!(stdout, "{}", delta);
            let _ = stdout.flush();
        }
        match update.state {
            TurnState::Committed => {
                println!();
                if let Some(tps) = update.stats.as_ref().and_then(|s| s.tokens_per_second()) {
                    info!("{:.1} tokens/s", tps);
                }
            }
            TurnState::Failed => {
                println!("\nError: {}", update.error.unwrap_or_default());
            }
            _ => {}
        }
    }
}

/// Line-oriented chat loop over stdin/stdout.
pub async fn run_repl(mut session: ChatSession) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_image: Option<Vec<u8>> = None;

    println!("Chatting with '{}'. Type /help for commands.", session.model());
    prompt(&session);

    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Command::Empty => {}
            Command::Quit => {
                break;
            }
            Command::Help => println!("{}", HELP),
            Command::Models => print_models(&session).await,
            Command::Model(name) => switch_model(&mut session, &name).await,
            Command::Pull(name) => pull_model(&session, &name).await,
            Command::Style(name) =>
                match name.parse::<ResponseStyle>() {
                    Ok(style) => {
                        session.set_style(style);
                        println!("Response style: {}", style);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            Command::Temperature(value) =>
                match value.parse::<f32>() {
                    Ok(t) => {
                        session.set_temperature(t);
                        println!("Temperature: {}", session.temperature());
                    }
                    Err(_) => println!("Error: '{}' is not a number", value),
                }
            Command::Image(path) =>
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        println!("Attached {} ({} bytes) to the next message", path, bytes.len());
                        pending_image = Some(bytes);
                    }
                    Err(e) => {
                        error!("Failed to read image {}: {}", path, e);
                        println!("Error: cannot read '{}': {}", path, e);
                    }
                }
            Command::History => println!("{}", session.conversation().transcript()),
            Command::Clear => {
                session.reset();
                pending_image = None;
                println!("History cleared.");
            }
            Command::Say(text) => {
                match session.append_user_turn(&text, pending_image.as_deref()) {
                    Ok(()) => {
                        pending_image = None;
                        run_turn(&mut session).await;
                    }
                    Err(e) => println!("{}", e),
                }
            }
        }
        prompt(&session);
    }

    println!();
    Ok(())
}
