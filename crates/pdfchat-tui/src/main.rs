use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pdfchat_core::{pdf, Config, LopdfExtractor, Session, UploadStatus};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

#[derive(Parser)]
#[command(name = "pdfchat")]
#[command(version, about = "Chat with a PDF through Gemini")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// PDF to upload at startup
    #[arg(long, global = true)]
    pdf: Option<PathBuf>,

    /// Gemini model to use (overrides the config file)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply
    Ask {
        /// Your message
        message: String,
    },
    /// Print the text extracted from a PDF
    Extract {
        /// PDF file
        file: PathBuf,
    },
    /// Save a Gemini API key (and --model, if given) to the config file
    SetKey {
        /// Gemini API key
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|_| Config::new());
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }

    match cli.command {
        Some(Commands::Ask { message }) => {
            init_stderr_logging(cli.verbose);
            ask(&config, cli.pdf, &message).await
        }
        Some(Commands::Extract { file }) => {
            init_stderr_logging(cli.verbose);
            extract(file).await
        }
        Some(Commands::SetKey { key }) => {
            init_stderr_logging(cli.verbose);
            set_key(key, cli.model)
        }
        None => {
            let _guard = init_file_logging(cli.verbose)?;
            run_tui(&config, cli.pdf).await
        }
    }
}

fn log_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn init_stderr_logging(verbose: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// The TUI owns the terminal, so logs go to a file instead
fn init_file_logging(verbose: u8) -> Result<WorkerGuard> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pdfchat")
        .join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, "pdfchat.log"));
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose))
        .with_ansi(false)
        .with_writer(writer)
        .init();

    Ok(guard)
}

async fn run_tui(config: &Config, pdf: Option<PathBuf>) -> Result<()> {
    // Fail before touching the terminal so the message stays readable
    let client = config.build_client()?;
    info!(model = %client.model(), "starting pdfchat");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();

    let mut app = App::new(client, Arc::new(LopdfExtractor), events.sender());
    if let Some(path) = pdf {
        app.start_upload(path);
    }

    let result = run_loop(&mut terminal, &mut app, &mut events).await;
    tui::restore()?;
    result
}

async fn run_loop(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

async fn ask(config: &Config, pdf: Option<PathBuf>, message: &str) -> Result<()> {
    let client = config.build_client()?;
    let mut session = Session::new(client, Arc::new(LopdfExtractor));

    if let Some(path) = pdf {
        session.upload(&path).await;
        if let UploadStatus::Failed { file, error } = session.conversation().upload_status() {
            bail!("Could not read {}: {}", file, error);
        }
    }

    match session.send(message).await {
        Some(reply) => println!("{}", reply.content),
        None => bail!("Message is empty"),
    }
    Ok(())
}

async fn extract(file: PathBuf) -> Result<()> {
    let doc = pdf::extract_file(Arc::new(LopdfExtractor), &file).await?;
    print!("{}", doc.text);
    eprintln!("{} pages, {} characters", doc.page_count, doc.char_count());
    Ok(())
}

fn set_key(key: String, model: Option<String>) -> Result<()> {
    let key = key.trim().to_string();
    if key.is_empty() {
        bail!("API key is empty");
    }

    let mut config = Config::load()?;
    config.api_key = Some(key);
    if let Some(model) = model {
        config.model = model;
    }
    config.save()?;

    let path = Config::get_config_path()?;
    info!(path = %path.display(), "saved config");
    println!("Saved API key to {}", path.display());
    Ok(())
}
