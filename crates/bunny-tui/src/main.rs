//! tbunny - terminal UI for RabbitMQ clusters.
//!
//! Logs go to `--log-file` when given and are discarded otherwise, since
//! the terminal belongs to the UI.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use bunny_cluster::{HttpConnector, Manager};
use bunny_config::{AppConfig, resolve_config_dir};
use bunny_tui::app::App;
use bunny_tui::events::{AppEvent, EventHandler};
use bunny_tui::ui;
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "tbunny")]
#[command(about = "Terminal UI for managing RabbitMQ clusters")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, env = "TBUNNY_CONFIG_DIR")]
    config_dir: Option<String>,

    /// Write logs to this file
    #[arg(long, env = "TBUNNY_LOG_FILE")]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.log_file {
        init_logging(Path::new(path))?;
    }

    let config_dir = resolve_config_dir(cli.config_dir.as_deref())?;
    let config = AppConfig::load(&config_dir).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    });
    info!(dir = %config_dir.display(), "starting tbunny");

    let manager = Arc::new(Manager::load(
        &config_dir,
        Arc::new(HttpConnector::default()),
        config.connection_timeout(),
    ));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    if config.ui.enable_mouse {
        execute!(stdout, EnableMouseCapture)?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, manager, &config).await;

    // Restore terminal
    disable_raw_mode()?;
    if config.ui.enable_mouse {
        execute!(terminal.backend_mut(), DisableMouseCapture)?;
    }
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn init_logging(path: &Path) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    manager: Arc<Manager>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let tick_rate = Duration::from_millis(100);
    let mut event_handler = EventHandler::new(tick_rate);

    let mut app = App::new(manager, event_handler.sender());
    app.splash_until = Some(Instant::now() + config.ui.splash_duration());
    app.start();

    while app.running {
        terminal.draw(|frame| ui::draw(frame, &app))?;

        match event_handler.next().await {
            Some(AppEvent::Key(key)) => app.handle_key(key),
            Some(AppEvent::Data(data)) => app.apply(data),
            Some(AppEvent::Resize(_, _) | AppEvent::Tick) => {}
            None => break,
        }
    }

    app.shutdown();
    info!("tbunny stopped");
    Ok(())
}
