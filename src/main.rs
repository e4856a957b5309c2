use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use log::{error, info, warn};
use pumprate::{
    app::{App, Command},
    app_dirs::AppDirs,
    clock::{Clock, SystemClock},
    config::{Config, ConfigStore, FileConfigStore},
    logging::init_logging,
    peer::{PeerSync, Role, UdpLink},
    runtime::{AppEvent, CrosstermEventSource, Runner, Ticker},
    session::SessionState,
    settings::{SettingsStore, SqliteDefaults},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    io::{self, stdin},
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

/// tap once per pump stroke; see strokes per minute, pump rate and volume away
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "A tap-per-stroke pump rate calculator. Tap once per pump stroke to get strokes per minute, pump rate and cumulative volume. Sessions survive restarts, and a paired secondary mirrors the primary's coefficient."
)]
pub struct Cli {
    /// role of this instance in a primary/secondary pairing
    #[clap(long, value_enum)]
    role: Option<Role>,

    /// local address for the peer link
    #[clap(short = 'b', long)]
    bind: Option<SocketAddr>,

    /// address of the paired device
    #[clap(short = 'P', long)]
    peer: Option<SocketAddr>,

    /// settings database path
    #[clap(long)]
    db: Option<PathBuf>,

    /// log level written to the log file (trace, debug, info, warn, error, off)
    #[clap(long)]
    log_level: Option<String>,

    /// ticker interval for elapsed/volume refresh, in milliseconds
    #[clap(long)]
    tick_ms: Option<u64>,
}

impl Cli {
    /// Overlay command-line flags on the persisted config
    fn apply_to(&self, mut cfg: Config) -> Config {
        if let Some(role) = self.role {
            cfg.role = role;
        }
        if let Some(bind) = self.bind {
            cfg.bind = bind;
        }
        if self.peer.is_some() {
            cfg.peer = self.peer;
        }
        if self.db.is_some() {
            cfg.db_path = self.db.clone();
        }
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }
        if let Some(ms) = self.tick_ms {
            cfg.tick_ms = ms;
        }
        cfg
    }
}

fn store_path(cfg: &Config, state_dir: Option<&Path>) -> PathBuf {
    match (&cfg.db_path, state_dir) {
        (Some(path), _) => path.clone(),
        (None, Some(dir)) => AppDirs::db_path_in(dir, cfg.role),
        (None, None) => PathBuf::from(format!("pumprate_defaults-{}.db", cfg.role)),
    }
}

fn open_store(cfg: &Config) -> Result<SettingsStore, Box<dyn Error>> {
    let path = store_path(cfg, AppDirs::state_dir().as_deref());
    Ok(SettingsStore::new(SqliteDefaults::open(path)?))
}

fn open_link(cfg: &Config) -> Option<UdpLink> {
    let peer = cfg.peer?;
    match UdpLink::connect(cfg.bind, peer) {
        Ok(link) => Some(link),
        Err(e) => {
            warn!("peer link to {peer} unavailable: {e}");
            None
        }
    }
}

fn build_app(cfg: &Config) -> Result<(App, Option<UdpLink>), Box<dyn Error>> {
    let mut store = open_store(cfg)?;
    let launch_count = match store.increment_launch_count() {
        Ok(n) => n,
        Err(e) => {
            error!("failed to bump launch counter: {e}");
            0
        }
    };
    info!("launch #{launch_count} as {}", cfg.role);

    let clock = SystemClock;
    let session = SessionState::open(store, clock.now());
    let mut app = App::new(session, PeerSync::offline(cfg.role), clock);
    app.launch_count = launch_count;
    Ok((app, open_link(cfg)))
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let config_store = FileConfigStore::new();
    let cfg = cli.apply_to(config_store.load());
    if let Err(e) = config_store.save(&cfg) {
        eprintln!(
            "warning: could not save config to {}: {e}",
            config_store.path().display()
        );
    }

    if let Some(log_dir) = AppDirs::log_dir() {
        // the calculator still runs without a log file
        if let Err(e) = init_logging(&cfg.log_level, &log_dir) {
            eprintln!("warning: logging disabled: {e}");
        }
    }

    let (app, link) = build_app(&cfg)?;

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = start_tui(&mut terminal, app, link, &cfg);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen,)?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    link: Option<UdpLink>,
    cfg: &Config,
) -> Result<(), Box<dyn Error>> {
    let events = CrosstermEventSource::new();

    if let Some(link) = link {
        link.spawn_reader(events.sender())?;
        app.peer = PeerSync::new(cfg.role, link);
        app.on_link_established();
    }

    let mut runner = Runner::new(events, Ticker::new(Duration::from_millis(cfg.tick_ms.max(1))));
    runner.apply(app.startup_command());

    terminal.draw(|f| f.render_widget(&app, f.area()))?;

    while let Some(event) = runner.step() {
        let command = match event {
            AppEvent::Tick => {
                app.on_tick();
                Command::Continue
            }
            AppEvent::Resize => Command::Continue,
            AppEvent::Peer(message) => {
                app.on_peer(&message);
                Command::Continue
            }
            AppEvent::Key(key) => app.on_key(key),
        };

        if !runner.apply(command) {
            break;
        }

        terminal.draw(|f| f.render_widget(&app, f.area()))?;
    }

    Ok(())
}
