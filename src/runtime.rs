use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CtEvent, KeyEvent};

use crate::app::Command;
use crate::peer::PeerMessage;

pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Unified event type consumed by the app runner
#[derive(Clone, Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Resize,
    Tick,
    Peer(PeerMessage),
}

/// Source of app events (keyboard, resize, peer messages)
pub trait AppEventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    fn recv_timeout(&self, timeout: Duration) -> Result<AppEvent, RecvTimeoutError>;

    /// Block until an event arrives; `None` once every producer is gone.
    fn recv(&self) -> Option<AppEvent>;
}

/// Production event source using crossterm. Other producers (the peer
/// reader) feed the same queue through [`CrosstermEventSource::sender`].
pub struct CrosstermEventSource {
    tx: Sender<AppEvent>,
    rx: Receiver<AppEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let key_tx = tx.clone();

        std::thread::spawn(move || loop {
            match event::read() {
                Ok(CtEvent::Key(key)) => {
                    if key_tx.send(AppEvent::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(CtEvent::Resize(_, _)) => {
                    if key_tx.send(AppEvent::Resize).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        });

        Self { tx, rx }
    }

    pub fn sender(&self) -> Sender<AppEvent> {
        self.tx.clone()
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AppEventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<AppEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    fn recv(&self) -> Option<AppEvent> {
        self.rx.recv().ok()
    }
}

/// Test event source for unit tests
pub struct TestEventSource {
    rx: Receiver<AppEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<AppEvent>) -> Self {
        Self { rx }
    }
}

impl AppEventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<AppEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    fn recv(&self) -> Option<AppEvent> {
        self.rx.recv().ok()
    }
}

/// Fixed-cadence schedule that only fires while armed. Holds no domain
/// state; callers pass the current instant so tests control time.
#[derive(Clone, Copy, Debug)]
pub struct Ticker {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// Arms the schedule; already armed tickers keep their cadence
    pub fn start(&mut self, now: Instant) {
        if self.next_due.is_none() {
            self.next_due = Some(now + self.interval);
        }
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    /// Time left until the next tick; `None` while stopped
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.next_due
            .map(|due| due.saturating_duration_since(now))
    }

    /// Returns true when a tick is due and schedules the following one.
    /// Periods missed while the caller was busy collapse into this tick.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(mut due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }
        while due <= now {
            due += self.interval;
        }
        self.next_due = Some(due);
        true
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new(TICK_INTERVAL)
    }
}

/// Runner that advances the application one event/tick at a time
pub struct Runner<E: AppEventSource> {
    event_source: E,
    ticker: Ticker,
}

impl<E: AppEventSource> Runner<E> {
    pub fn new(event_source: E, ticker: Ticker) -> Self {
        Self {
            event_source,
            ticker,
        }
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn ticker_mut(&mut self) -> &mut Ticker {
        &mut self.ticker
    }

    /// Carries out an app command on the ticker. Returns false on quit.
    pub fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Quit => return false,
            Command::StartTicker => self.ticker.start(Instant::now()),
            Command::StopTicker => self.ticker.stop(),
            Command::Continue => {}
        }
        true
    }

    /// Returns the next event, or Tick when the armed ticker comes due
    /// first. While the ticker is stopped this blocks on events alone.
    /// `None` means the event source has shut down.
    pub fn step(&mut self) -> Option<AppEvent> {
        let now = Instant::now();
        let Some(wait) = self.ticker.time_until_due(now) else {
            return self.event_source.recv();
        };

        if !wait.is_zero() {
            match self.event_source.recv_timeout(wait) {
                Ok(ev) => return Some(ev),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }

        self.ticker.poll(Instant::now());
        Some(AppEvent::Tick)
    }
}
