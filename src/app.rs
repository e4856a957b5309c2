use crate::clock::Clock;
use crate::error::Error;
use crate::format;
use crate::parameters::{parse_coefficient, parse_efficiency};
use crate::peer::{PeerMessage, PeerSync, Role, SyncOutcome};
use crate::session::{DerivedMetrics, SessionState, TapOutcome};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use log::{info, warn};
use webbrowser::Browser;

pub const PROMO_URL: &str = "https://apps.apple.com/app/id1140689878";
pub const INVALID_VALUE_NOTICE: &str = "Invalid Value: Enter a numeric value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Coefficient,
    Efficiency,
}

/// What the event loop should do with the ticker after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Continue,
    StartTicker,
    StopTicker,
    Quit,
}

pub struct App {
    pub session: SessionState,
    pub peer: PeerSync,
    clock: Box<dyn Clock>,
    pub metrics: Option<DerivedMetrics>,
    pub coefficient_text: String,
    pub efficiency_text: String,
    pub editing: Option<Field>,
    pub notice: Option<String>,
    pub launch_count: u64,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("session", &self.session)
            .field("peer", &self.peer)
            .field("metrics", &self.metrics)
            .field("editing", &self.editing)
            .field("notice", &self.notice)
            .finish_non_exhaustive()
    }
}

impl App {
    pub fn new(session: SessionState, peer: PeerSync, clock: impl Clock + 'static) -> Self {
        let params = session.parameters();
        let mut app = Self {
            session,
            peer,
            clock: Box::new(clock),
            metrics: None,
            coefficient_text: format::coefficient(params.coefficient),
            efficiency_text: format::efficiency(params.efficiency),
            editing: None,
            notice: None,
            launch_count: 0,
        };
        app.refresh();
        app
    }

    pub fn role(&self) -> Role {
        self.peer.role()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// A session resumed from the store keeps ticking without a fresh tap
    pub fn startup_command(&self) -> Command {
        if self.is_running() {
            Command::StartTicker
        } else {
            Command::Continue
        }
    }

    fn refresh(&mut self) {
        self.metrics = self.session.recompute_derived(self.clock.now());
    }

    pub fn on_tick(&mut self) {
        self.refresh();
    }

    pub fn on_tap(&mut self) -> Command {
        let outcome = self.session.tap(self.clock.now());
        self.refresh();
        match outcome {
            TapOutcome::Started => Command::StartTicker,
            TapOutcome::Counted { .. } | TapOutcome::Ignored => Command::Continue,
        }
    }

    pub fn on_reset(&mut self) -> Command {
        self.session.reset();
        self.metrics = None;
        Command::StopTicker
    }

    /// Called once the peer link is up
    pub fn on_link_established(&self) {
        self.peer.on_link_established(&self.session);
    }

    pub fn on_peer(&mut self, message: &PeerMessage) {
        if let SyncOutcome::CoefficientApplied(value) = self.peer.handle(message, &mut self.session)
        {
            if self.editing != Some(Field::Coefficient) {
                self.coefficient_text = format::coefficient(value);
            }
            self.refresh();
        }
    }

    pub fn begin_edit(&mut self, field: Field) {
        if self.role() != Role::Primary {
            return;
        }
        self.editing = Some(field);
    }

    fn text_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Coefficient => &mut self.coefficient_text,
            Field::Efficiency => &mut self.efficiency_text,
        }
    }

    fn revert_text(&mut self, field: Field) {
        let params = self.session.parameters();
        *self.text_mut(field) = match field {
            Field::Coefficient => format::coefficient(params.coefficient),
            Field::Efficiency => format::efficiency(params.efficiency),
        };
    }

    /// Applies the edited text. Bad input reverts the field to the stored
    /// value and raises a notice; the session is left untouched.
    pub fn commit_edit(&mut self) -> Result<(), Error> {
        let Some(field) = self.editing.take() else {
            return Ok(());
        };

        let result = match field {
            Field::Coefficient => parse_coefficient(&self.coefficient_text)
                .and_then(|v| self.session.update_coefficient(v).map(|_| v)),
            Field::Efficiency => parse_efficiency(&self.efficiency_text)
                .and_then(|v| self.session.update_efficiency(v).map(|_| v)),
        };

        match result {
            Ok(value) => {
                self.revert_text(field);
                if field == Field::Coefficient {
                    self.peer.publish_coefficient(value);
                }
                self.refresh();
                Ok(())
            }
            Err(e) => {
                warn!("rejected {field:?} input: {e}");
                self.revert_text(field);
                self.notice = Some(INVALID_VALUE_NOTICE.to_string());
                Err(e)
            }
        }
    }

    pub fn cancel_edit(&mut self) {
        if let Some(field) = self.editing.take() {
            self.revert_text(field);
        }
    }

    fn open_promo(&self) {
        if Browser::is_available() {
            if let Err(e) = webbrowser::open(PROMO_URL) {
                warn!("failed to open promo link: {e}");
            }
        } else {
            info!("no browser available for promo link");
        }
    }

    pub fn on_key(&mut self, key: KeyEvent) -> Command {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Command::Quit;
        }

        if let Some(field) = self.editing {
            match key.code {
                KeyCode::Enter => {
                    let _ = self.commit_edit();
                }
                KeyCode::Esc => self.cancel_edit(),
                KeyCode::Backspace => {
                    self.text_mut(field).pop();
                }
                KeyCode::Char(c) => self.text_mut(field).push(c),
                _ => {}
            }
            return Command::Continue;
        }

        // any key acknowledges an open notice
        if self.notice.take().is_some() {
            return Command::Continue;
        }

        match key.code {
            KeyCode::Char(' ') | KeyCode::Enter => self.on_tap(),
            KeyCode::Char('r') => self.on_reset(),
            KeyCode::Char('c') => {
                self.begin_edit(Field::Coefficient);
                Command::Continue
            }
            KeyCode::Char('e') => {
                self.begin_edit(Field::Efficiency);
                Command::Continue
            }
            KeyCode::Char('p') => {
                self.open_promo();
                Command::Continue
            }
            KeyCode::Char('q') | KeyCode::Esc => Command::Quit,
            _ => Command::Continue,
        }
    }
}
