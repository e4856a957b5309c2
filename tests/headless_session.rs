use std::sync::mpsc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use pumprate::app::{App, Command};
use pumprate::clock::{Clock, ManualClock};
use pumprate::peer::{PeerSync, Role};
use pumprate::runtime::{AppEvent, Runner, TestEventSource, Ticker};
use pumprate::session::{SessionSnapshot, SessionState};
use pumprate::settings::SettingsStore;

fn key(c: char) -> AppEvent {
    AppEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
}

// Headless loop: the same dispatch main.rs runs, minus the terminal.
// Stops after `max_steps` events, on quit, or once `until_key` keys were handled.
fn drive(
    runner: &mut Runner<TestEventSource>,
    app: &mut App,
    max_steps: u32,
    until_key: Option<u32>,
) -> u32 {
    let mut ticks = 0;
    let mut keys = 0;
    for _ in 0..max_steps {
        let Some(event) = runner.step() else { break };
        let command = match event {
            AppEvent::Tick => {
                ticks += 1;
                app.on_tick();
                Command::Continue
            }
            AppEvent::Resize => Command::Continue,
            AppEvent::Peer(message) => {
                app.on_peer(&message);
                Command::Continue
            }
            AppEvent::Key(key) => {
                keys += 1;
                app.on_key(key)
            }
        };
        if !runner.apply(command) {
            break;
        }
        if until_key == Some(keys) {
            break;
        }
    }
    ticks
}

#[test]
fn tap_arms_ticker_and_reset_disarms_it() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    let session = SessionState::open(SettingsStore::in_memory(), clock.now());
    let mut app = App::new(session, PeerSync::offline(Role::Primary), clock.clone());

    let (tx, rx) = mpsc::channel();
    let mut runner = Runner::new(
        TestEventSource::new(rx),
        Ticker::new(Duration::from_millis(5)),
    );

    tx.send(key(' ')).unwrap();
    drive(&mut runner, &mut app, 10, Some(1));
    assert!(app.is_running());
    assert!(runner.ticker().is_running());

    clock.advance(chrono::Duration::seconds(6));
    tx.send(key(' ')).unwrap();
    drive(&mut runner, &mut app, 100, Some(1));
    assert_eq!(app.session.spm(), Some(10.0));

    clock.advance(chrono::Duration::seconds(24));
    let ticks = drive(&mut runner, &mut app, 3, None);
    assert_eq!(ticks, 3, "ticker should fire while running");

    let m = app.metrics.expect("metrics while running");
    assert!((m.pump_rate - 0.056).abs() < 1e-12);
    assert!((m.volume_displaced - 0.028).abs() < 1e-12);

    tx.send(key('r')).unwrap();
    drive(&mut runner, &mut app, 100, Some(1));
    assert!(!app.is_running());
    assert!(!runner.ticker().is_running());
    assert!(app.metrics.is_none());
}

#[test]
fn quit_key_ends_loop() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    let session = SessionState::open(SettingsStore::in_memory(), clock.now());
    let mut app = App::new(session, PeerSync::offline(Role::Secondary), clock);

    let (tx, rx) = mpsc::channel();
    let mut runner = Runner::new(TestEventSource::new(rx), Ticker::default());
    tx.send(key('q')).unwrap();
    tx.send(key(' ')).unwrap();
    drive(&mut runner, &mut app, 10, None);
    assert!(!app.is_running(), "events after quit are not processed");
}

#[test]
fn resumed_session_ticks_without_a_tap() {
    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    let mut store = SettingsStore::in_memory();
    store
        .save_snapshot(&SessionSnapshot {
            start_time: Some(t0),
            tap_count: 1,
            spm: 10.0,
        })
        .unwrap();

    let clock = ManualClock::new(t0 + chrono::Duration::seconds(30));
    let session = SessionState::open(store, clock.now());
    let mut app = App::new(session, PeerSync::offline(Role::Primary), clock.clone());

    let (_tx, rx) = mpsc::channel();
    let mut runner = Runner::new(
        TestEventSource::new(rx),
        Ticker::new(Duration::from_millis(5)),
    );
    assert!(runner.apply(app.startup_command()));
    assert!(runner.ticker().is_running());

    let before = app.metrics.expect("metrics for resumed session").volume_displaced;
    assert!((before - 0.028).abs() < 1e-12);

    clock.advance(chrono::Duration::seconds(30));
    let ticks = drive(&mut runner, &mut app, 2, None);
    assert_eq!(ticks, 2);
    let after = app.metrics.unwrap().volume_displaced;
    assert!((after - 0.056).abs() < 1e-12);
}
