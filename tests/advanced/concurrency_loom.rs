#![cfg(all(feature = "advanced-tests", loom))]
//! Model checks for [`StateCell`] transitions.
//!
//! `loom` explores every interleaving of the racing threads to confirm that
//! exactly one caller wins each lifecycle edge.

use loom::{model, sync::Arc, thread};
use wiresession::lifecycle::{LifecycleState, RestartPolicy, StateCell, StopTicket};

#[test]
fn one_of_two_starters_wins() {
    model(|| {
        let cell = Arc::new(StateCell::new());
        let racers: Vec<_> = (0..2)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || cell.begin_start().is_ok())
            })
            .collect();

        let wins = racers
            .into_iter()
            .map(|racer| racer.join().expect("starter panicked"))
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(cell.get(), LifecycleState::Starting);
    });
}

#[test]
fn one_of_two_stoppers_wins() {
    model(|| {
        let cell = Arc::new(StateCell::new());
        cell.begin_start().expect("start");
        cell.finish_start().expect("running");

        let racers: Vec<_> = (0..2)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    let ticket = cell.begin_stop();
                    if ticket == StopTicket::Won {
                        assert!(cell.finish_stop());
                    }
                    ticket
                })
            })
            .collect();

        let tickets: Vec<_> = racers
            .into_iter()
            .map(|racer| racer.join().expect("stopper panicked"))
            .collect();

        assert_eq!(tickets.iter().filter(|t| **t == StopTicket::Won).count(), 1);
        assert!(tickets.contains(&StopTicket::AlreadyStopping));
        assert_eq!(cell.get(), LifecycleState::Stopped);
    });
}

#[test]
fn failed_start_races_with_stop() {
    model(|| {
        let cell = Arc::new(StateCell::new());
        cell.begin_start().expect("start");

        let stopper = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.begin_stop())
        };
        let reverted = cell.abort_start(RestartPolicy::Retry);
        let ticket = stopper.join().expect("stopper panicked");

        assert_eq!(reverted, LifecycleState::None);
        assert!(matches!(ticket, StopTicket::NotRunning(_)));
        assert_eq!(cell.get(), LifecycleState::None);
    });
}
