// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;

const PLAY: &str = "play";
const STOP: &str = "stop";
const TOGGLE: &str = "toggle";
const BPM: &str = "bpm";
const SWING: &str = "swing";
const VOLUME: &str = "volume";
const STEP: &str = "step";
const QUIT: &str = "quit";

/// A controller that drives the transport from lines typed on stdin.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Parses a single command line. Returns None for anything unrecognized.
    fn parse(input: &str) -> Option<Event> {
        let input = input.trim().to_lowercase();
        let mut parts = input.split_whitespace();
        let command = parts.next()?;
        let argument = parts.next();
        if parts.next().is_some() {
            return None;
        }

        match (command, argument) {
            (PLAY, None) => Some(Event::Play),
            (STOP, None) => Some(Event::Stop),
            // An empty line is the spacebar.
            (TOGGLE, None) => Some(Event::Toggle),
            (STEP, None) => Some(Event::Step),
            (QUIT, None) => Some(Event::Quit),
            (BPM, Some(value)) => value.parse().ok().map(Event::Bpm),
            (SWING, Some(value)) => value.parse().ok().map(Event::Swing),
            (VOLUME, Some(value)) => value.parse().ok().map(Event::Volume),
            _ => None,
        }
    }

    /// Reads and forwards one command. Returns false once input is exhausted or the user
    /// quits.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({}, {}, {}, {} <n>, {} <n>, {} <n>, {}, {}): ",
            PLAY, STOP, TOGGLE, BPM, SWING, VOLUME, STEP, QUIT,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }

        let event = if input.trim().is_empty() {
            Some(Event::Toggle)
        } else {
            Driver::parse(&input)
        };
        match event {
            Some(event) => {
                let quit = event == Event::Quit;
                events_tx.blocking_send(event).map_err(io::Error::other)?;
                Ok(!quit)
            }
            None => {
                warn!(input = input.trim(), "Unrecognized input");
                Ok(true)
            }
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            Ok(())
        })
    }
}
