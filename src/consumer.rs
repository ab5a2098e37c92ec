//! Console consumer - prints every frame for testing and debugging
//!
//! Stands in for an OS touch-injection backend: frames arrive over the
//! bounded channel fed by [`ChannelSink`](crate::frame::ChannelSink) and are
//! printed one line per contact.

use colored::*;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::contact::{Contact, ContactState};
use crate::frame::Frame;

/// Counters reported when the consumer stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerTotals {
    pub frames: u64,
    pub contacts: u64,
    pub new: u64,
    pub moved: u64,
    pub removed: u64,
}

impl ConsumerTotals {
    fn record(&mut self, frame: &Frame) {
        self.frames += 1;
        for contact in &frame.contacts {
            self.contacts += 1;
            match contact.state {
                ContactState::New => self.new += 1,
                ContactState::Moved => self.moved += 1,
                ContactState::Removed => self.removed += 1,
            }
        }
    }
}

/// Prints frames to stdout
pub struct ConsoleConsumer {
    name: String,
    /// Print frames without contacts too
    show_empty: bool,
    totals: ConsumerTotals,
}

impl ConsoleConsumer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            show_empty: false,
            totals: ConsumerTotals::default(),
        }
    }

    pub fn show_empty(mut self, enabled: bool) -> Self {
        self.show_empty = enabled;
        self
    }

    pub fn totals(&self) -> ConsumerTotals {
        self.totals
    }

    /// Handle one frame
    pub fn consume(&mut self, frame: &Frame) {
        self.totals.record(frame);

        if frame.contacts.is_empty() && !self.show_empty {
            return;
        }

        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
        println!(
            "[{}] {} frame {} ({} contact(s))",
            timestamp.dimmed(),
            self.name.bright_white(),
            frame.sequence,
            frame.contacts.len()
        );
        for contact in &frame.contacts {
            println!("    {}", format_contact(contact));
        }

        debug!(
            consumer = self.name,
            sequence = frame.sequence,
            contacts = frame.contacts.len(),
            "Frame consumed"
        );
    }

    /// Consume frames until every sender is gone
    pub async fn run(mut self, mut rx: mpsc::Receiver<Frame>) -> ConsumerTotals {
        info!("🖥️  Console consumer '{}' started", self.name);

        while let Some(frame) = rx.recv().await {
            self.consume(&frame);
        }

        let totals = self.totals;
        info!(
            "🛑 Console consumer '{}' stopped ({} frames, {} contacts: {} new, {} moved, {} removed)",
            self.name, totals.frames, totals.contacts, totals.new, totals.moved, totals.removed
        );
        totals
    }
}

/// One contact as a colored console line
pub fn format_contact(contact: &Contact) -> String {
    let state = format!("{:<7}", contact.state.to_string());
    let state = match contact.state {
        ContactState::New => state.bright_green(),
        ContactState::Moved => state.bright_yellow(),
        ContactState::Removed => state.bright_red(),
    };

    format!(
        "{} {:>6} at ({:>7.1}, {:>7.1}) {}x{}",
        state,
        contact.id.to_string(),
        contact.position.x,
        contact.position.y,
        contact.width,
        contact.height
    )
}
