//! Messages sent to the drainer threads

use std::sync::mpsc::{SendError, Sender};

#[derive(Debug)]
pub enum DrainerMessageOut {
    Shutdown,
}

/// Interface to communicate with a drainer thread
pub trait DrainerThread {
    fn shutdown(&self);
}

#[derive(Debug, Clone)]
pub struct DrainerSender(Sender<DrainerMessageOut>);

impl DrainerThread for DrainerSender {
    fn shutdown(&self) {
        // The thread may have already exited after an unrecoverable error, that's fine.
        self.0
            .send(DrainerMessageOut::Shutdown)
            .unwrap_or_else(|SendError(_)| log::debug!("Drainer thread already gone"))
    }
}

impl From<Sender<DrainerMessageOut>> for DrainerSender {
    fn from(s: Sender<DrainerMessageOut>) -> Self {
        DrainerSender(s)
    }
}
