//! Operator confirmation between captures

use std::io::{self, BufRead, Write};

use flume::{Receiver, Sender};

/// Blocks the acquisition loop until the next capture may proceed.
pub trait ContinueGate {
    /// Called after frame `index` has been persisted.
    fn wait(&mut self, index: u32) -> io::Result<()>;

    /// Called once before the program exits.
    fn wait_exit(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads a line from standard input for every confirmation.
#[derive(Debug, Default)]
pub struct StdinGate;

impl StdinGate {
    fn read_line(prompt: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{prompt}")?;
        stdout.flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(())
    }
}

impl ContinueGate for StdinGate {
    fn wait(&mut self, index: u32) -> io::Result<()> {
        Self::read_line(&format!("Image {index} done. Press Enter for the next capture..."))
    }

    fn wait_exit(&mut self) -> io::Result<()> {
        Self::read_line("Press Enter to exit...")
    }
}

/// Never blocks.
#[derive(Debug, Default)]
pub struct AutoContinue;

impl ContinueGate for AutoContinue {
    fn wait(&mut self, _index: u32) -> io::Result<()> {
        Ok(())
    }
}

/// Waits for a unit message per capture; lets another thread or a test
/// drive the loop.
pub struct ChannelGate {
    rx: Receiver<()>,
}

impl ChannelGate {
    pub fn new(rx: Receiver<()>) -> Self {
        Self { rx }
    }

    pub fn channel() -> (Sender<()>, Self) {
        let (tx, rx) = flume::unbounded();
        (tx, Self::new(rx))
    }
}

impl ContinueGate for ChannelGate {
    fn wait(&mut self, _index: u32) -> io::Result<()> {
        self.rx
            .recv()
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
    }
}
