use cpal::traits::{DeviceTrait, HostTrait};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, info};

use crate::error::{AgentError, AgentResult};

/// Owns a cpal stream on its own thread. Dropping it stops the stream and
/// releases the device.
///
/// cpal streams are not `Send` on every host, so the stream is built, played
/// and dropped on the same thread; only the handle crosses threads.
pub struct DeviceThread {
    name: &'static str,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceThread {
    /// Runs `build` on a fresh thread and waits for it to report.
    ///
    /// Blocks the caller until the device is open or has failed to open.
    pub fn spawn<T, F>(name: &'static str, build: F) -> AgentResult<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<(cpal::Stream, T)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<T, String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(format!("duplex-{}", name))
            .spawn(move || match build() {
                Ok((stream, value)) => {
                    if ready_tx.send(Ok(value)).is_err() {
                        return;
                    }
                    // Sender dropped or explicit stop: either way we are done.
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("[{}] stream released", name);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{:#}", e)));
                }
            })
            .map_err(|e| AgentError::DeviceUnavailable(format!("{} thread: {}", name, e)))?;

        let mut thread = Self {
            name,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        };

        match ready_rx.recv() {
            Ok(Ok(value)) => {
                info!("[{}] device open", name);
                Ok((thread, value))
            }
            Ok(Err(msg)) => {
                thread.shutdown();
                Err(AgentError::DeviceUnavailable(msg))
            }
            Err(_) => {
                thread.shutdown();
                Err(AgentError::DeviceUnavailable(format!("{} thread exited during setup", name)))
            }
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("[{}] device thread panicked", self.name);
            }
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn find_input_device(
    host: &cpal::Host,
    pattern: Option<&str>,
) -> anyhow::Result<cpal::Device> {
    match pattern {
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No input device available")),
        Some(p) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n.contains(p)).unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("No input device matching '{}'", p)),
    }
}

pub(crate) fn find_output_device(
    host: &cpal::Host,
    pattern: Option<&str>,
) -> anyhow::Result<cpal::Device> {
    match pattern {
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No output device available")),
        Some(p) => host
            .output_devices()?
            .find(|d| d.name().map(|n| n.contains(p)).unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("No output device matching '{}'", p)),
    }
}
