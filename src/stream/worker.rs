//! Per-channel worker threads for offline threaded processing.
//!
//! Each worker owns its channel's processing half outright and drains the
//! input ring into the output ring. The orchestrator nudges workers with
//! `data_available` after writing input; workers nudge back on
//! `space_available` after consuming. Both waits are bounded so a stalled
//! peer can never wedge the other side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error};

use crate::stream::channel::ChannelProcessor;

/// Bounded wait on either signal channel.
pub(crate) const SIGNAL_WAIT: Duration = Duration::from_millis(500);

/// A running channel worker.
pub(crate) struct ChannelWorker {
    pub(crate) channel: usize,
    data_tx: Sender<()>,
    handle: Option<JoinHandle<Option<ChannelProcessor>>>,
}

impl ChannelWorker {
    /// Spawns the worker thread for `processor`.
    ///
    /// The thread is started before the processor is handed over, so a
    /// failed spawn returns the processor and the caller falls back to
    /// inline processing.
    pub fn spawn(
        channel: usize,
        processor: ChannelProcessor,
        space_tx: Sender<()>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<ChannelWorker, ChannelProcessor> {
        let (data_tx, data_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
        let (proc_tx, proc_rx) = crossbeam_channel::bounded::<ChannelProcessor>(1);

        let spawned = std::thread::Builder::new()
            .name(format!("stretch-worker-{}", channel))
            .spawn(move || {
                // The processor arrives right after a successful spawn.
                let mut processor = proc_rx.recv().ok()?;
                run(channel, &mut processor, &data_rx, &space_tx, &shutdown);
                Some(processor)
            });

        match spawned {
            Ok(handle) => {
                // The channel has capacity and the receiver is alive; this
                // send cannot fail.
                let _ = proc_tx.send(processor);
                Ok(ChannelWorker {
                    channel,
                    data_tx,
                    handle: Some(handle),
                })
            }
            Err(err) => {
                error!("could not spawn worker for channel {}: {}", channel, err);
                Err(processor)
            }
        }
    }

    /// Signals that new input is queued.
    pub fn notify_data(&self) {
        let _ = self.data_tx.try_send(());
    }

    /// Joins the worker thread, waking it first, and hands the channel's
    /// processing half back.
    pub fn join(mut self) -> Option<ChannelProcessor> {
        let _ = self.data_tx.try_send(());
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(processor) => processor,
            Err(_) => {
                error!("worker for channel {} panicked", self.channel);
                None
            }
        }
    }
}

fn run(
    channel: usize,
    processor: &mut ChannelProcessor,
    data_rx: &Receiver<()>,
    space_tx: &Sender<()>,
    shutdown: &AtomicBool,
) {
    debug!("worker {} started", channel);
    loop {
        let progressed = processor.process_chunks();
        if progressed {
            let _ = space_tx.try_send(());
        }

        if processor.shared().output_complete() {
            let _ = space_tx.try_send(());
            break;
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if !progressed {
            match data_rx.recv_timeout(SIGNAL_WAIT) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
    debug!("worker {} finished", channel);
}
