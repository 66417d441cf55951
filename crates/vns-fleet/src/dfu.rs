//! Firmware update across a batch of devices.
//!
//! Every device runs through the same phases, and each phase is a fan-out over
//! the devices still in play:
//!
//! ```text
//! Idle -> BootRequested -> Rebooting -> AwaitingReconnect -> Uploading -> Rebooting -> Done
//!   \____________________________|_______________|_______________|___________/
//!                                          Failed
//! ```
//!
//! 1. Connect in application mode.
//! 2. Request the bootloader (`dfu`).
//! 3. Reset.
//! 4. Wait once for the whole batch to re-enumerate.
//! 5. Reconnect in bootloader mode with a fresh session.
//! 6. Upload the image, publishing progress.
//! 7. Reset back into the application.
//!
//! A device that fails a phase is marked [`DfuPhase::Failed`] and skips every
//! later phase; it is never retried. Its siblings carry on.

use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};
use vns_session::{DeviceAddress, DeviceError, DeviceSession, Management, Transport};

use crate::config::DfuConfig;
use crate::orchestrator::{fan_out, Batch, Connector, Orchestrator};

/// Phase of one device's update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuPhase {
    /// Not started.
    Idle,
    /// Connected; bootloader requested.
    BootRequested,
    /// Reset issued.
    Rebooting,
    /// Waiting for the bootloader to come up.
    AwaitingReconnect,
    /// Image transfer in progress.
    Uploading,
    /// Update complete; device reset into the new image.
    Done,
    /// A phase failed; see [`DfuJob::error`].
    Failed,
}

impl fmt::Display for DfuPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DfuPhase::Idle => "idle",
            DfuPhase::BootRequested => "boot-requested",
            DfuPhase::Rebooting => "rebooting",
            DfuPhase::AwaitingReconnect => "awaiting-reconnect",
            DfuPhase::Uploading => "uploading",
            DfuPhase::Done => "done",
            DfuPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Update state of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DfuJob {
    /// Position in the input batch.
    pub index: usize,
    /// Device address.
    pub address: DeviceAddress,
    /// Current phase.
    pub phase: DfuPhase,
    /// Phase in which the job failed, with the cause.
    pub error: Option<(DfuPhase, DeviceError)>,
}

impl DfuJob {
    fn new(index: usize, address: DeviceAddress) -> Self {
        DfuJob {
            index,
            address,
            phase: DfuPhase::Idle,
            error: None,
        }
    }

    /// Whether the job is still in play.
    pub fn is_active(&self) -> bool {
        !matches!(self.phase, DfuPhase::Failed | DfuPhase::Done)
    }

    /// Phase the job failed in, if it failed.
    pub fn failed_during(&self) -> Option<DfuPhase> {
        self.error.as_ref().map(|(phase, _)| *phase)
    }

    fn advance(&mut self, phase: DfuPhase) {
        debug!(address = %self.address, from = %self.phase, to = %phase, "dfu phase");
        self.phase = phase;
    }

    fn fail(&mut self, error: DeviceError) {
        warn!(address = %self.address, phase = %self.phase, %error, "dfu failed");
        self.error = Some((self.phase, error));
        self.phase = DfuPhase::Failed;
    }
}

/// Upload progress for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuProgress {
    /// Position in the input batch.
    pub index: usize,
    /// Device address.
    pub address: DeviceAddress,
    /// Bytes acknowledged by the device so far.
    pub offset: usize,
    /// Image size.
    pub total: usize,
}

/// Outcome of a batch update.
#[derive(Debug, Clone)]
pub struct DfuReport {
    /// One job per input address, in input order.
    pub jobs: Vec<DfuJob>,
}

impl DfuReport {
    /// Whether every device reached [`DfuPhase::Done`].
    pub fn is_all_ok(&self) -> bool {
        self.jobs.iter().all(|job| job.phase == DfuPhase::Done)
    }

    /// Jobs that failed, in input order.
    pub fn failures(&self) -> Vec<&DfuJob> {
        self.jobs.iter().filter(|job| job.phase == DfuPhase::Failed).collect()
    }

    /// Per-device outcomes as a [`Batch`].
    pub fn into_batch(self) -> Batch<()> {
        let addresses: Vec<DeviceAddress> =
            self.jobs.iter().map(|job| job.address.clone()).collect();
        let outcomes = self
            .jobs
            .into_iter()
            .map(|job| match job.error {
                Some((_, error)) => Err(error),
                None => Ok(()),
            })
            .collect();
        Batch::new(&addresses, outcomes)
    }
}

type Slots<L> = Vec<Option<DeviceSession<L>>>;

/// Drives a firmware update across a batch of devices.
pub struct DfuSequencer<'a, C: Connector> {
    orchestrator: &'a Orchestrator<C>,
    config: DfuConfig,
    progress: Option<Sender<DfuProgress>>,
}

impl<'a, C> DfuSequencer<'a, C>
where
    C: Connector,
    DeviceSession<C::Link>: Management,
{
    /// Create a sequencer that opens sessions through `orchestrator`.
    pub fn new(orchestrator: &'a Orchestrator<C>, config: DfuConfig) -> Self {
        DfuSequencer {
            orchestrator,
            config,
            progress: None,
        }
    }

    /// Receive upload progress events.
    ///
    /// The channel holds [`DfuConfig::progress_capacity`] events; when the
    /// observer falls behind, new events are dropped rather than slowing the upload.
    pub fn progress(&mut self) -> Receiver<DfuProgress> {
        let (tx, rx) = crossbeam_channel::bounded(self.config.progress_capacity.max(1));
        self.progress = Some(tx);
        rx
    }

    /// Update every device with `image`.
    pub fn run(&self, addresses: &[DeviceAddress], image: Arc<[u8]>) -> DfuReport {
        let mut jobs: Vec<DfuJob> = addresses
            .iter()
            .enumerate()
            .map(|(index, address)| DfuJob::new(index, address.clone()))
            .collect();
        if image.is_empty() {
            for job in &mut jobs {
                job.fail(DeviceError::Malformed("firmware image is empty".to_string()));
            }
            return DfuReport { jobs };
        }
        info!(devices = jobs.len(), bytes = image.len(), "dfu started");

        // 1. Application-mode sessions.
        let mut sessions = self.connect_phase(&mut jobs, |address| {
            self.orchestrator.connect(address)
        });

        // 2. Request the bootloader.
        self.phase(
            &mut jobs,
            &sessions,
            DfuPhase::BootRequested,
            DfuPhase::BootRequested,
            |_, session| session.enter_bootloader(),
        );

        // 3. Reset into it. The application sessions are done after this.
        self.phase(
            &mut jobs,
            &sessions,
            DfuPhase::Rebooting,
            DfuPhase::AwaitingReconnect,
            |_, session| session.reboot(),
        );
        close_all(&sessions);
        sessions.clear();

        // 4. One settle delay for the whole batch.
        if jobs.iter().any(DfuJob::is_active) {
            info!(delay = ?self.config.settle_delay, "waiting for devices to re-enumerate");
            thread::sleep(self.config.settle_delay);
        }

        // 5. Bootloader sessions.
        let sessions = self.connect_phase(&mut jobs, |address| {
            self.orchestrator.connect_with(
                address,
                self.config.reconnect_retries,
                self.config.reconnect_timeout,
            )
        });

        // 6. Upload.
        let total = image.len();
        self.phase(&mut jobs, &sessions, DfuPhase::Uploading, DfuPhase::Uploading, |index, session| {
            let progress = self.progress.clone();
            let address = session.address().clone();
            session.upload_image(
                image.clone(),
                self.config.image_slot,
                self.config.upload_timeout,
                move |offset| {
                    if let Some(tx) = &progress {
                        let _ = tx.try_send(DfuProgress {
                            index,
                            address: address.clone(),
                            offset,
                            total,
                        });
                    }
                },
            )
        });

        // 7. Back to the application.
        self.phase(
            &mut jobs,
            &sessions,
            DfuPhase::Rebooting,
            DfuPhase::Done,
            |_, session| session.reboot(),
        );
        close_all(&sessions);

        let report = DfuReport { jobs };
        info!(
            devices = report.jobs.len(),
            failed = report.failures().len(),
            "dfu finished"
        );
        report
    }

    /// Open a session for every active job; jobs that cannot connect fail.
    fn connect_phase<F>(&self, jobs: &mut [DfuJob], connect: F) -> Slots<C::Link>
    where
        F: Fn(&DeviceAddress) -> vns_session::Result<DeviceSession<C::Link>> + Sync,
    {
        let outcomes = fan_out(&*jobs, |_, job| {
            if job.is_active() {
                Some(connect(&job.address))
            } else {
                None
            }
        });

        jobs.iter_mut()
            .zip(outcomes)
            .map(|(job, outcome)| match outcome {
                Some(Ok(session)) => {
                    if job.phase == DfuPhase::AwaitingReconnect {
                        job.advance(DfuPhase::Uploading);
                    }
                    Some(session)
                }
                Some(Err(e)) => {
                    job.fail(e);
                    None
                }
                None => None,
            })
            .collect()
    }

    /// Run `op` on every active job that has a session.
    ///
    /// Jobs enter `during` before `op` runs and move to `after` when it succeeds.
    fn phase<F>(
        &self,
        jobs: &mut [DfuJob],
        sessions: &Slots<C::Link>,
        during: DfuPhase,
        after: DfuPhase,
        op: F,
    ) where
        F: Fn(usize, &DeviceSession<C::Link>) -> vns_session::Result<()> + Sync,
    {
        let mut active: Vec<(usize, &DeviceSession<C::Link>)> = Vec::new();
        for (job, session) in jobs.iter_mut().zip(sessions) {
            if let (true, Some(session)) = (job.is_active(), session.as_ref()) {
                job.advance(during);
                active.push((job.index, session));
            }
        }

        let outcomes = fan_out(&active, |_, (index, session)| op(*index, session));

        for ((index, _), outcome) in active.iter().zip(outcomes) {
            let job = &mut jobs[*index];
            match outcome {
                Ok(()) if after != during => job.advance(after),
                Ok(()) => {}
                Err(e) => job.fail(e),
            }
        }
    }
}

/// Close every open session at once, so each disconnect deadline runs in parallel.
fn close_all<L: Transport>(sessions: &Slots<L>) {
    fan_out(sessions, |_, slot| {
        if let Some(session) = slot {
            session.close();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_into_batch() {
        let mut ok = DfuJob::new(0, DeviceAddress::new("COM1"));
        ok.phase = DfuPhase::Done;
        let mut failed = DfuJob::new(1, DeviceAddress::new("COM2"));
        failed.phase = DfuPhase::AwaitingReconnect;
        failed.fail(DeviceError::Cancelled);

        let report = DfuReport {
            jobs: vec![ok, failed],
        };
        assert!(!report.is_all_ok());
        assert_eq!(report.failures()[0].failed_during(), Some(DfuPhase::AwaitingReconnect));

        let batch = report.into_batch();
        assert!(batch.get(0).unwrap().is_ok());
        assert_eq!(batch.get(1), Some(&Err(DeviceError::Cancelled)));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(DfuPhase::AwaitingReconnect.to_string(), "awaiting-reconnect");
    }
}
