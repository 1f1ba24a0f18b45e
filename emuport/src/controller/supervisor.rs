//! Emulator supervision.

use std::future::Future;
use std::time::Duration;

use emuport_shared::errors::{EmuportError, EmuportResult};
use tokio::process::Child;
use tokio::time::MissedTickBehavior;

use super::spawn::spawn_emulator;
use crate::runtime::EmuportRuntime;
use crate::runtime::handoff::AllocationResult;
use crate::runtime::types::{InstanceDescriptor, InstanceId, InstanceRelease};
use crate::util::{kill_process, signal_process};

/// How a supervised emulator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// The emulator exited on its own. `code` is `None` when it was killed
    /// by a signal or was not a child of this process.
    Exited { code: Option<i32> },
    /// A shutdown request stopped it. `forced` when SIGKILL was needed
    /// after the grace period.
    Terminated { forced: bool },
}

/// Owns one instance from emulator start to port release.
///
/// Records the emulator pid (the descriptor's single post-creation
/// mutation), waits for the emulator to stop or for a shutdown request,
/// and releases the instance on every path out.
#[derive(Debug, Clone)]
pub struct InstanceSupervisor {
    runtime: EmuportRuntime,
    instance_id: InstanceId,
}

impl InstanceSupervisor {
    pub(crate) fn new(runtime: EmuportRuntime, instance_id: InstanceId) -> Self {
        Self {
            runtime,
            instance_id,
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Replace `PENDING` with the emulator pid and record this process as
    /// the supervisor.
    pub fn adopt(&self, emulator_pid: u32) -> EmuportResult<InstanceDescriptor> {
        let descriptor = self.runtime.inner().registry.record_emulator(
            &self.instance_id,
            emulator_pid,
            self.runtime.pid(),
        )?;
        tracing::info!(
            instance_id = %self.instance_id,
            emulator_pid,
            supervisor_pid = self.runtime.pid(),
            "Adopted emulator"
        );
        Ok(descriptor)
    }

    /// Write the handoff file, spawn the emulator and supervise it until it
    /// exits or `shutdown` resolves.
    pub async fn launch<F>(
        &self,
        program: &str,
        args: &[String],
        shutdown: F,
    ) -> EmuportResult<SupervisionOutcome>
    where
        F: Future<Output = ()>,
    {
        let spawned = self.prepare_and_spawn(program, args);
        match spawned {
            Ok(child) => self.supervise_child(child, shutdown).await,
            Err(e) => {
                self.release()?;
                Err(e)
            }
        }
    }

    fn prepare_and_spawn(&self, program: &str, args: &[String]) -> EmuportResult<Child> {
        let descriptor = self
            .runtime
            .inner()
            .registry
            .get(&self.instance_id)?
            .ok_or_else(|| EmuportError::NotFound(format!("instance {}", self.instance_id)))?;
        let result = AllocationResult::from_descriptor(&descriptor);
        let handoff = self.runtime.write_handoff(&result)?;
        spawn_emulator(program, args, &result, Some(&handoff))
    }

    /// Supervise an emulator spawned by this process.
    pub async fn supervise_child<F>(
        &self,
        mut child: Child,
        shutdown: F,
    ) -> EmuportResult<SupervisionOutcome>
    where
        F: Future<Output = ()>,
    {
        let watched = match child.id() {
            Some(pid) => match self.adopt(pid) {
                Ok(_) => self.watch_child(&mut child, pid, shutdown).await,
                Err(e) => {
                    tracing::error!(
                        instance_id = %self.instance_id,
                        pid,
                        error = %e,
                        "Cannot record emulator, stopping it"
                    );
                    let _ = child.kill().await;
                    Err(e)
                }
            },
            None => Err(EmuportError::Process(
                "emulator exited before it could be recorded".into(),
            )),
        };

        self.finish(watched)
    }

    /// Supervise an emulator this process did not spawn, polling its
    /// liveness.
    pub async fn supervise_pid<F>(&self, pid: u32, shutdown: F) -> EmuportResult<SupervisionOutcome>
    where
        F: Future<Output = ()>,
    {
        let watched = match self.adopt(pid) {
            Ok(_) => self.watch_pid(pid, shutdown).await,
            Err(e) => Err(e),
        };
        self.finish(watched)
    }

    async fn watch_child<F>(
        &self,
        child: &mut Child,
        pid: u32,
        shutdown: F,
    ) -> EmuportResult<SupervisionOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| {
                    EmuportError::Process(format!("Failed to wait for emulator {}: {}", pid, e))
                })?;
                tracing::info!(
                    instance_id = %self.instance_id,
                    pid,
                    code = ?status.code(),
                    "Emulator exited"
                );
                Ok(SupervisionOutcome::Exited { code: status.code() })
            }
            _ = &mut shutdown => self.terminate_child(child, pid).await,
        }
    }

    async fn terminate_child(&self, child: &mut Child, pid: u32) -> EmuportResult<SupervisionOutcome> {
        let grace = self.runtime.options().stop_grace();
        tracing::info!(instance_id = %self.instance_id, pid, "Stopping emulator");

        if let Err(e) = signal_process(pid, libc::SIGTERM) {
            tracing::warn!(pid, error = %e, "SIGTERM failed, killing emulator");
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(_)) => Ok(SupervisionOutcome::Terminated { forced: false }),
            Ok(Err(e)) => Err(EmuportError::Process(format!(
                "Failed to wait for emulator {}: {}",
                pid, e
            ))),
            Err(_) => {
                tracing::warn!(
                    instance_id = %self.instance_id,
                    pid,
                    grace_secs = grace.as_secs(),
                    "Emulator ignored SIGTERM, killing"
                );
                child.kill().await.map_err(|e| {
                    EmuportError::Process(format!("Failed to kill emulator {}: {}", pid, e))
                })?;
                Ok(SupervisionOutcome::Terminated { forced: true })
            }
        }
    }

    async fn watch_pid<F>(&self, pid: u32, shutdown: F) -> EmuportResult<SupervisionOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let liveness = self.runtime.inner().liveness.clone();

        let mut ticker = tokio::time::interval(self.runtime.options().poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !liveness.is_alive(pid) {
                        tracing::info!(instance_id = %self.instance_id, pid, "Emulator is gone");
                        return Ok(SupervisionOutcome::Exited { code: None });
                    }
                }
                _ = &mut shutdown => return self.terminate_pid(pid).await,
            }
        }
    }

    async fn terminate_pid(&self, pid: u32) -> EmuportResult<SupervisionOutcome> {
        let grace = self.runtime.options().stop_grace();
        let liveness = self.runtime.inner().liveness.clone();
        tracing::info!(instance_id = %self.instance_id, pid, "Stopping emulator");

        signal_process(pid, libc::SIGTERM)?;

        let step = Duration::from_millis(100);
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if !liveness.is_alive(pid) {
                return Ok(SupervisionOutcome::Terminated { forced: false });
            }
            tokio::time::sleep(step).await;
        }

        tracing::warn!(instance_id = %self.instance_id, pid, "Emulator ignored SIGTERM, killing");
        if !kill_process(pid) {
            return Err(EmuportError::Process(format!(
                "Failed to kill emulator {}",
                pid
            )));
        }
        Ok(SupervisionOutcome::Terminated { forced: true })
    }

    fn finish(
        &self,
        watched: EmuportResult<SupervisionOutcome>,
    ) -> EmuportResult<SupervisionOutcome> {
        let released = self.release();
        let outcome = watched?;
        released?;
        Ok(outcome)
    }

    fn release(&self) -> EmuportResult<()> {
        match self.runtime.release_instance(&self.instance_id)? {
            InstanceRelease::Released { ports } => {
                tracing::info!(instance_id = %self.instance_id, ports = ?ports, "Released ports");
            }
            InstanceRelease::NotFound => {
                tracing::debug!(instance_id = %self.instance_id, "Instance already released");
            }
            InstanceRelease::HeldByOther { owner_pid } => {
                tracing::warn!(
                    instance_id = %self.instance_id,
                    owner_pid,
                    "Instance is owned by another live process, left in place"
                );
            }
        }
        Ok(())
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Cannot install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
