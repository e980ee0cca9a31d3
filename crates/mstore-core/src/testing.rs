//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! In-memory collaborators for exercising the flows without an init system,
//! a process table or a backup engine.
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use mstore_common::{LifecycleError, Result};
use parking_lot::Mutex;

use crate::backup::{BackupEngine, BackupJob, RestoreJob};
use crate::process::ProcessTable;
use crate::services::{ActiveState, ServiceManager, UnitStatus};

/// A call received by [`FakeServiceManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Mask(String),
    Unmask(String),
    Start(String),
    Stop(String),
    Restart(String),
    DaemonReload,
    ListUnits(Vec<String>),
}

impl ServiceCall {
    fn operation(&self) -> &'static str {
        match self {
            ServiceCall::Mask(_) => "mask",
            ServiceCall::Unmask(_) => "unmask",
            ServiceCall::Start(_) => "start",
            ServiceCall::Stop(_) => "stop",
            ServiceCall::Restart(_) => "restart",
            ServiceCall::DaemonReload => "daemon-reload",
            ServiceCall::ListUnits(_) => "list-units",
        }
    }

    fn unit(&self) -> &str {
        match self {
            ServiceCall::Mask(unit)
            | ServiceCall::Unmask(unit)
            | ServiceCall::Start(unit)
            | ServiceCall::Stop(unit)
            | ServiceCall::Restart(unit) => unit,
            ServiceCall::DaemonReload | ServiceCall::ListUnits(_) => "",
        }
    }

    /// Whether the call changes unit state, as opposed to querying it.
    pub fn is_control(&self) -> bool {
        !matches!(self, ServiceCall::ListUnits(_))
    }
}

/// Records every call and answers status queries from scripted states.
#[derive(Debug, Default)]
pub struct FakeServiceManager {
    calls: Mutex<Vec<ServiceCall>>,
    states: Mutex<HashMap<String, ActiveState>>,
    failures: Mutex<HashSet<(String, String)>>,
}

impl FakeServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `unit` with `state` in listings. Units never set are not loaded.
    pub fn set_state(&self, unit: &str, state: &str) {
        self.states
            .lock()
            .insert(unit.to_owned(), ActiveState::parse(state));
    }

    /// Fail `operation` (`mask`, `stop`, `list-units`, ...) for `unit`.
    /// An empty unit matches unit-less operations such as `daemon-reload`.
    pub fn fail_on(&self, operation: &str, unit: &str) {
        self.failures
            .lock()
            .insert((operation.to_owned(), unit.to_owned()));
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    /// Calls that would have changed unit state.
    pub fn control_calls(&self) -> Vec<ServiceCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.is_control())
            .cloned()
            .collect()
    }

    fn record(&self, call: ServiceCall) -> Result<()> {
        let failing = self
            .failures
            .lock()
            .contains(&(call.operation().to_owned(), call.unit().to_owned()));
        let command = format!("systemctl {} {}", call.operation(), call.unit());
        self.calls.lock().push(call);
        if failing {
            return Err(LifecycleError::Command {
                command: command.trim_end().to_owned(),
                output: "scripted failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for FakeServiceManager {
    async fn mask(&self, unit: &str) -> Result<()> {
        self.record(ServiceCall::Mask(unit.to_owned()))
    }

    async fn unmask(&self, unit: &str) -> Result<()> {
        self.record(ServiceCall::Unmask(unit.to_owned()))
    }

    async fn start(&self, unit: &str) -> Result<()> {
        self.record(ServiceCall::Start(unit.to_owned()))
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        self.record(ServiceCall::Stop(unit.to_owned()))
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.record(ServiceCall::Restart(unit.to_owned()))
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.record(ServiceCall::DaemonReload)
    }

    async fn list_units(&self, units: &[&str]) -> Result<Vec<UnitStatus>> {
        let failing = {
            let failures = self.failures.lock();
            units
                .iter()
                .any(|unit| failures.contains(&("list-units".to_owned(), (*unit).to_owned())))
        };
        self.calls.lock().push(ServiceCall::ListUnits(
            units.iter().map(|unit| (*unit).to_owned()).collect(),
        ));
        if failing {
            return Err(LifecycleError::Command {
                command: format!("systemctl list-units {}", units.join(" ")),
                output: "scripted failure".into(),
            });
        }
        let states = self.states.lock();
        Ok(units
            .iter()
            .filter_map(|unit| {
                states.get(*unit).map(|state| UnitStatus {
                    name: (*unit).to_owned(),
                    active_state: state.clone(),
                })
            })
            .collect())
    }
}

/// Process table returning queued snapshots, then a default snapshot.
#[derive(Debug, Default)]
pub struct FakeProcessTable {
    scripted: Mutex<VecDeque<Vec<String>>>,
    default: Mutex<Vec<String>>,
    failing: AtomicBool,
    scans: AtomicUsize,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the snapshot returned by the next unanswered scan.
    pub fn push_scan<I, S>(&self, executables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripted
            .lock()
            .push_back(executables.into_iter().map(Into::into).collect());
    }

    /// Snapshot returned once the queue is drained.
    pub fn set_default<I, S>(&self, executables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.default.lock() = executables.into_iter().map(Into::into).collect();
    }

    pub fn fail_scans(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl ProcessTable for FakeProcessTable {
    fn executables(&self) -> Result<Vec<String>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LifecycleError::System {
                context: "listing processes".into(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "/proc unreadable"),
            });
        }
        if let Some(snapshot) = self.scripted.lock().pop_front() {
            return Ok(snapshot);
        }
        Ok(self.default.lock().clone())
    }
}

/// A job received by [`RecordingEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmittedJob {
    Backup(BackupJob),
    Restore(RestoreJob),
}

/// Backup engine that keeps every submitted job.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    jobs: Mutex<Vec<SubmittedJob>>,
    failure: Mutex<Option<String>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following job with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_owned());
    }

    pub fn jobs(&self) -> Vec<SubmittedJob> {
        self.jobs.lock().clone()
    }

    fn submit(&self, job: SubmittedJob) -> Result<()> {
        self.jobs.lock().push(job);
        match self.failure.lock().as_ref() {
            Some(message) => Err(LifecycleError::Engine(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackupEngine for RecordingEngine {
    async fn backup(&self, job: &BackupJob) -> Result<()> {
        self.submit(SubmittedJob::Backup(job.clone()))
    }

    async fn restore(&self, job: &RestoreJob) -> Result<()> {
        self.submit(SubmittedJob::Restore(job.clone()))
    }
}
