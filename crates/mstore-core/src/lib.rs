//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Per-node lifecycle flows for the cluster metadata store: version setup,
//! upgrade and rollback, backup and restore, and proxy promotion.

pub mod backup;
pub mod command;
pub mod lifecycle;
pub mod metrics;
pub mod process;
pub mod promote;
pub mod services;
pub mod setup;
pub mod upgrade;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backup::{
    BackupEngine, BackupJob, BackupOrchestrator, CommandBackupEngine, JobTarget, RestoreJob,
};
pub use lifecycle::Lifecycle;
pub use metrics::LifecycleMetrics;
pub use process::{ProcessTable, ProcessWatcher, ProcfsTable};
pub use promote::{PromotionFlow, PromotionOutcome, PromotionRequest};
pub use services::{
    ActiveState, ServiceController, ServiceDescriptor, ServiceManager, ServiceRole,
    SystemctlManager, UnitStatus,
};
pub use setup::VersionSetup;
pub use upgrade::{Transition, TransitionOutcome, TransitionUnits, UpgradeStateMachine};
