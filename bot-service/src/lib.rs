pub mod dispatcher;
pub mod health;
pub mod supervisor;

pub use dispatcher::{
    AccountContext, Classification, Dispatcher, DispatcherState, DispatcherStats, ItemReport,
    ReplyOutcome,
};
pub use health::{HealthRegistry, WorkerId, WorkerState};
pub use supervisor::{Account, RestartPolicy, Supervisor, SupervisorReport, WorkerSummary};
