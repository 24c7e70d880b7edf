//! Resumable, Poll-Driven Scan Engine
//!
//! Runs a website scan as a durable four-step job (crawl, analyze, discover,
//! finalize) that survives process restarts and short execution windows.
//!
//! # Model
//!
//! - A periodic tick selects eligible jobs ([`Poller`])
//! - Each job is claimed with a time-bounded lock ([`engine::lock`])
//! - The controller runs exactly one step, then persists the result and
//!   releases the lock ([`PipelineController`])
//! - Failures go through a pure retry policy ([`decide`])
//! - Progress is monotonic and readable at any time ([`JobStatusView`])
//!
//! All state lives in the record store. Nothing is shared in memory between
//! workers, so ticks may run in separate processes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use scan_engine::{enqueue_scan, EngineConfig, MemoryStore, NewScan, PipelineController, Poller};
//! use scan_engine::testing::MockCollaborators;
//!
//! let store = Arc::new(MemoryStore::new());
//! let mocks = MockCollaborators::default();
//! let controller = Arc::new(PipelineController::with_collaborators(
//!     store.clone(),
//!     &mocks.collaborators(),
//!     EngineConfig::default(),
//! ));
//!
//! let (scan, _job) = enqueue_scan(store.as_ref(), NewScan::new(project_id, "acme.com", "Acme")).await?;
//! let poller = Poller::new(store.clone(), controller);
//! poller.tick().await?; // crawl
//! poller.tick().await?; // analyze
//! ```
//!
//! # Modules
//!
//! - [`types`] - Job, scan, step outputs and report types
//! - [`traits`] - Record store and collaborator seams
//! - [`stores`] - Storage implementations (MemoryStore, PostgresStore)
//! - [`engine`] - Lock manager, retry policy, progress, controller, poller
//! - [`steps`] - The four step executors
//! - [`testing`] - Mock collaborators and fixtures

pub mod engine;
pub mod error;
pub mod prompts;
pub mod steps;
pub mod stores;
pub mod testing;
pub mod text;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use engine::{
    cancel_scan,
    controller::{Disposition, PipelineController, SkipReason},
    enqueue_scan,
    lock::{Acquisition, LockManager},
    poller::{Poller, TickReport},
    progress::ProgressReporter,
    retry::{decide, FailureKind, RetryDecision, MAX_ATTEMPTS},
    scan_status,
};
pub use error::{
    AnalysisError, CrawlError, EngineError, NotifyError, Result, SearchError, StoreError,
    StoreResult,
};
pub use steps::{Collaborators, StepContext, StepExecutor, StepExecutors, StepOutcome};
pub use stores::MemoryStore;
pub use traits::{
    ai::{AnalysisTask, Analyzer},
    crawler::{CrawlRequest, Crawler},
    notifier::{NoopNotifier, Notifier, TEMPLATE_SCAN_COMPLETE, TEMPLATE_SCAN_FAILED},
    searcher::{NoopSearcher, Searcher},
    store::JobStore,
};
pub use types::{
    config::EngineConfig,
    job::{ClaimedJob, Job, JobStatus, JobStatusView, RetryState, Step},
    output::StepOutputs,
    page::{CrawledPage, SearchResult},
    report::{AuditReport, Priority, Recommendation},
    scan::{NewScan, Scan, ScanStatus},
};

#[cfg(feature = "postgres")]
pub use stores::PostgresStore;
