pub mod artifact_store;
pub mod assembler;
pub mod config;
pub mod delay_manager;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod job_manager;
pub mod logger;
pub mod planner;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod search_engine;
pub mod search_probes;

// Exporting types for convenience
pub use config::Settings;
pub use error::{FetchError, JobError, ListError, ProbeError, RetryError, SearchError};
pub use job_manager::JobManager;
pub use planner::{Item, ItemPlan, ListPlanner, ScrapedLink};
pub use providers::{ItemContent, ItemProvider, Listing, ProviderRegistry};
pub use registry::{ControlAction, Job, JobStatus};
pub use search_engine::{SearchAggregator, SearchJob, SearchProbe, SearchResult, SearchStatus};
