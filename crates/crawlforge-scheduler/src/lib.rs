//! # CrawlForge Scheduler
//!
//! The Batch Scheduler and Progress Tracker (§4.6, §4.8): the central
//! crawl-loop state machine. Grounded in the teacher's
//! `riptide-workers::worker::Worker::run_worker_loop` (poll-and-drain
//! shape, `Semaphore`-bounded concurrent job execution, `tokio::select!`
//! against a shutdown signal) and `riptide-workers::scheduler` (the
//! scheduled-pass idiom reused for the Analyzer's periodic runs). Unlike
//! the teacher's generic `JobQueue`, the frontier here is the Store's
//! backlinks table and there is exactly one job type: crawl a URL.

mod progress;
mod scheduler;

pub use progress::load_or_initial;
pub use scheduler::{BatchOutcome, ExitReason, Scheduler, SchedulerConfig};
