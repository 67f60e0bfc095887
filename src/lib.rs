//! # mindtrace
//!
//! A checkpoint-and-recovery substrate for AI agents: a versioned,
//! content-addressed store of reasoning states organized as a branching
//! directed acyclic graph, with an execution layer that wraps fallible
//! operations in a save-execute-restore loop. Think of it as a revision
//! control system for an agent's in-memory "state of mind" rather than for
//! source files.
//!
//! ## Core concepts
//!
//! - [`value::Value`] — the tagged-union payload type used for checkpoint
//!   `state` and `metadata`.
//! - [`checkpoint::Checkpoint`] / [`checkpoint::Branch`] — the data model:
//!   an immutable snapshot node and a named mutable cursor over the DAG.
//! - [`dag::DagEngine`] — creation, rollback, branching, merging, diffing,
//!   and traversal over the checkpoint DAG.
//! - [`backend::Backend`] — the durable persistence interface, with
//!   in-memory, file-tree, and (behind the `sqlite` feature) embedded
//!   relational implementations.
//! - [`recovery::RecoveryStrategy`] — policy objects deciding how to react
//!   to a failure inside a protected call.
//! - [`orchestrator::safe_execute`] — the save-run-recover loop composing
//!   the DAG engine and recovery strategies.
//! - [`session::Session`] — the façade aggregating all of the above, plus
//!   `export_session`/`import_session` and a metrics snapshot.
//!
//! ## Quick start
//!
//! ```
//! use mindtrace::config::SessionConfig;
//! use mindtrace::session::Session;
//! use mindtrace::value::Value;
//! use rustc_hash::FxHashMap;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::open(SessionConfig::new("demo-agent")).await?;
//!
//! let mut metadata = FxHashMap::default();
//! metadata.insert("confidence".to_string(), Value::Number(1.0));
//!
//! let first = session
//!     .checkpoint(Value::map(), metadata, "start", "intake")
//!     .await?;
//! assert_eq!(session.history(10, None).await?.len(), 1);
//! assert_eq!(first.status, mindtrace::checkpoint::CheckpointStatus::Active);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`value`] — the admissible payload value tree and shallow-override
//!   helper used by recovery strategies and the `combine` merge strategy.
//! - [`serializer`] — canonical byte encoding and content fingerprinting.
//! - [`checkpoint`] — the `Checkpoint`/`Branch`/`CheckpointStatus` types.
//! - [`backend`] — the persistence interface and its three implementations.
//! - [`dag`] — the checkpoint DAG engine.
//! - [`recovery`] — recovery strategy policy objects.
//! - [`orchestrator`] — `safe_execute` and cancellation.
//! - [`session`] — the top-level façade.
//! - [`config`] — session construction configuration.
//! - [`metrics`] — read-only counters.
//! - [`guard`] — a scoped checkpoint-on-enter/rollback-on-failure helper.
//! - [`middleware`] — a host-framework-agnostic wrapping capability.
//! - [`telemetry`] — idempotent `tracing` subscriber initialization.

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod dag;
pub mod guard;
pub mod metrics;
pub mod middleware;
pub mod orchestrator;
pub mod recovery;
pub mod serializer;
pub mod session;
pub mod telemetry;
pub mod value;
