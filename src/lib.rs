//! # clickwork-engine
//!
//! Task and workflow progression for a clickwork review workforce.
//!
//! The QC review queue and the task walker share one clock primitive. The
//! queue walks a reviewer through time-boxed items inside a bounded
//! session; the walker leads a worker through subtasks and evidence-gated
//! submissions. Separately, the workflow gate holds a manager's dashboard
//! until the day's attendance and performance records are in. The engines are
//! plain state machines; [`engine::Engine`] hosts them per user, drives
//! their timers and exposes them over [`http`].

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod evidence;
pub mod gate;
pub mod http;
pub mod identity;
pub mod ledger;
pub mod model;
pub mod queue;
pub mod telemetry;
pub mod ticker;
pub mod timer;
pub mod walker;
