//! Experiment-procedure runner for scientific beamline checkouts.
//!
//! A procedure is a tree of steps describing a checkout: narrative
//! description steps, references to passive checkout files, steps that set
//! hardware values and verify readbacks, and scan plan executions, nested
//! inside groups to arbitrary depth. The edit model in [`procedure`]
//! specifies the steps; [`prepared`] holds their runtime twins, resolved
//! against live hardware through the capability traits in [`backend`], with
//! pass/fail results aggregated up the hierarchy per [`result`].
//!
//! Hosts load or build a [`procedure::ProcedureFile`], prepare it with
//! [`prepared::PreparedProcedureFile::from_origin`], and `run` it; every
//! node's result can be inspected at any time and is recomputed from
//! current state on each read.

pub mod backend;
pub mod comparison;
pub mod error;
pub mod plan;
pub mod prepared;
pub mod procedure;
pub mod reduce;
pub mod result;
pub mod target;
