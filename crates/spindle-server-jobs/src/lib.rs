// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job orchestration for the spindle server.
//!
//! [`JobService`] starts, stops, inspects and recovers job executions. It
//! resolves caller-supplied values into typed [`JobParameters`] with a
//! [`ParameterResolver`], looks jobs up in a [`JobRegistry`], hands them to a
//! [`JobLauncher`] and reads everything else back from the execution store.
//!
//! Jobs cooperate with stop requests by calling [`JobContext::checkpoint`]
//! between units of work. The lifecycle sweeps ([`JobService::initialize`]
//! and [`JobService::shutdown`]) are invoked by whatever owns the service.

pub mod context;
pub mod definition;
pub mod error;
pub mod expression;
pub mod job;
pub mod launcher;
pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod types;
pub mod value;

#[cfg(test)]
mod testing;

pub use context::JobContext;
pub use definition::{
	ChainedDefinitionSource, DefaultExpression, JobParameterDefinition, ParameterDefinitionSource,
	StoredParameterDefinitions,
};
pub use error::{JobError, Result, StartFailure};
pub use expression::{Expression, ExpressionError};
pub use job::Job;
pub use launcher::{JobLauncher, TaskJobLauncher};
pub use lifecycle::SweepReport;
pub use registry::{JobRegistry, MapJobRegistry};
pub use resolver::ParameterResolver;
pub use service::{JobService, JobServiceOptions, ResetStatus};
pub use types::{
	BatchStatus, ExitStatus, JobExecution, JobInstance, JobOutput, JobParameter, JobParameters,
	ParameterType, ParameterValue,
};
pub use value::{raw_parameters_from_json, RawParameters, RawValue};
