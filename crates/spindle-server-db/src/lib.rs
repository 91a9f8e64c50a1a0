// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence layer for the spindle job service.
//!
//! This crate owns the durable record of job instances, job executions and
//! per-job parameter definitions, all stored in SQLite.
//!
//! ## Repository pattern
//!
//! Each domain has a `FooStore` trait with async methods and a `FooRepository`
//! struct holding a `SqlitePool`. The trait implementation delegates to the
//! inherent methods, which carry `#[tracing::instrument]`. Consumers hold an
//! `Arc<dyn FooStore>` so tests can swap the backing store.
//!
//! ## Testing
//!
//! Enable the `testing` feature for [`testing::create_batch_test_pool`], a
//! single-connection in-memory pool with the schema applied.

mod error;
pub mod definition;
pub mod execution;
pub mod params;
pub mod pool;
pub mod schema;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use definition::{ParameterDefinitionRecord, ParameterDefinitionRepository, ParameterDefinitionStore};
pub use error::{DbError, Result};
pub use execution::{
	BatchStatus, ExecutionRepository, ExecutionStore, ExitStatus, JobExecution, JobInstance,
};
pub use params::{JobParameter, JobParameters, ParameterType, ParameterValue};
pub use pool::create_pool;
pub use schema::run_migrations;
