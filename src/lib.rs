//! Unit-test execution engine
//!
//! Takes resolved test-unit descriptors and produces outcome records,
//! honoring module, class and case lifecycles, per-case timeouts,
//! data-driven expansion and bounded parallel scheduling.
//!
//! ## Layout
//!
//! - [`lifecycle`]: binding catalog, lifecycle states and the registry
//! - [`pipeline`]: the per-case invocation pipeline and data expansion
//! - [`output`]: line-atomic output capture, result sinks and formatters
//! - [`executor`]: partitioning, the worker pool and the [`executor::Engine`]
//! - [`config`]: run configuration from files and the environment
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use unit_engine::config::RunConfig;
//! use unit_engine::executor::Engine;
//! use unit_engine::lifecycle::{BindingCatalog, ClassBinding, TestInstance};
//! use unit_engine::models::{assert, TestUnitDescriptor};
//! use unit_engine::output::CollectingSink;
//!
//! #[derive(Default)]
//! struct Calc;
//! impl TestInstance for Calc {}
//!
//! # async fn run() {
//! let catalog = BindingCatalog::new().class(
//!     "core",
//!     ClassBinding::builder::<Calc>("Calc")
//!         .default_constructor()
//!         .test("Adds", |_, _| assert::are_equal(4, 2 + 2))
//!         .build(),
//! );
//! let engine = Engine::new(Arc::new(catalog));
//! let mut sink = CollectingSink::new();
//! let report = engine
//!     .run(
//!         RunConfig::default(),
//!         vec![TestUnitDescriptor::new("core", "Calc", "Adds")],
//!         &mut sink,
//!     )
//!     .await;
//! assert_eq!(report.passed, 1);
//! # }
//! ```

pub mod config;
pub mod demo;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod utils;
