//! # hatchway-core
//!
//! Core layer for hatchway.
//!
//! This crate provides:
//!
//! - Layered configuration ([`Config`])
//! - The runtime collaborator boundary consumed by the Docker gateway
//!   ([`ContainerProvider`], [`ContainerProcess`], [`ProcessHandle`])
//! - A host-process backend ([`LocalRuntime`])
//! - Task-local trace ID propagation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            hatchway-docker              │
//! │     (attach / exec stream gateway)      │
//! └─────────────────────────────────────────┘
//!                     │ ContainerProvider
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │             hatchway-core               │
//! │  ┌──────────┐ ┌─────────┐ ┌──────────┐  │
//! │  │  Config  │ │ Process │ │  Local   │  │
//! │  │          │ │ Handle  │ │ Runtime  │  │
//! │  └──────────┘ └─────────┘ └──────────┘  │
//! └─────────────────────────────────────────┘
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod local;
pub mod process;
pub mod runtime;
pub mod trace;

pub use config::{Config, ContainerDefinition, StreamConfig};
pub use error::{CoreError, Result};
pub use local::LocalRuntime;
pub use process::{exit_channel, ExitNotifier, ExitWatch, PipeReader, PipeWriter, ProcessHandle};
pub use runtime::{
    ContainerInfo, ContainerLogs, ContainerProcess, ContainerProvider, ContainerStatus,
    LogSource, ProcessSpec, StdioConfig,
};
