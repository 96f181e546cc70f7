// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the EdgeFlags client SDK.
//!
//! This crate holds the data model shared by the SDK (`edgeflags`) and any
//! tooling that speaks the EdgeFlags wire protocol. It performs no I/O.
//!
//! # Overview
//!
//! - [`FlagValue`]: boolean, number, string or structured flag values
//! - [`EvaluationContext`]: identity and attributes sent for evaluation
//! - [`EvaluationResponse`]: a full `{flags, configs}` snapshot
//! - [`ChangeEvent`]: per-key previous/current pairs produced by the cache
//! - [`ClientMessage`] / [`ServerMessage`]: streaming channel frames
//! - [`structural_eq`]: the equality used for change detection
//!
//! # Example
//!
//! ```
//! use edgeflags_core::{EvaluationContext, FlagValue, ServerMessage};
//!
//! let ctx = EvaluationContext::new()
//!     .with_user_id("user123")
//!     .with_plan("enterprise");
//!
//! let msg: ServerMessage =
//!     serde_json::from_str(r#"{"type":"snapshot","flags":{"dark":true},"configs":{}}"#).unwrap();
//!
//! if let ServerMessage::Snapshot { flags, .. } = msg {
//!     assert_eq!(flags["dark"], FlagValue::Bool(true));
//! }
//! # let _ = ctx;
//! ```

pub mod change;
pub mod evaluation;
pub mod stream;
pub mod value;

pub use change::{ChangeEvent, ChangeRecord, ConfigChange, FlagChange};
pub use evaluation::{ConfigMap, EvaluationContext, EvaluationResponse, FlagMap};
pub use stream::{ClientMessage, ConnectionStatus, DiffChange, DiffKind, ServerMessage};
pub use value::{structural_eq, FlagValue, InvalidFlagValue};
