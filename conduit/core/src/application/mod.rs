// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Sorting, chain execution, continuations and chain assembly

pub mod sorter;
pub mod chain;
pub mod continuation;
pub mod factory;
pub mod runtime;
