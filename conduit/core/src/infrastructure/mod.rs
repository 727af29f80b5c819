// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Event bus, sort cache and stock interceptors

pub mod event_bus;
pub mod chain_cache;
pub mod interceptors;
