// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the conduit CLI

pub mod chain;
pub mod config;
pub mod phases;

pub use self::chain::ChainCommand;
pub use self::config::ConfigCommand;
pub use self::phases::DirectionArg;
