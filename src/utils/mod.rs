// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Utility modules
//!
//! Common utilities for the siteflow CLI.

pub mod colors;

pub use colors::*;
