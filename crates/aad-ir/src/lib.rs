// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-ir
#![deny(unsafe_code)]
//!
//! The AAPS v1 parser and shell importer (C2), and the deterministic bash
//! codegen that turns an IR document into a runnable pipeline body (C3).

/// AAPS v1 line-oriented grammar parser.
pub mod parser;
/// `# AAPS:`-annotated shell file importer.
pub mod shell_import;
/// Deterministic IR → bash codegen, including meta-round mode.
pub mod codegen;

pub use codegen::{render, KnownActionKind, CODEGEN_PLACEHOLDER, DEFAULT_TEMPLATE};
pub use parser::parse_aaps;
pub use shell_import::import_shell;
