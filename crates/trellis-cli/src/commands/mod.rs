//! CLI command implementations

pub mod disassemble;
pub mod render;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Read a JSON document used as a render's `this`
pub fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}
