// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pipeline script records (AAPS source text plus its optionally-parsed IR).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of `script_text`, in characters.
pub const MAX_SCRIPT_LEN: usize = 200_000;

/// A single pipeline script row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineScript {
    /// Row identifier.
    pub id: i64,
    /// Human-facing title.
    pub title: String,
    /// Raw AAPS (or other format) source text.
    pub script_text: String,
    /// Monotonically increasing version, bumped on every update.
    pub script_version: i64,
    /// Format tag for `script_text`, e.g. `"aaps_v1"`.
    pub script_format: String,
    /// The parsed IR, if this script has been parsed at least once.
    pub ir: Option<serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a new pipeline script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPipelineScript {
    /// Human-facing title.
    pub title: String,
    /// Raw source text.
    pub script_text: String,
    /// Format tag, defaults to `"aaps_v1"` when omitted by the caller.
    pub script_format: Option<String>,
}

/// Fields accepted when partially updating a pipeline script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineScriptUpdate {
    /// New title, if changing.
    pub title: Option<String>,
    /// New source text, if changing.
    pub script_text: Option<String>,
    /// New parsed IR, if changing.
    pub ir: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_serde_roundtrip() {
        let s = PipelineScript {
            id: 1,
            title: "t".into(),
            script_text: "AUTOAPPDEV_PIPELINE 1\n".into(),
            script_version: 1,
            script_format: "aaps_v1".into(),
            ir: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: PipelineScript = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, s.id);
        assert_eq!(back.script_text, s.script_text);
    }
}
