use crate::graph::{summarize_sampler, NodeGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Text metadata attached to one image, keyed by embedded chunk name.
pub type ImageInfo = HashMap<String, String>;

const NEGATIVE_MARKER: &str = "Negative prompt:";

/// Canonical extraction result for one image.
///
/// All fields are plain strings and default to empty; downstream code never
/// has to distinguish "no metadata" from "empty metadata".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GenerationRecord {
    pub prompt: String,
    pub negative_prompt: String,
    pub other_parameters: String,
}

impl GenerationRecord {
    pub fn is_empty(&self) -> bool {
        self.prompt.is_empty()
            && self.negative_prompt.is_empty()
            && self.other_parameters.is_empty()
    }
}

/// Extracts a generation record from an image's embedded metadata.
///
/// Two formats are recognized: a flat `parameters` text blob, and a `prompt`
/// key holding a serialized node graph. Anything malformed or unrecognized
/// degrades to the empty record; this function never fails.
pub fn extract_record(info: &ImageInfo) -> GenerationRecord {
    if let Some(parameters) = info.get("parameters") {
        return parse_flat_parameters(parameters);
    }

    if let Some(serialized) = info.get("prompt") {
        let Some(graph) = NodeGraph::parse(serialized) else {
            log::debug!("prompt metadata is not a well-formed node graph");
            return GenerationRecord::default();
        };
        if graph.is_empty() {
            return GenerationRecord::default();
        }
        return match summarize_sampler(&graph) {
            Ok(record) => record,
            Err(error) => {
                log::debug!("node graph trace failed: {}", error);
                GenerationRecord::default()
            }
        };
    }

    GenerationRecord::default()
}

/// Splits a flat parameter blob into prompt, negative prompt, and the rest.
///
/// The blob is cut once at the literal `Negative prompt:` marker; after the
/// marker, the first line is the negative prompt and everything past the
/// first newline is the remaining parameter text.
pub fn parse_flat_parameters(raw: &str) -> GenerationRecord {
    let Some((before, after)) = raw.split_once(NEGATIVE_MARKER) else {
        return GenerationRecord {
            prompt: raw.trim().to_string(),
            ..Default::default()
        };
    };

    let (negative, others) = match after.split_once('\n') {
        Some((first_line, rest)) => (first_line.trim(), rest.trim()),
        None => (after.trim(), ""),
    };

    GenerationRecord {
        prompt: before.trim().to_string(),
        negative_prompt: negative.to_string(),
        other_parameters: others.to_string(),
    }
}
