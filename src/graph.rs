use crate::metadata::GenerationRecord;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced while tracing a node graph.
///
/// These never reach callers of the extraction entry point: the extractor
/// converts every trace failure into an all-empty record.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("cycle detected while tracing node {0}")]
    CyclicGraph(String),
    #[error("node {node} is missing a usable '{input}' input")]
    MalformedNode { node: String, input: &'static str },
}

/// Reference from a node input to another node's output slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef {
    pub node: String,
    pub slot: u32,
}

/// A single node input: either a literal scalar or an edge reference.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
    Edge(EdgeRef),
}

impl InputValue {
    /// Text form of a literal value; edges and null render empty.
    pub fn literal_text(&self) -> String {
        match self {
            InputValue::Text(text) => text.clone(),
            InputValue::Number(number) => number.to_string(),
            InputValue::Bool(boolean) => boolean.to_string(),
            InputValue::Null | InputValue::Edge(_) => String::new(),
        }
    }

    /// Truthiness matching the upstream metadata conventions: empty strings,
    /// zero, false and null all read as disabled.
    pub fn is_truthy(&self) -> bool {
        match self {
            InputValue::Text(text) => !text.is_empty(),
            InputValue::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
            InputValue::Bool(boolean) => *boolean,
            InputValue::Null => false,
            InputValue::Edge(_) => true,
        }
    }

    fn from_json(raw: &Value) -> Self {
        match raw {
            Value::String(text) => InputValue::Text(text.clone()),
            Value::Number(number) => InputValue::Number(number.clone()),
            Value::Bool(boolean) => InputValue::Bool(*boolean),
            Value::Array(items) => match items.first() {
                Some(Value::String(node)) => InputValue::Edge(EdgeRef {
                    node: node.clone(),
                    slot: slot_index(items.get(1)),
                }),
                Some(Value::Number(node)) => InputValue::Edge(EdgeRef {
                    node: node.to_string(),
                    slot: slot_index(items.get(1)),
                }),
                _ => InputValue::Null,
            },
            _ => InputValue::Null,
        }
    }
}

fn slot_index(raw: Option<&Value>) -> u32 {
    raw.and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(0)
}

/// Known node classes, matched by substring on the raw `class_type` tag.
/// Anything unrecognized falls into `Other` and gets the generic
/// pass-through traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    TextEncode,
    SwitchHub,
    Sampler,
    CheckpointLoader,
    Other,
}

impl NodeClass {
    pub fn of(class_type: &str) -> Self {
        if class_type.contains("CLIPTextEncode") {
            NodeClass::TextEncode
        } else if class_type.contains("PromptSwitchHub") {
            NodeClass::SwitchHub
        } else if class_type.contains("KSampler") {
            NodeClass::Sampler
        } else if class_type.contains("CheckpointLoaderSimple") {
            NodeClass::CheckpointLoader
        } else {
            NodeClass::Other
        }
    }
}

/// One node of a serialized generation graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub class_type: String,
    /// Inputs in declaration order. Traversal tie-breaks are first-match-wins
    /// over this order, so it must survive parsing intact.
    pub inputs: Vec<(String, InputValue)>,
}

impl Node {
    pub fn class(&self) -> NodeClass {
        NodeClass::of(&self.class_type)
    }

    pub fn input(&self, name: &str) -> Option<&InputValue> {
        self.inputs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// An immutable generation graph, parsed fresh per image.
///
/// Node order is the order the ids appear in the serialized graph; the
/// sampler-selection policy ("last KSampler wins") depends on it.
#[derive(Debug, Clone, Default)]
pub struct NodeGraph {
    order: Vec<String>,
    nodes: HashMap<String, Node>,
}

impl NodeGraph {
    /// Builds a graph from an already-decoded JSON value.
    ///
    /// Returns `None` when the payload does not have the expected shape
    /// (non-object top level, non-object nodes, mistyped fields); the
    /// extractor treats that as "no metadata available".
    pub fn from_value(raw: &Value) -> Option<Self> {
        let entries = raw.as_object()?;
        let mut graph = NodeGraph::default();

        for (node_id, node_value) in entries {
            let fields = node_value.as_object()?;
            let class_type = match fields.get("class_type") {
                Some(value) => value.as_str()?.to_string(),
                None => String::new(),
            };
            let inputs = match fields.get("inputs") {
                Some(value) => value
                    .as_object()?
                    .iter()
                    .map(|(name, input)| (name.clone(), InputValue::from_json(input)))
                    .collect(),
                None => Vec::new(),
            };

            graph.order.push(node_id.clone());
            graph.nodes.insert(node_id.clone(), Node { class_type, inputs });
        }

        Some(graph)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        Self::from_value(&value)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Nodes in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.order
            .iter()
            .filter_map(|node_id| self.nodes.get(node_id).map(|node| (node_id.as_str(), node)))
    }
}

/// Resolves the effective text feeding the named node.
///
/// Unknown node ids resolve to an empty string rather than an error, so a
/// dangling edge only blanks its own branch of the traversal.
pub fn resolve_text(graph: &NodeGraph, node_id: &str) -> Result<String, TraceError> {
    let mut in_progress = Vec::new();
    resolve_text_inner(graph, node_id, &mut in_progress)
}

fn resolve_text_inner(
    graph: &NodeGraph,
    node_id: &str,
    in_progress: &mut Vec<String>,
) -> Result<String, TraceError> {
    let Some(node) = graph.node(node_id) else {
        return Ok(String::new());
    };
    if in_progress.iter().any(|visited| visited == node_id) {
        return Err(TraceError::CyclicGraph(node_id.to_string()));
    }
    in_progress.push(node_id.to_string());

    let resolved = match node.class() {
        NodeClass::TextEncode => match node.input("text") {
            Some(InputValue::Edge(edge)) => resolve_text_inner(graph, &edge.node, in_progress),
            Some(literal) => Ok(literal.literal_text()),
            None => Ok(String::new()),
        },
        NodeClass::SwitchHub => resolve_switch_hub(graph, node, in_progress),
        NodeClass::Sampler | NodeClass::CheckpointLoader | NodeClass::Other => {
            resolve_pass_through(graph, node, in_progress)
        }
    };

    in_progress.pop();
    resolved
}

/// Switch hubs expose up to seven numbered slots; every enabled slot that
/// resolves to non-empty text contributes, comma-joined in slot order.
fn resolve_switch_hub(
    graph: &NodeGraph,
    node: &Node,
    in_progress: &mut Vec<String>,
) -> Result<String, TraceError> {
    const SLOT_COUNT: u32 = 7;

    let mut parts = Vec::new();
    for slot in 1..=SLOT_COUNT {
        let enabled = node
            .input(&format!("enabled_{}", slot))
            .map(InputValue::is_truthy)
            .unwrap_or(false);
        if !enabled {
            continue;
        }

        let Some(slot_value) = node.input(&format!("prompt_{}", slot)) else {
            continue;
        };
        let text = match slot_value {
            InputValue::Edge(edge) => resolve_text_inner(graph, &edge.node, in_progress)?,
            literal => literal.literal_text(),
        };
        if !text.is_empty() {
            parts.push(text);
        }
    }

    Ok(parts.join(", "))
}

/// Generic rule for unrecognized nodes: follow each edge input in declaration
/// order and keep the first non-empty result.
fn resolve_pass_through(
    graph: &NodeGraph,
    node: &Node,
    in_progress: &mut Vec<String>,
) -> Result<String, TraceError> {
    for (_, value) in &node.inputs {
        if let InputValue::Edge(edge) = value {
            let resolved = resolve_text_inner(graph, &edge.node, in_progress)?;
            if !resolved.is_empty() {
                return Ok(resolved);
            }
        }
    }
    Ok(String::new())
}

/// Walks ancestors of `node_id` depth-first and returns the named input of
/// the first node whose `class_type` contains `class_substring`.
///
/// A matching ancestor without a usable value ends its branch of the search;
/// sibling branches are still explored.
pub fn resolve_input(
    graph: &NodeGraph,
    node_id: &str,
    class_substring: &str,
    input_key: &str,
) -> Result<Option<InputValue>, TraceError> {
    let mut in_progress = Vec::new();
    resolve_input_inner(graph, node_id, class_substring, input_key, &mut in_progress)
}

fn resolve_input_inner(
    graph: &NodeGraph,
    node_id: &str,
    class_substring: &str,
    input_key: &str,
    in_progress: &mut Vec<String>,
) -> Result<Option<InputValue>, TraceError> {
    let Some(node) = graph.node(node_id) else {
        return Ok(None);
    };
    if in_progress.iter().any(|visited| visited == node_id) {
        return Err(TraceError::CyclicGraph(node_id.to_string()));
    }

    if node.class_type.contains(class_substring) {
        return Ok(node
            .input(input_key)
            .filter(|value| value.is_truthy())
            .cloned());
    }

    in_progress.push(node_id.to_string());
    let mut found = None;
    for (_, value) in &node.inputs {
        if let InputValue::Edge(edge) = value {
            let resolved =
                resolve_input_inner(graph, &edge.node, class_substring, input_key, in_progress)?;
            if resolved.is_some() {
                found = resolved;
                break;
            }
        }
    }
    in_progress.pop();
    Ok(found)
}

const SUMMARY_FIELDS: &[(&str, &str)] = &[
    ("Seed", "seed"),
    ("Steps", "steps"),
    ("CFG", "cfg"),
    ("Sampler", "sampler_name"),
    ("Scheduler", "scheduler"),
    ("Denoise", "denoise"),
];

/// Builds the canonical record from the graph's terminal sampling stage.
///
/// When several sampler nodes exist (hi-res fix chains), the last one in
/// graph order is authoritative. No sampler at all is not an error: the
/// image simply has no traceable prompt.
pub fn summarize_sampler(graph: &NodeGraph) -> Result<GenerationRecord, TraceError> {
    let Some((sampler_id, sampler)) = graph
        .entries()
        .filter(|(_, node)| node.class() == NodeClass::Sampler)
        .last()
    else {
        return Ok(GenerationRecord::default());
    };

    let prompt = resolve_conditioning(graph, sampler_id, sampler, "positive")?;
    let negative_prompt = resolve_conditioning(graph, sampler_id, sampler, "negative")?;

    let mut lines = Vec::new();
    for (label, key) in SUMMARY_FIELDS {
        if let Some(value) = sampler.input(key) {
            let text = value.literal_text();
            if !text.is_empty() {
                lines.push(format!("{}: {}", label, text));
            }
        }
    }

    if let Some(InputValue::Edge(model_edge)) = sampler.input("model") {
        let checkpoint =
            resolve_input(graph, &model_edge.node, "CheckpointLoaderSimple", "ckpt_name")?;
        if let Some(checkpoint) = checkpoint {
            let name = checkpoint.literal_text();
            if !name.is_empty() {
                lines.push(format!("Model: {}", name));
            }
        }
    }

    Ok(GenerationRecord {
        prompt,
        negative_prompt,
        other_parameters: lines.join("\n"),
    })
}

fn resolve_conditioning(
    graph: &NodeGraph,
    sampler_id: &str,
    sampler: &Node,
    input: &'static str,
) -> Result<String, TraceError> {
    match sampler.input(input) {
        Some(InputValue::Edge(edge)) => resolve_text(graph, &edge.node),
        _ => Err(TraceError::MalformedNode {
            node: sampler_id.to_string(),
            input,
        }),
    }
}
