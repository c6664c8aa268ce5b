//! Frame snapshot builder.
//!
//! One capture renders the accessibility tree of the main document and every
//! visible nested frame into a single indented text document. Interactive and
//! labelled nodes are tagged with refs of the form `s<generation>e<n>`,
//! prefixed `f<frameIndex>` for nodes inside nested frames. The generation is
//! baked into every token, so resolving a ref minted by an older capture is
//! detectable by parsing alone, without touching the browser.
//!
//! Child frames are spliced in as a tree transform: the parsed document is a
//! typed tree, and each visible iframe node has its children replaced by the
//! child frame's own rendered subtree (or by a placeholder line when that
//! frame cannot be rendered).

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::error::{BrowserError, Result};
use crate::page::Page;

pub(crate) const IFRAME_PLACEHOLDER: &str = "<could not take iframe snapshot>";

/// Roles that can receive input and therefore always deserve a ref.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "checkbox",
    "radio",
    "combobox",
    "listbox",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "option",
    "searchbox",
    "slider",
    "spinbutton",
    "switch",
    "tab",
    "treeitem",
];

// ----------------------------------------------------------------------
// Snapshot and ref resolution
// ----------------------------------------------------------------------

/// The element a ref points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefTarget {
    pub frame_index: usize,
    pub backend_node_id: i64,
}

/// One immutable capture: the rendered document plus the frame list and ref
/// table everything in it resolves against.
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    text: String,
    frames: Vec<String>,
    refs: HashMap<String, RefTarget>,
}

impl Snapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The rendered tree body, without the URL/title header.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of frames discovered, main document included.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Resolve a ref string against this capture.
    ///
    /// Fails when the frame index is not in this capture's frame list, when
    /// the token was minted by a different generation, or when the token is
    /// simply unknown. There is no fallback to the main document.
    pub fn resolve(&self, raw: &str) -> Result<RefTarget> {
        let parsed = parse_ref(raw)?;
        if parsed.frame_index >= self.frames.len() {
            return Err(BrowserError::FrameMissing);
        }
        if parsed.generation != self.generation {
            return Err(BrowserError::StaleRef);
        }
        self.refs
            .get(raw)
            .copied()
            .ok_or_else(|| BrowserError::BadRef {
                reason: format!("ref {raw:?} is not present in the current snapshot"),
            })
    }
}

/// Capture a new snapshot generation from the live page.
pub async fn capture(page: &Page, generation: u64) -> Result<Snapshot> {
    let main_frame = page.main_frame_id().await?;
    let mut builder = SnapshotBuilder {
        page,
        generation,
        frames: vec![main_frame],
        refs: HashMap::new(),
    };
    let mut roots = builder.build_frame(None, 0).await?;
    builder.splice_iframes(&mut roots).await;
    let text = render_tree(&roots);
    debug!(
        generation,
        frames = builder.frames.len(),
        refs = builder.refs.len(),
        "snapshot captured"
    );
    Ok(Snapshot {
        generation,
        text,
        frames: builder.frames,
        refs: builder.refs,
    })
}

struct SnapshotBuilder<'p> {
    page: &'p Page,
    generation: u64,
    frames: Vec<String>,
    refs: HashMap<String, RefTarget>,
}

impl SnapshotBuilder<'_> {
    /// Fetch and transform one frame's accessibility tree. The result still
    /// has empty iframe nodes; splicing happens afterwards so frame indices
    /// are assigned in document discovery order.
    async fn build_frame(
        &mut self,
        frame_id: Option<&str>,
        frame_index: usize,
    ) -> Result<Vec<TreeNode>> {
        let payload = self.page.full_ax_tree(frame_id).await?;
        let raw = parse_frame_payload(&payload)?;
        Ok(transform_frame(
            raw,
            frame_index,
            self.generation,
            &mut self.refs,
        ))
    }

    /// Walk the tree and replace every visible iframe's children with the
    /// child frame's rendered subtree. A frame that cannot be rendered gets
    /// a placeholder line instead; the whole capture never fails over one
    /// frame.
    fn splice_iframes<'a>(&'a mut self, nodes: &'a mut Vec<TreeNode>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for node in nodes.iter_mut() {
                let TreeNode::Element(el) = node else { continue };
                if el.role == "iframe" {
                    let backend = el
                        .ref_id
                        .as_ref()
                        .and_then(|token| self.refs.get(token))
                        .map(|target| target.backend_node_id);
                    if let Some(backend) = backend {
                        el.children = self.iframe_children(backend).await;
                    }
                } else {
                    self.splice_iframes(&mut el.children).await;
                }
            }
        })
    }

    async fn iframe_children(&mut self, backend_node_id: i64) -> Vec<TreeNode> {
        // Frames without layout are not descended into.
        let visible = self
            .page
            .node_area(backend_node_id)
            .await
            .map(|area| area > 0.0)
            .unwrap_or(false);
        if !visible {
            return Vec::new();
        }
        let frame_id = match self.page.content_frame_id(backend_node_id).await {
            Ok(Some(frame_id)) => frame_id,
            // No document attached yet; nothing to splice.
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!(error = %e, "iframe content frame not reachable");
                return vec![TreeNode::Text(IFRAME_PLACEHOLDER.into())];
            }
        };
        let child_index = self.frames.len();
        self.frames.push(frame_id.clone());
        match self.build_frame(Some(&frame_id), child_index).await {
            Ok(mut children) => {
                self.splice_iframes(&mut children).await;
                children
            }
            Err(e) => {
                debug!(error = %e, frame = %frame_id, "child frame snapshot failed");
                vec![TreeNode::Text(IFRAME_PLACEHOLDER.into())]
            }
        }
    }
}

// ----------------------------------------------------------------------
// Typed tree
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) enum TreeNode {
    Element(ElementNode),
    /// A literal line, used for the iframe failure placeholder.
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct ElementNode {
    pub role: String,
    pub name: String,
    pub value: Option<String>,
    pub ref_id: Option<String>,
    pub checked: Option<bool>,
    pub disabled: bool,
    pub expanded: Option<bool>,
    pub children: Vec<TreeNode>,
}

// ----------------------------------------------------------------------
// CDP payload parsing
// ----------------------------------------------------------------------

/// Flat node as delivered by `Accessibility.getFullAXTree`.
#[derive(Debug)]
struct AxFlatNode {
    node_id: String,
    role: String,
    name: String,
    value: Option<String>,
    child_ids: Vec<String>,
    backend_node_id: Option<i64>,
    checked: Option<bool>,
    disabled: bool,
    expanded: Option<bool>,
    ignored: bool,
}

/// Structured node after parent/child linking, before ref assignment.
#[derive(Debug)]
struct RawNode {
    role: String,
    name: String,
    value: Option<String>,
    backend_node_id: Option<i64>,
    checked: Option<bool>,
    disabled: bool,
    expanded: Option<bool>,
    children: Vec<RawNode>,
}

fn parse_frame_payload(payload: &Value) -> Result<Vec<RawNode>> {
    Ok(assemble_tree(parse_ax_nodes(payload)?))
}

fn parse_ax_nodes(payload: &Value) -> Result<Vec<AxFlatNode>> {
    let nodes = payload
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| BrowserError::Protocol {
            detail: "accessibility payload missing nodes array".into(),
        })?;

    let mut result = Vec::with_capacity(nodes.len());
    for node in nodes {
        let node_id = node
            .get("nodeId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let role = wrapped_string(node.get("role")).unwrap_or_else(|| "generic".into());
        let name = wrapped_string(node.get("name")).unwrap_or_default();
        let value = wrapped_string(node.get("value")).filter(|v| !v.is_empty());
        let child_ids = node
            .get("childIds")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let backend_node_id = node.get("backendDOMNodeId").and_then(Value::as_i64);
        let ignored = node
            .get("ignored")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let (checked, disabled, expanded) = extract_properties(node);

        result.push(AxFlatNode {
            node_id,
            role,
            name,
            value,
            child_ids,
            backend_node_id,
            checked,
            disabled,
            expanded,
            ignored,
        });
    }
    Ok(result)
}

/// AX fields arrive as `{ "type": ..., "value": ... }` wrappers.
fn wrapped_string(field: Option<&Value>) -> Option<String> {
    let inner = field?.get("value")?;
    match inner {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_properties(node: &Value) -> (Option<bool>, bool, Option<bool>) {
    let mut checked = None;
    let mut disabled = false;
    let mut expanded = None;

    if let Some(props) = node.get("properties").and_then(Value::as_array) {
        for prop in props {
            let name = prop.get("name").and_then(Value::as_str).unwrap_or_default();
            let value = prop.get("value").and_then(|v| v.get("value"));
            match name {
                "checked" => checked = tristate(value),
                "disabled" => disabled = tristate(value).unwrap_or(false),
                "expanded" => expanded = tristate(value),
                _ => {}
            }
        }
    }
    (checked, disabled, expanded)
}

/// Boolean properties show up as booleans or as tristate strings.
fn tristate(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s == "true"),
        _ => None,
    }
}

fn assemble_tree(flat: Vec<AxFlatNode>) -> Vec<RawNode> {
    let id_to_index: HashMap<&str, usize> = flat
        .iter()
        .enumerate()
        .map(|(i, node)| (node.node_id.as_str(), i))
        .collect();

    let mut is_child = vec![false; flat.len()];
    for node in &flat {
        for child_id in &node.child_ids {
            if let Some(&idx) = id_to_index.get(child_id.as_str()) {
                is_child[idx] = true;
            }
        }
    }

    (0..flat.len())
        .filter(|idx| !is_child[*idx])
        .flat_map(|idx| build_raw(&flat, &id_to_index, idx))
        .collect()
}

/// Ignored nodes are hoisted: their children take their place so no content
/// below them is lost.
fn build_raw(flat: &[AxFlatNode], id_to_index: &HashMap<&str, usize>, idx: usize) -> Vec<RawNode> {
    let node = &flat[idx];
    let children: Vec<RawNode> = node
        .child_ids
        .iter()
        .filter_map(|id| id_to_index.get(id.as_str()).copied())
        .flat_map(|child_idx| build_raw(flat, id_to_index, child_idx))
        .collect();
    if node.ignored {
        return children;
    }
    vec![RawNode {
        role: node.role.clone(),
        name: node.name.clone(),
        value: node.value.clone(),
        backend_node_id: node.backend_node_id,
        checked: node.checked,
        disabled: node.disabled,
        expanded: node.expanded,
        children,
    }]
}

// ----------------------------------------------------------------------
// Transform: raw tree -> typed tree with refs
// ----------------------------------------------------------------------

fn transform_frame(
    raw: Vec<RawNode>,
    frame_index: usize,
    generation: u64,
    refs: &mut HashMap<String, RefTarget>,
) -> Vec<TreeNode> {
    let mut counter = 0u64;
    raw.into_iter()
        .flat_map(|node| transform_node(node, frame_index, generation, &mut counter, refs))
        .collect()
}

fn transform_node(
    node: RawNode,
    frame_index: usize,
    generation: u64,
    counter: &mut u64,
    refs: &mut HashMap<String, RefTarget>,
) -> Vec<TreeNode> {
    if should_drop(&node) {
        return Vec::new();
    }
    if should_hoist(&node) {
        return node
            .children
            .into_iter()
            .flat_map(|child| transform_node(child, frame_index, generation, counter, refs))
            .collect();
    }

    let role = normalize_role(&node.role);
    let ref_id = match node.backend_node_id {
        Some(backend) if wants_ref(&role, &node.name) => {
            *counter += 1;
            let token = mint_ref(frame_index, generation, *counter);
            refs.insert(
                token.clone(),
                RefTarget {
                    frame_index,
                    backend_node_id: backend,
                },
            );
            Some(token)
        }
        _ => None,
    };

    let children = node
        .children
        .into_iter()
        .flat_map(|child| transform_node(child, frame_index, generation, counter, refs))
        .collect();

    vec![TreeNode::Element(ElementNode {
        role,
        name: node.name,
        value: node.value,
        ref_id,
        checked: node.checked,
        disabled: node.disabled,
        expanded: node.expanded,
        children,
    })]
}

/// Text runs duplicated below their owners carry no extra information.
fn should_drop(node: &RawNode) -> bool {
    matches!(node.role.as_str(), "InlineTextBox" | "LineBreak")
}

/// Structural wrappers are hoisted so their children keep a sensible depth.
fn should_hoist(node: &RawNode) -> bool {
    match node.role.as_str() {
        "none" | "presentation" => true,
        "generic" | "genericContainer" | "GenericContainer" => node.name.is_empty(),
        _ => false,
    }
}

fn normalize_role(role: &str) -> String {
    match role {
        "RootWebArea" => "document".into(),
        "StaticText" => "text".into(),
        "Iframe" | "IframePresentational" => "iframe".into(),
        other => other.to_string(),
    }
}

fn is_interactive_role(role: &str) -> bool {
    INTERACTIVE_ROLES.contains(&role)
}

/// Interactive or labelled element nodes get refs; plain text runs never do.
fn wants_ref(role: &str, name: &str) -> bool {
    role != "text" && (role == "iframe" || is_interactive_role(role) || !name.is_empty())
}

// ----------------------------------------------------------------------
// Ref tokens
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParsedRef {
    pub frame_index: usize,
    pub generation: u64,
}

pub(crate) fn mint_ref(frame_index: usize, generation: u64, counter: u64) -> String {
    if frame_index == 0 {
        format!("s{generation}e{counter}")
    } else {
        format!("f{frame_index}s{generation}e{counter}")
    }
}

/// Parse `f<frame><node>` / bare `<node>` where the node id is
/// `s<generation>e<element>`.
pub(crate) fn parse_ref(raw: &str) -> Result<ParsedRef> {
    let bad = |reason: &str| BrowserError::BadRef {
        reason: format!("{reason}: {raw:?}"),
    };
    let (frame_index, node) = match raw.strip_prefix('f') {
        Some(rest) => {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                return Err(bad("missing frame index"));
            }
            let index: usize = digits
                .parse()
                .map_err(|_| bad("frame index out of range"))?;
            (index, &rest[digits.len()..])
        }
        None => (0, raw),
    };
    let after_s = node.strip_prefix('s').ok_or_else(|| bad("malformed node id"))?;
    let gen_digits: String = after_s.chars().take_while(char::is_ascii_digit).collect();
    if gen_digits.is_empty() {
        return Err(bad("malformed node id"));
    }
    let generation: u64 = gen_digits.parse().map_err(|_| bad("malformed node id"))?;
    let after_e = after_s[gen_digits.len()..]
        .strip_prefix('e')
        .ok_or_else(|| bad("malformed node id"))?;
    if after_e.is_empty() || !after_e.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad("malformed node id"));
    }
    Ok(ParsedRef {
        frame_index,
        generation,
    })
}

// ----------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------

pub(crate) fn render_tree(nodes: &[TreeNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        render_node(node, 0, &mut out);
    }
    out
}

fn render_node(node: &TreeNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match node {
        TreeNode::Text(text) => {
            out.push_str(&indent);
            out.push_str("- ");
            out.push_str(text);
            out.push('\n');
        }
        TreeNode::Element(el) => {
            let mut line = format!("{indent}- {}", el.role);
            if !el.name.is_empty() {
                line.push_str(&format!(" \"{}\"", flatten(&el.name)));
            }
            if let Some(checked) = el.checked {
                line.push_str(if checked { " [checked]" } else { " [unchecked]" });
            }
            if el.disabled {
                line.push_str(" [disabled]");
            }
            if let Some(expanded) = el.expanded {
                line.push_str(if expanded { " [expanded]" } else { " [collapsed]" });
            }
            if let Some(ref_id) = &el.ref_id {
                line.push_str(&format!(" [ref={ref_id}]"));
            }
            if el.children.is_empty() {
                if let Some(value) = &el.value {
                    line.push_str(&format!(": {}", flatten(value)));
                }
            } else {
                line.push(':');
            }
            out.push_str(&line);
            out.push('\n');
            for child in &el.children {
                render_node(child, depth + 1, out);
            }
        }
    }
}

/// Node text must stay on one rendered line.
fn flatten(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Wrap a rendered tree body with the page header, indenting the body four
/// spaces under the `Page Snapshot` marker.
pub(crate) fn format_document(url: &str, title: &str, body: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("- Page URL: {url}\n"));
    out.push_str(&format!("- Page Title: {title}\n"));
    out.push_str("- Page Snapshot");
    for line in body.trim_end().lines() {
        out.push('\n');
        if !line.is_empty() {
            out.push_str("    ");
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -- fixtures -----------------------------------------------------------

    fn ax_payload() -> Value {
        json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "ignored": false,
                    "role": { "type": "internalRole", "value": "RootWebArea" },
                    "name": { "type": "computedString", "value": "Demo Page" },
                    "childIds": ["2", "3", "6"],
                    "backendDOMNodeId": 100
                },
                {
                    "nodeId": "2",
                    "ignored": false,
                    "role": { "type": "role", "value": "heading" },
                    "name": { "type": "computedString", "value": "Welcome" },
                    "childIds": [],
                    "backendDOMNodeId": 110
                },
                {
                    "nodeId": "3",
                    "ignored": true,
                    "role": { "type": "role", "value": "generic" },
                    "childIds": ["4", "5"],
                    "backendDOMNodeId": 120
                },
                {
                    "nodeId": "4",
                    "ignored": false,
                    "role": { "type": "role", "value": "button" },
                    "name": { "type": "computedString", "value": "Sign In" },
                    "childIds": [],
                    "backendDOMNodeId": 130,
                    "properties": [
                        { "name": "disabled", "value": { "type": "boolean", "value": true } }
                    ]
                },
                {
                    "nodeId": "5",
                    "ignored": false,
                    "role": { "type": "role", "value": "checkbox" },
                    "name": { "type": "computedString", "value": "Remember me" },
                    "childIds": [],
                    "backendDOMNodeId": 140,
                    "properties": [
                        { "name": "checked", "value": { "type": "tristate", "value": "true" } }
                    ]
                },
                {
                    "nodeId": "6",
                    "ignored": false,
                    "role": { "type": "role", "value": "StaticText" },
                    "name": { "type": "computedString", "value": "Some body text" },
                    "childIds": [],
                    "backendDOMNodeId": 150
                }
            ]
        })
    }

    fn raw(role: &str, name: &str, backend: Option<i64>, children: Vec<RawNode>) -> RawNode {
        RawNode {
            role: role.to_string(),
            name: name.to_string(),
            value: None,
            backend_node_id: backend,
            checked: None,
            disabled: false,
            expanded: None,
            children,
        }
    }

    // -- parsing ------------------------------------------------------------

    #[test]
    fn flat_nodes_parse_wrapped_fields() {
        let flat = parse_ax_nodes(&ax_payload()).unwrap();
        assert_eq!(flat.len(), 6);
        assert_eq!(flat[0].role, "RootWebArea");
        assert_eq!(flat[0].name, "Demo Page");
        assert_eq!(flat[0].backend_node_id, Some(100));
        assert_eq!(flat[0].child_ids, vec!["2", "3", "6"]);
        assert!(flat[2].ignored);
        assert!(flat[3].disabled);
        assert_eq!(flat[4].checked, Some(true));
    }

    #[test]
    fn missing_nodes_array_is_protocol_error() {
        assert!(matches!(
            parse_ax_nodes(&json!({ "not_nodes": [] })),
            Err(BrowserError::Protocol { .. })
        ));
    }

    #[test]
    fn ignored_nodes_hoist_their_children() {
        let roots = parse_frame_payload(&ax_payload()).unwrap();
        assert_eq!(roots.len(), 1);
        let root = &roots[0];
        assert_eq!(root.role, "RootWebArea");
        // The ignored generic wrapper is gone; its button and checkbox
        // surface directly under the root, next to the heading and text.
        let roles: Vec<&str> = root.children.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["heading", "button", "checkbox", "StaticText"]);
    }

    // -- skip policy ---------------------------------------------------------

    #[test]
    fn presentation_roles_hoist() {
        assert!(should_hoist(&raw("none", "", None, Vec::new())));
        assert!(should_hoist(&raw("presentation", "", None, Vec::new())));
    }

    #[test]
    fn nameless_generic_hoists_named_generic_stays() {
        assert!(should_hoist(&raw("generic", "", None, Vec::new())));
        assert!(!should_hoist(&raw("generic", "Named", None, Vec::new())));
    }

    #[test]
    fn inline_text_boxes_drop() {
        assert!(should_drop(&raw("InlineTextBox", "x", None, Vec::new())));
        assert!(!should_drop(&raw("StaticText", "x", None, Vec::new())));
    }

    #[test]
    fn internal_roles_normalize() {
        assert_eq!(normalize_role("RootWebArea"), "document");
        assert_eq!(normalize_role("StaticText"), "text");
        assert_eq!(normalize_role("Iframe"), "iframe");
        assert_eq!(normalize_role("button"), "button");
    }

    #[test]
    fn ref_policy_targets_interactive_and_labelled() {
        assert!(wants_ref("button", ""));
        assert!(wants_ref("iframe", ""));
        assert!(wants_ref("heading", "Welcome"));
        assert!(!wants_ref("banner", ""));
        assert!(!wants_ref("text", "Some body text"));
    }

    // -- transform ------------------------------------------------------------

    #[test]
    fn transform_mints_refs_in_document_order() {
        let mut refs = HashMap::new();
        let roots = transform_frame(
            parse_frame_payload(&ax_payload()).unwrap(),
            0,
            3,
            &mut refs,
        );
        assert_eq!(roots.len(), 1);
        let TreeNode::Element(root) = &roots[0] else {
            panic!("root should be an element");
        };
        // Root is named, so it takes the first token.
        assert_eq!(root.ref_id.as_deref(), Some("s3e1"));
        let TreeNode::Element(heading) = &root.children[0] else {
            panic!("expected heading element");
        };
        assert_eq!(heading.ref_id.as_deref(), Some("s3e2"));
        let TreeNode::Element(button) = &root.children[1] else {
            panic!("expected button element");
        };
        assert_eq!(button.ref_id.as_deref(), Some("s3e3"));
        assert_eq!(refs.get("s3e3").unwrap().backend_node_id, 130);
        // The text run renders but is not addressable.
        let TreeNode::Element(text) = &root.children[3] else {
            panic!("expected text element");
        };
        assert_eq!(text.role, "text");
        assert!(text.ref_id.is_none());
    }

    #[test]
    fn nested_frame_refs_carry_the_frame_prefix() {
        let mut refs = HashMap::new();
        let raw_nodes = vec![raw("button", "Inside", Some(900), Vec::new())];
        let nodes = transform_frame(raw_nodes, 2, 5, &mut refs);
        let TreeNode::Element(button) = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(button.ref_id.as_deref(), Some("f2s5e1"));
        assert_eq!(
            refs.get("f2s5e1").copied().unwrap(),
            RefTarget {
                frame_index: 2,
                backend_node_id: 900
            }
        );
    }

    // -- ref tokens -----------------------------------------------------------

    #[test]
    fn minted_refs_round_trip() {
        for (frame, generation, counter) in [(0usize, 1u64, 1u64), (1, 3, 12), (7, 42, 9)] {
            let token = mint_ref(frame, generation, counter);
            let parsed = parse_ref(&token).unwrap();
            assert_eq!(parsed.frame_index, frame);
            assert_eq!(parsed.generation, generation);
        }
    }

    #[test]
    fn bare_ref_is_main_document() {
        let parsed = parse_ref("s3e12").unwrap();
        assert_eq!(parsed.frame_index, 0);
        assert_eq!(parsed.generation, 3);
    }

    #[test]
    fn framed_ref_parses_index_and_node() {
        let parsed = parse_ref("f1s3e12").unwrap();
        assert_eq!(parsed.frame_index, 1);
        assert_eq!(parsed.generation, 3);
    }

    #[test]
    fn malformed_refs_are_rejected() {
        for raw in ["", "f", "f1", "fs1e2", "s3", "s3e", "e12", "s3e1x", "click me"] {
            assert!(
                matches!(parse_ref(raw), Err(BrowserError::BadRef { .. })),
                "{raw:?} should not parse"
            );
        }
    }

    // -- resolution -----------------------------------------------------------

    fn snapshot_with(generation: u64, frames: usize, tokens: &[(&str, usize, i64)]) -> Snapshot {
        Snapshot {
            generation,
            text: String::new(),
            frames: (0..frames).map(|i| format!("FRAME{i}")).collect(),
            refs: tokens
                .iter()
                .map(|(token, frame_index, backend)| {
                    (
                        token.to_string(),
                        RefTarget {
                            frame_index: *frame_index,
                            backend_node_id: *backend,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn snapshot_reports_its_generation_and_frame_count() {
        let snapshot = snapshot_with(3, 2, &[("f1s3e2", 1, 42)]);
        assert_eq!(snapshot.generation(), 3);
        assert_eq!(snapshot.frame_count(), 2);
    }

    #[test]
    fn resolve_returns_the_target() {
        let snapshot = snapshot_with(3, 2, &[("f1s3e2", 1, 42)]);
        assert_eq!(
            snapshot.resolve("f1s3e2").unwrap(),
            RefTarget {
                frame_index: 1,
                backend_node_id: 42
            }
        );
    }

    #[test]
    fn absent_frame_index_fails_without_fallback() {
        let snapshot = snapshot_with(3, 1, &[("s3e1", 0, 7)]);
        assert!(matches!(
            snapshot.resolve("f4s3e1"),
            Err(BrowserError::FrameMissing)
        ));
    }

    #[test]
    fn stale_generation_fails_even_for_known_shape() {
        let snapshot = snapshot_with(4, 1, &[("s4e1", 0, 7)]);
        assert!(matches!(
            snapshot.resolve("s3e1"),
            Err(BrowserError::StaleRef)
        ));
    }

    #[test]
    fn unknown_token_in_current_generation_fails() {
        let snapshot = snapshot_with(4, 1, &[("s4e1", 0, 7)]);
        assert!(matches!(
            snapshot.resolve("s4e99"),
            Err(BrowserError::BadRef { .. })
        ));
    }

    // -- rendering ------------------------------------------------------------

    #[test]
    fn rendered_tree_shows_roles_names_and_refs() {
        let mut refs = HashMap::new();
        let roots = transform_frame(
            parse_frame_payload(&ax_payload()).unwrap(),
            0,
            1,
            &mut refs,
        );
        let text = render_tree(&roots);
        assert!(text.contains("- document \"Demo Page\" [ref=s1e1]:"));
        assert!(text.contains("  - heading \"Welcome\" [ref=s1e2]"));
        assert!(text.contains("  - button \"Sign In\" [disabled] [ref=s1e3]"));
        assert!(text.contains("  - checkbox \"Remember me\" [checked] [ref=s1e4]"));
        assert!(text.contains("  - text \"Some body text\""));
    }

    #[test]
    fn zero_frame_document_renders_without_frame_markers() {
        let mut refs = HashMap::new();
        let roots = transform_frame(
            parse_frame_payload(&ax_payload()).unwrap(),
            0,
            1,
            &mut refs,
        );
        let text = render_tree(&roots);
        assert!(!text.contains("iframe"));
        assert!(!text.contains("[ref=f"), "no frame-prefixed refs expected: {text}");
    }

    #[test]
    fn leaf_value_renders_after_the_line() {
        let node = TreeNode::Element(ElementNode {
            role: "textbox".into(),
            name: "Search".into(),
            value: Some("query".into()),
            ref_id: Some("s1e1".into()),
            checked: None,
            disabled: false,
            expanded: None,
            children: Vec::new(),
        });
        assert_eq!(
            render_tree(&[node]),
            "- textbox \"Search\" [ref=s1e1]: query\n"
        );
    }

    #[test]
    fn placeholder_line_renders_under_iframe() {
        let node = TreeNode::Element(ElementNode {
            role: "iframe".into(),
            name: String::new(),
            value: None,
            ref_id: Some("s1e1".into()),
            checked: None,
            disabled: false,
            expanded: None,
            children: vec![TreeNode::Text(IFRAME_PLACEHOLDER.into())],
        });
        let text = render_tree(&[node]);
        assert_eq!(
            text,
            "- iframe [ref=s1e1]:\n  - <could not take iframe snapshot>\n"
        );
    }

    #[test]
    fn multiline_names_flatten_to_one_line() {
        let node = TreeNode::Element(ElementNode {
            role: "link".into(),
            name: "two\nlines".into(),
            value: None,
            ref_id: None,
            checked: None,
            disabled: false,
            expanded: None,
            children: Vec::new(),
        });
        assert_eq!(render_tree(&[node]), "- link \"two lines\"\n");
    }

    #[test]
    fn document_header_wraps_and_indents_the_body() {
        let doc = format_document(
            "https://example.com/",
            "Example",
            "- document \"Example\":\n  - heading \"Hi\"\n",
        );
        let expected = "- Page URL: https://example.com/\n\
                        - Page Title: Example\n\
                        - Page Snapshot\n    \
                        - document \"Example\":\n      \
                        - heading \"Hi\"";
        assert_eq!(doc, expected);
    }

    #[test]
    fn empty_body_keeps_the_header() {
        let doc = format_document("about:blank", "", "");
        assert_eq!(doc, "- Page URL: about:blank\n- Page Title: \n- Page Snapshot");
    }
}
