use serde_json::Value;
use tracing::debug;

use crate::protocol::{ChannelBuffers, NetworkProtocol};

use super::drain_protocol;

/// The JSON channel view.
///
/// `parse` pulls the whole document through the handler; `set_read_query`
/// locates one value inside it and serializes it for the host, terminated
/// by the line ending the translation parameter selects.
pub struct JsonView {
    document: Option<Value>,
    value: Vec<u8>,
}

impl JsonView {
    pub fn new() -> Self {
        Self {
            document: None,
            value: Vec::new(),
        }
    }

    /// Drain the handler and parse the accumulated bytes as JSON.
    /// Returns `true` when a document was parsed.
    pub fn parse(&mut self, protocol: &mut dyn NetworkProtocol, buffers: &ChannelBuffers) -> bool {
        let source = drain_protocol(protocol, buffers);
        match serde_json::from_slice(&source) {
            Ok(doc) => {
                self.document = Some(doc);
                true
            }
            Err(e) => {
                debug!(error = %e, "could not parse JSON document");
                self.document = None;
                false
            }
        }
    }

    /// Select the value named by `query` and serialize it. `param` picks
    /// the line ending appended to the value (translation setting).
    pub fn set_read_query(&mut self, query: &str, param: u8) {
        self.value.clear();
        let Some(doc) = &self.document else {
            return;
        };
        let Some(found) = locate(doc, query) else {
            debug!(query, "JSON query matched nothing");
            return;
        };
        self.value = render(found);
        self.value.extend_from_slice(line_ending(param));
    }

    /// Serialized length of the queried value.
    pub fn value_len(&self) -> usize {
        self.value.len()
    }

    /// Copy the queried value into `out`. Returns `true` when no value is
    /// staged.
    pub fn read_value(&self, out: &mut [u8]) -> bool {
        if self.value.is_empty() {
            return true;
        }
        let n = out.len().min(self.value.len());
        out[..n].copy_from_slice(&self.value[..n]);
        false
    }

    /// The staged value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl Default for JsonView {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk a dotted/bracket query like `items[2].name` (slashes work as
/// separators too) down the document.
fn locate<'a>(doc: &'a Value, query: &str) -> Option<&'a Value> {
    let mut current = doc;
    for token in query.split(['.', '/']).filter(|t| !t.is_empty()) {
        let (name, indexes) = split_indexes(token)?;
        if !name.is_empty() {
            current = current.get(name)?;
        }
        for idx in indexes {
            current = current.get(idx)?;
        }
    }
    Some(current)
}

fn split_indexes(token: &str) -> Option<(&str, Vec<usize>)> {
    let name_end = token.find('[').unwrap_or(token.len());
    let name = &token[..name_end];
    let mut indexes = Vec::new();
    let mut rest = &token[name_end..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped.find(']')?;
        indexes.push(stripped[..close].parse().ok()?);
        rest = &stripped[close + 1..];
    }
    if rest.is_empty() {
        Some((name, indexes))
    } else {
        None
    }
}

fn render(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

fn line_ending(param: u8) -> &'static [u8] {
    match param {
        1 => b"\r",
        2 => b"\n",
        3 => b"\r\n",
        _ => &[crate::frame::EOL],
    }
}
