use tracing::debug;

use crate::protocol::{ChannelBuffers, NetworkProtocol};

use super::drain_protocol;

/// The Neon channel view: accumulates ADF source through the handler and
/// compiles it to a binary document.
///
/// Compilation is a placeholder transform: lowercase ASCII gets its high
/// bit set (inverse-video in the host character set). The real compiler
/// slots in here once its semantics are settled.
pub struct NeonCompiler {
    doc: Vec<u8>,
}

impl NeonCompiler {
    pub fn new() -> Self {
        Self { doc: Vec::new() }
    }

    /// Drain the handler and compile what arrived. Returns `true` when a
    /// non-empty document resulted.
    pub fn parse(&mut self, protocol: &mut dyn NetworkProtocol, buffers: &ChannelBuffers) -> bool {
        let source = drain_protocol(protocol, buffers);
        self.doc = compile(&source);
        if self.doc.is_empty() {
            debug!("ADF source produced an empty document");
            return false;
        }
        true
    }

    /// Length of the compiled document.
    pub fn doc_len(&self) -> usize {
        self.doc.len()
    }

    /// Copy the compiled document into `out`. Returns `true` when no
    /// document is staged.
    pub fn read_doc(&self, out: &mut [u8]) -> bool {
        if self.doc.is_empty() {
            return true;
        }
        let n = out.len().min(self.doc.len());
        out[..n].copy_from_slice(&self.doc[..n]);
        false
    }

    pub fn doc(&self) -> &[u8] {
        &self.doc
    }
}

impl Default for NeonCompiler {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(source: &[u8]) -> Vec<u8> {
    source
        .iter()
        .map(|&c| if c.is_ascii_lowercase() { c | 0x80 } else { c })
        .collect()
}
