//! # Snapshot Format
//!
//! Canonical binary encoding of a graph snapshot, used by CLI export/import
//! and the HTTP export endpoint.
//!
//! Layout: Magic Bytes ("FILA") + Version (u8) + postcard payload.

use crate::FilamentError;
use crate::graph::{Graph, SerializableGraph};
use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};

/// Encode a graph snapshot into canonical bytes.
pub fn graph_to_bytes(graph: &Graph) -> Result<Vec<u8>, FilamentError> {
    let payload = postcard::to_allocvec(&SerializableGraph::from(graph))
        .map_err(|e| FilamentError::Serialization(e.to_string()))?;

    let mut bytes = Vec::with_capacity(MAGIC_BYTES.len() + 1 + payload.len());
    bytes.extend_from_slice(MAGIC_BYTES);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode canonical bytes back into a graph.
pub fn graph_from_bytes(bytes: &[u8]) -> Result<Graph, FilamentError> {
    let header_len = MAGIC_BYTES.len() + 1;
    if bytes.len() < header_len {
        return Err(FilamentError::Serialization(
            "snapshot truncated before header".to_string(),
        ));
    }
    if &bytes[..MAGIC_BYTES.len()] != MAGIC_BYTES {
        return Err(FilamentError::Serialization(
            "bad magic bytes".to_string(),
        ));
    }
    let version = bytes[MAGIC_BYTES.len()];
    if version != FORMAT_VERSION {
        return Err(FilamentError::Serialization(format!(
            "unsupported snapshot version {version}, expected {FORMAT_VERSION}"
        )));
    }

    let sg: SerializableGraph = postcard::from_bytes(&bytes[header_len..])
        .map_err(|e| FilamentError::Serialization(e.to_string()))?;
    Ok(Graph::from(sg))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{MutationEngine, PublishEntry, PublishOptions};
    use crate::{Identifier, Metadata};

    fn sample() -> Graph {
        let entries = vec![
            PublishEntry::identifier("a", Metadata::str("alpha")),
            PublishEntry::link("a", "b", Metadata::int(3)),
        ];
        let (graph, _) =
            MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent())
                .expect("seed");
        graph
    }

    #[test]
    fn roundtrip_preserves_graph() {
        let graph = sample();
        let bytes = graph_to_bytes(&graph).expect("encode");
        let restored = graph_from_bytes(&bytes).expect("decode");

        assert_eq!(restored, graph);
        assert_eq!(
            restored.metadata(&Identifier::new("a")),
            Some(&Metadata::str("alpha"))
        );
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = graph_to_bytes(&sample()).expect("encode");
        bytes[0] = b'X';
        assert!(graph_from_bytes(&bytes).is_err());
    }

    #[test]
    fn wrong_version_rejected() {
        let mut bytes = graph_to_bytes(&sample()).expect("encode");
        bytes[4] = FORMAT_VERSION.wrapping_add(1);
        assert!(graph_from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_input_rejected() {
        assert!(graph_from_bytes(b"FIL").is_err());
    }
}
