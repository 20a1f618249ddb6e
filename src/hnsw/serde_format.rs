//! Byte-level persistence format for the base graph (spec §4.6
//! "Persistence"). Vectors are not duplicated here — they live in the
//! backing table column and are re-attached by the caller after a topology
//! load (see `HnswIndex::build`, which re-inserts from `(row_id, vector)`
//! pairs fetched from the table).

use crate::error::{Error, Result};
use crate::varint;

use super::{DistanceMetric, Graph, HnswConfig, Node};

const MAGIC: u32 = 0x484e_5357; // "HNSW" packed into a u32
const FORMAT_VERSION: u32 = 1;

fn metric_tag(metric: DistanceMetric) -> u8 {
    match metric {
        DistanceMetric::Euclidean => 0,
        DistanceMetric::Cosine => 1,
        DistanceMetric::DotProduct => 2,
    }
}

fn metric_from_tag(tag: u8) -> Result<DistanceMetric> {
    match tag {
        0 => Ok(DistanceMetric::Euclidean),
        1 => Ok(DistanceMetric::Cosine),
        2 => Ok(DistanceMetric::DotProduct),
        _ => Err(Error::Other(format!("unknown distance metric tag {tag}"))),
    }
}

fn push_varint(buf: &mut Vec<u8>, value: i64) {
    let mut tmp = [0u8; 9];
    let n = varint::write(value, &mut tmp);
    buf.extend_from_slice(&tmp[..n]);
}

/// Serializes the topology of `graph`: metric, dimensions, config,
/// entry_point, per-node row id and per-level neighbor lists.
pub fn serialize(graph: &Graph) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    buf.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    buf.push(metric_tag(graph.metric));
    buf.extend_from_slice(&(graph.dimensions as u32).to_be_bytes());

    buf.extend_from_slice(&(graph.config.m as u32).to_be_bytes());
    buf.extend_from_slice(&(graph.config.m0 as u32).to_be_bytes());
    buf.extend_from_slice(&(graph.config.ef_construction as u32).to_be_bytes());
    buf.extend_from_slice(&(graph.config.ef_search as u32).to_be_bytes());
    buf.push(u8::from(graph.config.use_heuristic));
    buf.extend_from_slice(&graph.config.seed.to_be_bytes());

    buf.extend_from_slice(&(graph.nodes.len() as u32).to_be_bytes());
    buf.extend_from_slice(&graph.entry_point.map(|e| e as i64).unwrap_or(-1).to_be_bytes());
    buf.push(graph.max_level);

    for node in &graph.nodes {
        buf.extend_from_slice(&node.row_id.to_be_bytes());
        buf.push(node.level);
        for level_neighbors in &node.neighbors {
            push_varint(&mut buf, level_neighbors.len() as i64);
            for &neighbor in level_neighbors {
                push_varint(&mut buf, neighbor as i64);
            }
        }
    }

    buf
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u32(&mut self) -> Result<u32> {
        let bytes = self.bytes.get(self.pos..self.pos + 4).ok_or(Error::BadHeaderSize)?;
        self.pos += 4;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        let bytes = self.bytes.get(self.pos..self.pos + 8).ok_or(Error::BadHeaderSize)?;
        self.pos += 8;
        Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn u8(&mut self) -> Result<u8> {
        let byte = *self.bytes.get(self.pos).ok_or(Error::BadHeaderSize)?;
        self.pos += 1;
        Ok(byte)
    }

    fn varint(&mut self) -> Result<i64> {
        let (value, len) = varint::read(&self.bytes[self.pos..]);
        self.pos += len;
        Ok(value)
    }
}

pub fn deserialize(bytes: &[u8]) -> Result<Graph> {
    let mut reader = Reader { bytes, pos: 0 };
    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(Error::InvalidMagic);
    }
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(Error::Other(format!("unsupported HNSW format version {version}")));
    }
    let metric = metric_from_tag(reader.u8()?)?;
    let dimensions = reader.u32()? as usize;

    let config = HnswConfig {
        m: reader.u32()? as usize,
        m0: reader.u32()? as usize,
        ef_construction: reader.u32()? as usize,
        ef_search: reader.u32()? as usize,
        use_heuristic: reader.u8()? != 0,
        seed: reader.i64()?,
    };

    let node_count = reader.u32()? as usize;
    let entry_point_raw = reader.i64()?;
    let entry_point = if entry_point_raw < 0 { None } else { Some(entry_point_raw as u32) };
    let max_level = reader.u8()?;

    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        let row_id = reader.i64()?;
        let level = reader.u8()?;
        let mut neighbors = Vec::with_capacity(level as usize + 1);
        for _ in 0..=level {
            let count = reader.varint()? as usize;
            let mut list = Vec::with_capacity(count);
            for _ in 0..count {
                list.push(reader.varint()? as u32);
            }
            neighbors.push(list);
        }
        nodes.push(Node { row_id, level, neighbors });
    }

    Ok(Graph {
        metric,
        dimensions,
        config,
        vectors: vec![Vec::new(); nodes.len()],
        nodes,
        entry_point,
        max_level,
        rng: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswConfig;

    #[test]
    fn round_trip_is_byte_level_isomorphic() {
        let mut graph = Graph::new(DistanceMetric::Cosine, 4, HnswConfig { seed: 11, ..HnswConfig::default() });
        for i in 0..50i64 {
            graph.insert(i, vec![i as f32, (i * 2) as f32, (i % 7) as f32, 1.0]);
        }

        let bytes = serialize(&graph);
        let restored = deserialize(&bytes).unwrap();

        assert_eq!(restored.entry_point, graph.entry_point);
        assert_eq!(restored.max_level, graph.max_level);
        assert_eq!(restored.nodes.len(), graph.nodes.len());
        for (a, b) in graph.nodes.iter().zip(restored.nodes.iter()) {
            assert_eq!(a.row_id, b.row_id);
            assert_eq!(a.level, b.level);
            assert_eq!(a.neighbors, b.neighbors);
        }
    }
}
