//! # Transposed Chunk Encoding
//!
//! A transposed chunk stores protobuf records column-wise: values of the
//! same field across all records sit together, so they compress better and
//! a reader projecting a few fields can skip everything else without even
//! decompressing it.
//!
//! ## Payload Layout
//!
//! ```text
//! +---------------------+-----------+------------+----------------+-------------+
//! | compression id (u32)| dict_size | dictionary | bucket data    | transitions |
//! +---------------------+-----------+------------+----------------+-------------+
//! ```
//!
//! `dict_size` (LEB128) is the byte length of the dictionary, which is never
//! compressed. The dictionary describes a forest of field nodes, the bucket
//! table, and the transition stream:
//!
//! ```text
//! dictionary:
//!   varint num_nodes
//!   node[num_nodes]:
//!     varint parent_plus_one        // 0 = record root; parents precede children
//!     varint field_number           // protobuf field number, 1..=536870911
//!     varint node_kind              // 0 = submessage, else wire type + 1
//!     if leaf:
//!       varint bucket_index
//!       varint values_size          // decoded bytes of this node's value stream
//!   varint num_buckets
//!   bucket[num_buckets]:
//!     varint compressed_size
//!     varint decoded_size
//!     u64 LE content hash           // of the compressed bytes
//!   varint transitions_compressed_size
//!   varint transitions_decoded_size
//!   u64 LE content hash             // of the compressed transition stream
//! ```
//!
//! A bucket's decoded bytes are the value streams of its leaves,
//! concatenated in node-index order. Values are stored in wire form:
//! varint fields as raw varints, fixed32/fixed64 as their 4/8 bytes,
//! length-delimited fields as a LEB128 length followed by the bytes.
//!
//! The transition stream replays each record as a walk over the node
//! forest, one LEB128 symbol per step:
//!
//! | Symbol | Meaning |
//! |--------|---------|
//! | `0` | end of record |
//! | `1` | close the open submessage |
//! | `n >= 2` | visit node `n - 2`: emit a leaf value, or open a submessage |
//!
//! A visited node must be a child of the currently open submessage (or a
//! root node at walk depth zero); anything else is data loss.
//!
//! ## Projection
//!
//! Node inclusion is decided once per chunk by walking the compiled
//! projection trie down the node forest. Excluded leaves never touch their
//! value streams, and a bucket whose kept-leaf set is empty is never
//! decompressed; its bytes are not even hashed. Included submessages are
//! reassembled with minimal length prefixes; `exists`-projected submessages
//! emit an empty submessage in place of their subtree.
//!
//! ## Output
//!
//! Decoding emits, per record, the concatenation of its kept fields in walk
//! order (the writer emits walks in the record's own field order, which is
//! ascending for canonically serialized messages). Without projection the
//! total output must equal the chunk header's `decoded_data_size`.

use bumpalo::Bump;
use eyre::Result;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::encoding::compression::{compress, CompressionType, DecompressorPool};
use crate::encoding::projection::{Decision, FieldProjection};
use crate::encoding::varint::{push_varint, read_varint, varint_len};
use crate::encoding::DecodedRecords;
use crate::error::{data_loss, failed_precondition};
use crate::hashing::content_hash;

const NODE_KIND_SUBMESSAGE: u64 = 0;
const SYMBOL_END_OF_RECORD: u64 = 0;
const SYMBOL_CLOSE: u64 = 1;
const SYMBOL_NODE_BASE: u64 = 2;

const MAX_FIELD_NUMBER: u64 = (1 << 29) - 1;
const MAX_NESTING: usize = 64;

/// Sanity bound on any single decoded sub-stream, checked before
/// allocating for decompression.
const MAX_STREAM_SIZE: u64 = 1 << 31;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN_DELIMITED: u8 = 2;
const WIRE_FIXED32: u8 = 5;

#[derive(Debug, Clone, Copy)]
struct NodeInfo {
    /// 0 = record root.
    parent_plus_one: u32,
    field: u32,
    /// `None` for submessage nodes.
    wire_type: Option<u8>,
    bucket: u32,
    stream_start: usize,
    stream_end: usize,
    decision: Decision,
}

#[derive(Debug, Clone, Copy)]
struct BucketInfo {
    compressed_start: usize,
    compressed_end: usize,
    decoded_size: usize,
    hash: u64,
}

enum BucketState<'b> {
    Pending,
    Ready(&'b [u8]),
}

/// Decodes a transposed chunk payload into its record table.
///
/// `num_records` comes from the chunk header, except for metadata chunks
/// where the header says zero and the payload carries exactly one record.
pub fn decode(
    payload: &[u8],
    num_records: u64,
    projection: &FieldProjection,
    pool: &mut DecompressorPool,
    arena: &Bump,
) -> Result<DecodedRecords> {
    if payload.len() < 4 {
        return Err(data_loss(
            "transposed chunk payload shorter than its codec id",
        ));
    }
    let codec = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let codec = CompressionType::try_from(codec)?;

    let mut cursor = &payload[4..];
    let dict_size = read_dict_varint(&mut cursor, "dictionary size")?;
    if dict_size > cursor.len() as u64 {
        return Err(data_loss("dictionary extends past the payload"));
    }
    let (mut dict, after_dict) = cursor.split_at(dict_size as usize);
    let dict_end_offset = payload.len() - after_dict.len();

    let compiled = projection.compile();

    // Nodes.
    let num_nodes = read_dict_varint(&mut dict, "node count")?;
    if num_nodes > (u32::MAX - SYMBOL_NODE_BASE as u32) as u64 {
        return Err(data_loss("node count exceeds the symbol space"));
    }
    let mut nodes: Vec<NodeInfo> = Vec::with_capacity(num_nodes as usize);
    for index in 0..num_nodes {
        let parent_plus_one = read_dict_varint(&mut dict, "node parent")?;
        if parent_plus_one > index {
            return Err(data_loss("node parent does not precede the node"));
        }
        let field = read_dict_varint(&mut dict, "node field number")?;
        if field == 0 || field > MAX_FIELD_NUMBER {
            return Err(data_loss(format!("invalid field number: {}", field)));
        }
        let kind = read_dict_varint(&mut dict, "node kind")?;
        let wire_type = match kind {
            NODE_KIND_SUBMESSAGE => None,
            k => Some(decode_wire_kind(k)?),
        };
        let is_leaf = wire_type.is_some();

        // A leaf cannot have children; a parent must be a submessage.
        let parent_decision = if parent_plus_one == 0 {
            None
        } else {
            let parent = &nodes[parent_plus_one as usize - 1];
            if parent.wire_type.is_some() {
                return Err(data_loss("leaf node used as a parent"));
            }
            Some(parent.decision)
        };
        let decision = match parent_decision {
            None => compiled.root(field as u32, is_leaf),
            Some(Decision::Keep) => Decision::Keep,
            Some(Decision::Descend(state)) => compiled.step(state, field as u32, is_leaf),
            Some(Decision::ExistsOnly) | Some(Decision::Drop) => Decision::Drop,
        };

        let (bucket, values_size) = if is_leaf {
            let bucket = read_dict_varint(&mut dict, "leaf bucket index")?;
            if bucket > u32::MAX as u64 {
                return Err(data_loss("leaf bucket index out of range"));
            }
            let values_size = read_dict_varint(&mut dict, "leaf stream size")?;
            if values_size > MAX_STREAM_SIZE {
                return Err(data_loss("leaf stream size exceeds the stream limit"));
            }
            (bucket, values_size)
        } else {
            (0, 0)
        };

        nodes.push(NodeInfo {
            parent_plus_one: parent_plus_one as u32,
            field: field as u32,
            wire_type,
            bucket: bucket as u32,
            stream_start: 0,
            stream_end: values_size as usize,
            decision,
        });
    }

    // Bucket table.
    let num_buckets = read_dict_varint(&mut dict, "bucket count")?;
    let mut bucket_infos: Vec<BucketInfo> = Vec::with_capacity(num_buckets as usize);
    let mut compressed_offset = dict_end_offset;
    for _ in 0..num_buckets {
        let compressed_size = read_dict_varint(&mut dict, "bucket compressed size")? as usize;
        let decoded_size = read_dict_varint(&mut dict, "bucket decoded size")?;
        if decoded_size > MAX_STREAM_SIZE {
            return Err(data_loss("bucket decoded size exceeds the stream limit"));
        }
        let decoded_size = decoded_size as usize;
        let hash = read_dict_hash(&mut dict)?;
        let compressed_end = compressed_offset
            .checked_add(compressed_size)
            .filter(|&end| end <= payload.len())
            .ok_or_else(|| data_loss("bucket data extends past the payload"))?;
        bucket_infos.push(BucketInfo {
            compressed_start: compressed_offset,
            compressed_end,
            decoded_size,
            hash,
        });
        compressed_offset = compressed_end;
    }

    // Transition stream table.
    let transitions_compressed = read_dict_varint(&mut dict, "transition stream size")? as usize;
    let transitions_decoded = read_dict_varint(&mut dict, "transition decoded size")?;
    if transitions_decoded > MAX_STREAM_SIZE {
        return Err(data_loss("transition decoded size exceeds the stream limit"));
    }
    let transitions_hash = read_dict_hash(&mut dict)?;
    if !dict.is_empty() {
        return Err(data_loss("trailing bytes after the dictionary"));
    }
    let transitions_end = compressed_offset
        .checked_add(transitions_compressed)
        .filter(|&end| end <= payload.len())
        .ok_or_else(|| data_loss("transition stream extends past the payload"))?;
    if transitions_end != payload.len() {
        return Err(data_loss("trailing bytes after the transition stream"));
    }

    // Assign stream bounds: leaves of one bucket are concatenated in node
    // index order, and their sizes must cover the bucket exactly.
    let mut bucket_fill = vec![0usize; bucket_infos.len()];
    for node in &mut nodes {
        if node.wire_type.is_none() {
            continue;
        }
        let bucket = node.bucket as usize;
        if bucket >= bucket_infos.len() {
            return Err(data_loss("leaf references a bucket out of range"));
        }
        let size = node.stream_end;
        node.stream_start = bucket_fill[bucket];
        node.stream_end = bucket_fill[bucket]
            .checked_add(size)
            .filter(|&end| end <= bucket_infos[bucket].decoded_size)
            .ok_or_else(|| data_loss("leaf streams overflow their bucket"))?;
        bucket_fill[bucket] = node.stream_end;
    }
    for (bucket, &fill) in bucket_fill.iter().enumerate() {
        if fill != bucket_infos[bucket].decoded_size {
            return Err(data_loss(format!(
                "bucket {} holds {} bytes but its leaves claim {}",
                bucket, bucket_infos[bucket].decoded_size, fill
            )));
        }
    }

    // The transition stream is always needed.
    let transitions_bytes = &payload[compressed_offset..transitions_end];
    if content_hash(transitions_bytes) != transitions_hash {
        return Err(data_loss("transition stream hash mismatch"));
    }
    let transitions = pool.decompress(codec, transitions_bytes, transitions_decoded)?;

    let mut walker = Walker {
        payload,
        codec,
        nodes,
        consumed: vec![0usize; num_nodes as usize],
        bucket_infos,
        buckets: (0..num_buckets).map(|_| BucketState::Pending).collect(),
        arena,
    };
    walker.replay(&transitions, num_records, pool, projection.includes_all())
}

fn decode_wire_kind(kind: u64) -> Result<u8> {
    match kind {
        k if k == WIRE_VARINT as u64 + 1 => Ok(WIRE_VARINT),
        k if k == WIRE_FIXED64 as u64 + 1 => Ok(WIRE_FIXED64),
        k if k == WIRE_LEN_DELIMITED as u64 + 1 => Ok(WIRE_LEN_DELIMITED),
        k if k == WIRE_FIXED32 as u64 + 1 => Ok(WIRE_FIXED32),
        k => Err(data_loss(format!("invalid node kind: {}", k))),
    }
}

fn read_dict_varint(cursor: &mut &[u8], what: &str) -> Result<u64> {
    read_varint(cursor).map_err(|e| data_loss(format!("bad {what}: {e}")))
}

fn read_dict_hash(cursor: &mut &[u8]) -> Result<u64> {
    if cursor.len() < 8 {
        return Err(data_loss("dictionary ends inside a hash"));
    }
    let (bytes, rest) = cursor.split_at(8);
    *cursor = rest;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

struct Walker<'b, 'p> {
    payload: &'p [u8],
    codec: CompressionType,
    nodes: Vec<NodeInfo>,
    consumed: Vec<usize>,
    bucket_infos: Vec<BucketInfo>,
    buckets: Vec<BucketState<'b>>,
    arena: &'b Bump,
}

enum Frame {
    /// Submessage being reassembled into the scratch stack.
    Emit { node: u32 },
    /// Submessage whose subtree is dropped (or reduced to a marker).
    Elide { node: u32 },
}

impl<'b, 'p: 'b> Walker<'b, 'p> {
    fn replay(
        &mut self,
        transitions: &[u8],
        num_records: u64,
        pool: &mut DecompressorPool,
        verify_full_consumption: bool,
    ) -> Result<DecodedRecords> {
        let mut cursor = &transitions[..];
        let mut values = Vec::new();
        let mut limits = Vec::with_capacity(num_records as usize);
        let mut stack: SmallVec<[Frame; 8]> = SmallVec::new();
        let mut scratch: Vec<Vec<u8>> = Vec::new();

        for _ in 0..num_records {
            loop {
                let symbol = read_varint(&mut cursor)
                    .map_err(|e| data_loss(format!("bad transition stream: {e}")))?;
                match symbol {
                    SYMBOL_END_OF_RECORD => {
                        if !stack.is_empty() {
                            return Err(data_loss("record ended inside an open submessage"));
                        }
                        limits.push(values.len());
                        break;
                    }
                    SYMBOL_CLOSE => {
                        let frame = stack
                            .pop()
                            .ok_or_else(|| data_loss("submessage close without an open one"))?;
                        if let Frame::Emit { node } = frame {
                            let body = scratch.pop().unwrap_or_default();
                            let sink = scratch.last_mut().unwrap_or(&mut values);
                            let field = self.nodes[node as usize].field;
                            push_varint(
                                ((field as u64) << 3) | WIRE_LEN_DELIMITED as u64,
                                sink,
                            );
                            push_varint(body.len() as u64, sink);
                            sink.extend_from_slice(&body);
                        }
                    }
                    symbol => {
                        let index = (symbol - SYMBOL_NODE_BASE) as usize;
                        if index >= self.nodes.len() {
                            return Err(data_loss(format!(
                                "transition references node {} of {}",
                                index,
                                self.nodes.len()
                            )));
                        }
                        let node = self.nodes[index];

                        // The node must be a child of the open submessage.
                        let open = match stack.last() {
                            None => 0,
                            Some(Frame::Emit { node } | Frame::Elide { node }) => node + 1,
                        };
                        if node.parent_plus_one != open {
                            return Err(data_loss(
                                "transition visits a node outside the open submessage",
                            ));
                        }

                        match node.wire_type {
                            None => {
                                match node.decision {
                                    Decision::Keep | Decision::Descend(_) => {
                                        stack.push(Frame::Emit {
                                            node: index as u32,
                                        });
                                        scratch.push(Vec::new());
                                    }
                                    Decision::ExistsOnly => {
                                        let sink = scratch.last_mut().unwrap_or(&mut values);
                                        push_varint(
                                            ((node.field as u64) << 3)
                                                | WIRE_LEN_DELIMITED as u64,
                                            sink,
                                        );
                                        push_varint(0, sink);
                                        stack.push(Frame::Elide {
                                            node: index as u32,
                                        });
                                    }
                                    Decision::Drop => {
                                        stack.push(Frame::Elide {
                                            node: index as u32,
                                        });
                                    }
                                }
                                if stack.len() > MAX_NESTING {
                                    return Err(data_loss("submessage nesting too deep"));
                                }
                            }
                            Some(wire_type) => match node.decision {
                                Decision::Keep | Decision::Descend(_) => {
                                    let value = self.next_value(index, wire_type, pool)?;
                                    let sink = scratch.last_mut().unwrap_or(&mut values);
                                    push_varint(
                                        ((node.field as u64) << 3) | wire_type as u64,
                                        sink,
                                    );
                                    sink.extend_from_slice(value);
                                }
                                Decision::ExistsOnly | Decision::Drop => {}
                            },
                        }
                    }
                }
            }
        }

        if !cursor.is_empty() {
            return Err(data_loss("transition stream continues past the last record"));
        }
        if verify_full_consumption {
            for (index, node) in self.nodes.iter().enumerate() {
                if node.wire_type.is_some()
                    && self.consumed[index] != node.stream_end - node.stream_start
                {
                    return Err(data_loss("leaf value stream not fully consumed"));
                }
            }
        }

        Ok(DecodedRecords { values, limits })
    }

    /// Next wire-form value of leaf `index`, decompressing its bucket on
    /// first touch.
    fn next_value(
        &mut self,
        index: usize,
        wire_type: u8,
        pool: &mut DecompressorPool,
    ) -> Result<&'b [u8]> {
        let node = self.nodes[index];
        let bucket = self.bucket(node.bucket as usize, pool)?;
        let stream = &bucket[node.stream_start..node.stream_end];
        let at = self.consumed[index];
        let remaining = &stream[at..];

        let len = match wire_type {
            WIRE_VARINT => {
                let mut probe = remaining;
                read_varint(&mut probe)
                    .map_err(|e| data_loss(format!("bad varint value: {e}")))?;
                remaining.len() - probe.len()
            }
            WIRE_FIXED64 => 8,
            WIRE_FIXED32 => 4,
            WIRE_LEN_DELIMITED => {
                let mut probe = remaining;
                let body = read_varint(&mut probe)
                    .map_err(|e| data_loss(format!("bad length-delimited value: {e}")))?;
                let prefix = remaining.len() - probe.len();
                prefix
                    .checked_add(usize::try_from(body).map_err(|_| {
                        data_loss("length-delimited value exceeds addressable memory")
                    })?)
                    .ok_or_else(|| data_loss("length-delimited value overflows"))?
            }
            _ => unreachable!("wire kinds validated during dictionary parse"),
        };

        if len > remaining.len() {
            return Err(data_loss("leaf value stream exhausted"));
        }
        self.consumed[index] = at + len;
        Ok(&remaining[..len])
    }

    fn bucket(&mut self, index: usize, pool: &mut DecompressorPool) -> Result<&'b [u8]> {
        if let BucketState::Ready(bytes) = &self.buckets[index] {
            return Ok(*bytes);
        }
        let info = self.bucket_infos[index];
        let payload: &'p [u8] = self.payload;
        let compressed = &payload[info.compressed_start..info.compressed_end];
        if content_hash(compressed) != info.hash {
            return Err(data_loss(format!("bucket {} hash mismatch", index)));
        }
        let decoded = pool.decompress(self.codec, compressed, info.decoded_size as u64)?;
        let arena: &'b Bump = self.arena;
        let bytes: &'b [u8] = arena.alloc_slice_copy(&decoded);
        self.buckets[index] = BucketState::Ready(bytes);
        Ok(bytes)
    }
}

// --- Encoder -------------------------------------------------------------

#[derive(Debug)]
struct NodeBuild {
    parent_plus_one: u32,
    field: u32,
    /// `None` for submessage nodes.
    wire_type: Option<u8>,
    stream: Vec<u8>,
}

#[derive(Debug, Default)]
struct EncoderState {
    nodes: Vec<NodeBuild>,
    interned: HashMap<(u32, u32, Option<u8>), u32>,
    transitions: Vec<u8>,
}

impl EncoderState {
    fn intern(&mut self, parent_plus_one: u32, field: u32, wire_type: Option<u8>) -> u32 {
        let nodes = &mut self.nodes;
        *self
            .interned
            .entry((parent_plus_one, field, wire_type))
            .or_insert_with(|| {
                nodes.push(NodeBuild {
                    parent_plus_one,
                    field,
                    wire_type,
                    stream: Vec::new(),
                });
                (nodes.len() - 1) as u32
            })
    }

    /// Root ancestor field number of a node, for bucket grouping.
    fn root_field(&self, mut index: u32) -> u32 {
        loop {
            let node = &self.nodes[index as usize];
            if node.parent_plus_one == 0 {
                return node.field;
            }
            index = node.parent_plus_one - 1;
        }
    }
}

/// Encodes serialized protobuf records as a transposed chunk payload.
///
/// Returns the payload and the decoded data size for the chunk header.
/// Records must be valid wire-format messages; arbitrary byte records
/// belong in simple chunks.
pub fn encode(records: &[Vec<u8>], codec: CompressionType) -> Result<(Vec<u8>, u64)> {
    let mut state = EncoderState::default();
    let mut decoded_data_size = 0u64;

    for record in records {
        decoded_data_size += transpose_message(&mut state, record, 0, 0)? as u64;
        push_varint(SYMBOL_END_OF_RECORD, &mut state.transitions);
    }

    // Group leaves into buckets by their top-level ancestor field, in order
    // of first appearance, so projection skips line up with whole buckets.
    let mut bucket_of_root: HashMap<u32, u32> = HashMap::new();
    let mut bucket_count = 0u32;
    let mut leaf_buckets: Vec<u32> = Vec::with_capacity(state.nodes.len());
    for index in 0..state.nodes.len() {
        if state.nodes[index].wire_type.is_none() {
            leaf_buckets.push(0);
            continue;
        }
        let root = state.root_field(index as u32);
        let bucket = *bucket_of_root.entry(root).or_insert_with(|| {
            bucket_count += 1;
            bucket_count - 1
        });
        leaf_buckets.push(bucket);
    }

    let mut bucket_streams: Vec<Vec<u8>> = vec![Vec::new(); bucket_count as usize];
    for (index, node) in state.nodes.iter().enumerate() {
        if node.wire_type.is_some() {
            bucket_streams[leaf_buckets[index] as usize].extend_from_slice(&node.stream);
        }
    }

    // Dictionary.
    let mut dict = Vec::new();
    push_varint(state.nodes.len() as u64, &mut dict);
    for (index, node) in state.nodes.iter().enumerate() {
        push_varint(node.parent_plus_one as u64, &mut dict);
        push_varint(node.field as u64, &mut dict);
        match node.wire_type {
            None => push_varint(NODE_KIND_SUBMESSAGE, &mut dict),
            Some(wire_type) => {
                push_varint(wire_type as u64 + 1, &mut dict);
                push_varint(leaf_buckets[index] as u64, &mut dict);
                push_varint(node.stream.len() as u64, &mut dict);
            }
        }
    }
    push_varint(bucket_count as u64, &mut dict);
    let mut compressed_buckets = Vec::with_capacity(bucket_count as usize);
    for stream in &bucket_streams {
        let compressed = compress(codec, stream)?;
        push_varint(compressed.len() as u64, &mut dict);
        push_varint(stream.len() as u64, &mut dict);
        dict.extend_from_slice(&content_hash(&compressed).to_le_bytes());
        compressed_buckets.push(compressed);
    }
    let compressed_transitions = compress(codec, &state.transitions)?;
    push_varint(compressed_transitions.len() as u64, &mut dict);
    push_varint(state.transitions.len() as u64, &mut dict);
    dict.extend_from_slice(&content_hash(&compressed_transitions).to_le_bytes());

    let mut payload = Vec::new();
    payload.extend_from_slice(&codec.id().to_le_bytes());
    push_varint(dict.len() as u64, &mut payload);
    payload.extend_from_slice(&dict);
    for compressed in &compressed_buckets {
        payload.extend_from_slice(compressed);
    }
    payload.extend_from_slice(&compressed_transitions);

    Ok((payload, decoded_data_size))
}

/// Transposes one message level, returning the reassembled output length
/// the decoder will produce for it.
fn transpose_message(
    state: &mut EncoderState,
    message: &[u8],
    parent_plus_one: u32,
    depth: usize,
) -> Result<usize> {
    if depth > MAX_NESTING {
        return Err(failed_precondition("message nesting too deep to transpose"));
    }
    let mut cursor = message;
    let mut emitted = 0usize;
    while !cursor.is_empty() {
        let tag = read_varint(&mut cursor)
            .map_err(|e| failed_precondition(format!("record is not a message: {e}")))?;
        let field = tag >> 3;
        let wire_type = (tag & 7) as u8;
        if field == 0 || field > MAX_FIELD_NUMBER {
            return Err(failed_precondition(format!(
                "record is not a message: field number {}",
                field
            )));
        }

        match wire_type {
            WIRE_VARINT => {
                let before = cursor;
                read_varint(&mut cursor)
                    .map_err(|e| failed_precondition(format!("record is not a message: {e}")))?;
                let value = &before[..before.len() - cursor.len()];
                emitted += emit_leaf(state, parent_plus_one, field as u32, wire_type, value);
            }
            WIRE_FIXED64 => {
                let value = take(&mut cursor, 8)?;
                emitted += emit_leaf(state, parent_plus_one, field as u32, wire_type, value);
            }
            WIRE_FIXED32 => {
                let value = take(&mut cursor, 4)?;
                emitted += emit_leaf(state, parent_plus_one, field as u32, wire_type, value);
            }
            WIRE_LEN_DELIMITED => {
                let len_start = cursor;
                let len = read_varint(&mut cursor)
                    .map_err(|e| failed_precondition(format!("record is not a message: {e}")))?;
                let len = usize::try_from(len)
                    .map_err(|_| failed_precondition("record field too large"))?;
                let prefix = len_start.len() - cursor.len();
                let body = take(&mut cursor, len)?;

                if !body.is_empty() && parses_as_message(body, depth + 1) {
                    let node = state.intern(parent_plus_one, field as u32, None);
                    push_varint(SYMBOL_NODE_BASE + node as u64, &mut state.transitions);
                    let body_len = transpose_message(state, body, node + 1, depth + 1)?;
                    push_varint(SYMBOL_CLOSE, &mut state.transitions);
                    emitted += varint_len(tag) + varint_len(body_len as u64) + body_len;
                } else {
                    let value = &len_start[..prefix + len];
                    emitted += emit_leaf(state, parent_plus_one, field as u32, wire_type, value);
                }
            }
            _ => {
                return Err(failed_precondition(format!(
                    "record is not a message: wire type {}",
                    wire_type
                )));
            }
        }
    }
    Ok(emitted)
}

fn emit_leaf(
    state: &mut EncoderState,
    parent_plus_one: u32,
    field: u32,
    wire_type: u8,
    value: &[u8],
) -> usize {
    let node = state.intern(parent_plus_one, field, Some(wire_type));
    state.nodes[node as usize].stream.extend_from_slice(value);
    push_varint(SYMBOL_NODE_BASE + node as u64, &mut state.transitions);
    varint_len(((field as u64) << 3) | wire_type as u64) + value.len()
}

fn take<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if cursor.len() < len {
        return Err(failed_precondition(
            "record is not a message: field extends past the record",
        ));
    }
    let (value, rest) = cursor.split_at(len);
    *cursor = rest;
    Ok(value)
}

/// Strict one-level wire-format check deciding whether a length-delimited
/// value is transposed as a submessage or kept as opaque bytes.
fn parses_as_message(bytes: &[u8], depth: usize) -> bool {
    if depth > MAX_NESTING {
        return false;
    }
    let mut cursor = bytes;
    while !cursor.is_empty() {
        let Ok(tag) = read_varint(&mut cursor) else {
            return false;
        };
        let field = tag >> 3;
        if field == 0 || field > MAX_FIELD_NUMBER {
            return false;
        }
        let ok = match (tag & 7) as u8 {
            WIRE_VARINT => read_varint(&mut cursor).is_ok(),
            WIRE_FIXED64 => take(&mut cursor, 8).is_ok(),
            WIRE_FIXED32 => take(&mut cursor, 4).is_ok(),
            WIRE_LEN_DELIMITED => read_varint(&mut cursor)
                .ok()
                .and_then(|len| usize::try_from(len).ok())
                .is_some_and(|len| take(&mut cursor, len).is_ok()),
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}
