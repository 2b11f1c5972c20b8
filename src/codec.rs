//! Varint tree codec: compact binary serialization for pack payloads
//!
//! Encodes data trees into a compact byte stream using LEB128 varint
//! lengths. Pack files are a list of `(delta uuid, tree)` entries in
//! this encoding.
//!
//! Author: Moroya Sakamoto

use uuid::Uuid;

use crate::tree::{DataTree, Value};

// ── Discriminants ─────────────────────────────────────────────────────

const VAL_BOOL: u8 = 0x00;
const VAL_INT: u8 = 0x01;
const VAL_FLOAT: u8 = 0x02;
const VAL_TEXT: u8 = 0x03;
const VAL_BYTES: u8 = 0x04;

/// Pack file header
const PACK_MAGIC: &[u8; 4] = b"TVP\x01";

// ── Varint (LEB128) ───────────────────────────────────────────────────

/// Encode a u64 as LEB128 varint.
#[inline]
fn encode_varint_u64(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a u64 from LEB128 varint. Overlong or overflowing input fails.
#[inline]
fn decode_varint_u64(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        let bits = (byte & 0x7F) as u64;
        // Tenth byte carries the top bit only
        if shift == 63 && bits > 1 {
            return None;
        }
        value |= bits << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    Some(value)
}

#[inline]
fn encode_usize(value: usize, buf: &mut Vec<u8>) {
    encode_varint_u64(value as u64, buf);
}

#[inline]
fn decode_usize(data: &[u8], pos: &mut usize) -> Option<usize> {
    decode_varint_u64(data, pos).and_then(|v| usize::try_from(v).ok())
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Option<&'a [u8]> {
    let end = pos.checked_add(len)?;
    if end > data.len() {
        return None;
    }
    let slice = &data[*pos..end];
    *pos = end;
    Some(slice)
}

// ── String / Value Codec ──────────────────────────────────────────────

fn encode_string(s: &str, buf: &mut Vec<u8>) {
    encode_usize(s.len(), buf);
    buf.extend_from_slice(s.as_bytes());
}

fn decode_string(data: &[u8], pos: &mut usize) -> Option<String> {
    let len = decode_usize(data, pos)?;
    let bytes = take(data, pos, len)?;
    String::from_utf8(bytes.to_vec()).ok()
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Bool(b) => {
            buf.push(VAL_BOOL);
            buf.push(*b as u8);
        }
        Value::Int(v) => {
            buf.push(VAL_INT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            buf.push(VAL_FLOAT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Text(s) => {
            buf.push(VAL_TEXT);
            encode_string(s, buf);
        }
        Value::Bytes(b) => {
            buf.push(VAL_BYTES);
            encode_usize(b.len(), buf);
            buf.extend_from_slice(b);
        }
    }
}

fn decode_value(data: &[u8], pos: &mut usize) -> Option<Value> {
    let tag = *take(data, pos, 1)?.first()?;
    match tag {
        VAL_BOOL => Some(Value::Bool(take(data, pos, 1)?[0] != 0)),
        VAL_INT => {
            let v = i64::from_le_bytes(take(data, pos, 8)?.try_into().ok()?);
            Some(Value::Int(v))
        }
        VAL_FLOAT => {
            let v = f64::from_le_bytes(take(data, pos, 8)?.try_into().ok()?);
            Some(Value::Float(v))
        }
        VAL_TEXT => decode_string(data, pos).map(Value::Text),
        VAL_BYTES => {
            let len = decode_usize(data, pos)?;
            Some(Value::Bytes(take(data, pos, len)?.to_vec()))
        }
        _ => None,
    }
}

// ── Tree Codec ────────────────────────────────────────────────────────

/// Encode one tree into the buffer.
///
/// Format: `[name] [varint: prop_count] [key value]* [varint: child_count] [child]*`,
/// nodes in pre-order. Walks with an explicit stack, so nesting depth is
/// bounded by memory only.
pub fn encode_tree_into(tree: &DataTree, buf: &mut Vec<u8>) {
    let mut stack = vec![std::slice::from_ref(tree).iter()];
    while let Some(siblings) = stack.last_mut() {
        match siblings.next() {
            Some(node) => {
                encode_node_header(node, buf);
                stack.push(node.children().iter());
            }
            None => {
                stack.pop();
            }
        }
    }
}

fn encode_node_header(node: &DataTree, buf: &mut Vec<u8>) {
    encode_string(node.name(), buf);
    encode_usize(node.num_properties(), buf);
    for (key, value) in node.properties() {
        encode_string(key, buf);
        encode_value(value, buf);
    }
    encode_usize(node.num_children(), buf);
}

/// Decode one tree from the buffer. Accepts any depth the encoder writes.
pub fn decode_tree_from(data: &[u8], pos: &mut usize) -> Option<DataTree> {
    // Open nodes with the number of children still to read
    let mut stack = vec![decode_node_header(data, pos)?];
    loop {
        let (_, remaining) = stack.last_mut()?;
        if *remaining > 0 {
            *remaining -= 1;
            let child = decode_node_header(data, pos)?;
            stack.push(child);
            continue;
        }
        let (done, _) = stack.pop()?;
        match stack.last_mut() {
            Some((parent, _)) => parent.append_child(done),
            None => return Some(done),
        }
    }
}

fn decode_node_header(data: &[u8], pos: &mut usize) -> Option<(DataTree, usize)> {
    let name = decode_string(data, pos)?;
    let mut node = DataTree::new(&name);
    let prop_count = decode_usize(data, pos)?;
    for _ in 0..prop_count {
        let key = decode_string(data, pos)?;
        let value = decode_value(data, pos)?;
        node.set_property(&key, value);
    }
    let child_count = decode_usize(data, pos)?;
    Some((node, child_count))
}

/// Encode a standalone tree.
pub fn encode_tree(tree: &DataTree) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_tree_into(tree, &mut buf);
    buf
}

/// Decode a standalone tree; trailing bytes are rejected.
pub fn decode_tree(data: &[u8]) -> Option<DataTree> {
    let mut pos = 0;
    let tree = decode_tree_from(data, &mut pos)?;
    (pos == data.len()).then_some(tree)
}

// ── Pack File Codec ───────────────────────────────────────────────────

/// Encode every payload of one item.
///
/// Format: `[magic] [varint: entry_count] ([16-byte delta uuid] [tree])*`
pub fn encode_pack_entries<'a>(
    entries: impl ExactSizeIterator<Item = (&'a Uuid, &'a DataTree)>,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(PACK_MAGIC);
    encode_usize(entries.len(), &mut buf);
    for (delta, tree) in entries {
        buf.extend_from_slice(delta.as_bytes());
        encode_tree_into(tree, &mut buf);
    }
    buf
}

/// Decode a pack file body.
pub fn decode_pack_entries(data: &[u8]) -> Option<Vec<(Uuid, DataTree)>> {
    let mut pos = 0;
    if take(data, &mut pos, PACK_MAGIC.len())? != PACK_MAGIC {
        return None;
    }
    let count = decode_usize(data, &mut pos)?;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let id = Uuid::from_slice(take(data, &mut pos, 16)?).ok()?;
        let tree = decode_tree_from(data, &mut pos)?;
        entries.push((id, tree));
    }
    (pos == data.len()).then_some(entries)
}

// ── Tests ──────────────────────────────────────────────────────────────
