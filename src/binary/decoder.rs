//! Binary decoder for the node tree format.

use super::node::{Attrs, Node, NodeContent};
use super::token::{
    get_token, BINARY_20, BINARY_32, BINARY_8, HEX_8, JID_PAIR, LIST_16, LIST_8, LIST_EMPTY,
    NIBBLE_8,
};

/// Error type for decoding
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError(pub String);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decode error: {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

/// Streaming reader over the binary form of a node tree.
pub struct Decoder<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    /// Decode the data into a node
    pub fn decode(data: &[u8]) -> Result<Node, DecodeError> {
        let mut decoder = Decoder::new(data);
        let node = decoder.read_node()?;

        if decoder.index != decoder.data.len() {
            return Err(DecodeError(format!(
                "{} leftover bytes after decoding",
                decoder.data.len() - decoder.index
            )));
        }

        Ok(node)
    }

    fn read_byte(&mut self) -> Result<u8, DecodeError> {
        if self.index >= self.data.len() {
            return Err(DecodeError("unexpected end of data".to_string()));
        }
        let b = self.data[self.index];
        self.index += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, DecodeError> {
        if self.index + n > self.data.len() {
            return Err(DecodeError("unexpected end of data".to_string()));
        }
        let bytes = self.data[self.index..self.index + n].to_vec();
        self.index += n;
        Ok(bytes)
    }

    fn read_int(&mut self, bytes: usize) -> Result<usize, DecodeError> {
        let mut result = 0usize;
        for _ in 0..bytes {
            result = (result << 8) | (self.read_byte()? as usize);
        }
        Ok(result)
    }

    fn read_blob_len(&mut self, marker: u8) -> Result<usize, DecodeError> {
        match marker {
            BINARY_8 => Ok(self.read_byte()? as usize),
            BINARY_20 => {
                let len = self.read_int(3)?;
                Ok(len & 0x000F_FFFF)
            }
            BINARY_32 => self.read_int(4),
            _ => Err(DecodeError(format!("invalid blob marker: 0x{marker:02x}"))),
        }
    }

    fn read_string(&mut self, marker: u8) -> Result<String, DecodeError> {
        match marker {
            BINARY_8 | BINARY_20 | BINARY_32 => {
                let len = self.read_blob_len(marker)?;
                let bytes = self.read_bytes(len)?;
                String::from_utf8(bytes).map_err(|e| DecodeError(format!("invalid utf8: {e}")))
            }
            JID_PAIR => {
                let user_marker = self.read_byte()?;
                let user = self.read_string(user_marker)?;
                let server_marker = self.read_byte()?;
                let server = self.read_string(server_marker)?;
                Ok(format!("{user}@{server}"))
            }
            NIBBLE_8 | HEX_8 => self.read_packed(marker),
            _ => get_token(marker)
                .map(str::to_string)
                .ok_or_else(|| DecodeError(format!("unknown token: {marker}"))),
        }
    }

    fn read_packed(&mut self, marker: u8) -> Result<String, DecodeError> {
        let start = self.read_byte()?;
        let count = (start & 0x7F) as usize;
        let mut out = String::with_capacity(count * 2);
        for _ in 0..count {
            let byte = self.read_byte()?;
            out.push(unpack_half(marker, byte >> 4)?);
            out.push(unpack_half(marker, byte & 0x0F)?);
        }
        if start & 0x80 != 0 {
            out.pop();
        }
        Ok(out)
    }

    fn read_list_size(&mut self, marker: u8) -> Result<usize, DecodeError> {
        match marker {
            LIST_EMPTY => Ok(0),
            LIST_8 => Ok(self.read_byte()? as usize),
            LIST_16 => self.read_int(2),
            _ => Err(DecodeError(format!(
                "expected list marker, got 0x{marker:02x}"
            ))),
        }
    }

    fn read_node(&mut self) -> Result<Node, DecodeError> {
        let marker = self.read_byte()?;
        let size = self.read_list_size(marker)?;
        if size == 0 {
            return Err(DecodeError("invalid empty list for node".to_string()));
        }

        let tag_marker = self.read_byte()?;
        let tag = self.read_string(tag_marker)?;

        let mut attrs = Attrs::new();
        for _ in 0..(size - 1) / 2 {
            let key_marker = self.read_byte()?;
            let key = self.read_string(key_marker)?;
            let value_marker = self.read_byte()?;
            let value = self.read_string(value_marker)?;
            attrs.insert(key, value);
        }

        // An even list size means one trailing content slot.
        let content = if (size - 1) % 2 == 1 {
            let content_marker = self.read_byte()?;
            match content_marker {
                LIST_EMPTY | LIST_8 | LIST_16 => {
                    let len = self.read_list_size(content_marker)?;
                    let mut children = Vec::with_capacity(len);
                    for _ in 0..len {
                        children.push(self.read_node()?);
                    }
                    NodeContent::Children(children)
                }
                BINARY_8 | BINARY_20 | BINARY_32 => {
                    let len = self.read_blob_len(content_marker)?;
                    let bytes = self.read_bytes(len)?;
                    match String::from_utf8(bytes) {
                        Ok(s) => NodeContent::String(s),
                        Err(e) => NodeContent::Bytes(e.into_bytes()),
                    }
                }
                _ => NodeContent::String(self.read_string(content_marker)?),
            }
        } else {
            NodeContent::None
        };

        Ok(Node { tag, attrs, content })
    }
}

fn unpack_half(marker: u8, nibble: u8) -> Result<char, DecodeError> {
    match (marker, nibble) {
        (NIBBLE_8, 0..=9) => Ok((b'0' + nibble) as char),
        (NIBBLE_8, 10) => Ok('-'),
        (NIBBLE_8, 11) => Ok('.'),
        (NIBBLE_8, 15) => Ok('\u{0}'),
        (HEX_8, 0..=15) => Ok(char::from(b"0123456789ABCDEF"[nibble as usize])),
        _ => Err(DecodeError(format!(
            "invalid packed nibble {nibble} for marker 0x{marker:02x}"
        ))),
    }
}

/// Decode binary data into a node
pub fn decode(data: &[u8]) -> Result<Node, DecodeError> {
    Decoder::decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::encoder::encode;
    use serde_json::json;

    #[test]
    fn test_roundtrip_action() {
        let node = Node::from_json(&json!([
            "action",
            {"epoch": "3", "type": "set"},
            [["chat", {"jid": "15551234567@s.whatsapp.net", "type": "archive"}, null]]
        ]))
        .unwrap();

        let decoded = decode(&encode(&node)).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_roundtrip_empty_children() {
        let node = Node::from_json(&json!(["action", {}, []])).unwrap();
        let decoded = decode(&encode(&node)).unwrap();
        assert_eq!(decoded.tag, "action");
        assert_eq!(decoded.children(), Some(&[][..]));
    }

    #[test]
    fn test_roundtrip_string_content() {
        let node = Node::from_json(&json!(["body", null, "hello there"])).unwrap();
        let decoded = decode(&encode(&node)).unwrap();
        assert_eq!(decoded.content, NodeContent::String("hello there".into()));
    }

    #[test]
    fn test_roundtrip_untokenized_strings() {
        let node = Node::from_json(&json!([
            "action",
            {"checksum": "xK9/qb=="},
            null
        ]))
        .unwrap();
        let decoded = decode(&encode(&node)).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_leftover_bytes_rejected() {
        let node = Node::from_json(&json!(["action", {}, []])).unwrap();
        let mut data = encode(&node);
        data.push(0xAB);
        assert!(decode(&data).is_err());
    }

    #[test]
    fn test_truncated_input_rejected() {
        let node = Node::from_json(&json!(["action", {"type": "set"}, null])).unwrap();
        let data = encode(&node);
        assert!(decode(&data[..data.len() - 1]).is_err());
    }

    #[test]
    fn test_packed_nibble_roundtrip() {
        let node = Node::from_json(&json!(["chat", {"t": "1610000000"}, null])).unwrap();
        let decoded = decode(&encode(&node)).unwrap();
        assert_eq!(decoded.get_attr("t"), Some("1610000000"));
    }
}
