//! Minimal MongoDB wire protocol codec (`OP_MSG` with a single body section).
//!
//! Just enough of the protocol to send one command and read its reply.

use std::io::{self, Read};

use bson::Document;
use thiserror::Error;

/// `OP_MSG` opcode.
pub const OP_MSG: i32 = 2013;

const HEADER_LEN: usize = 16;

/// Largest frame we accept (mongod's own limit).
const MAX_MESSAGE_LEN: usize = 48 * 1024 * 1024;

/// `flagBits` bit marking a trailing CRC-32C checksum.
const CHECKSUM_PRESENT: u32 = 1;

/// Errors from encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// The socket failed or timed out.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("BSON encoding failed: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("BSON decoding failed: {0}")]
    Decode(#[from] bson::de::Error),

    /// The peer answered with something that is not an `OP_MSG` reply.
    #[error("Malformed reply: {0}")]
    Malformed(String),
}

/// A decoded `OP_MSG`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub request_id: i32,
    pub response_to: i32,
    pub body: Document,
}

/// Encode `body` as an `OP_MSG` frame.
pub fn encode_op_msg(request_id: i32, response_to: i32, body: &Document) -> Result<Vec<u8>, WireError> {
    let mut document = Vec::new();
    body.to_writer(&mut document)?;

    let len = HEADER_LEN + 4 + 1 + document.len();
    let mut frame = Vec::with_capacity(len);
    frame.extend_from_slice(&(len as i32).to_le_bytes());
    frame.extend_from_slice(&request_id.to_le_bytes());
    frame.extend_from_slice(&response_to.to_le_bytes());
    frame.extend_from_slice(&OP_MSG.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.push(0); // section kind 0: body
    frame.extend_from_slice(&document);
    Ok(frame)
}

/// Read one `OP_MSG` frame from `reader`.
pub fn read_op_msg<R: Read>(reader: &mut R) -> Result<Message, WireError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let len = le_i32(&header[0..4]);
    let request_id = le_i32(&header[4..8]);
    let response_to = le_i32(&header[8..12]);
    let opcode = le_i32(&header[12..16]);

    let len = usize::try_from(len)
        .ok()
        .filter(|len| (HEADER_LEN + 5..=MAX_MESSAGE_LEN).contains(len))
        .ok_or_else(|| WireError::Malformed(format!("invalid message length {}", len)))?;

    if opcode != OP_MSG {
        return Err(WireError::Malformed(format!("unexpected opcode {}", opcode)));
    }

    let mut payload = vec![0u8; len - HEADER_LEN];
    reader.read_exact(&mut payload)?;

    let flags = le_u32(&payload[0..4]);
    let mut sections = &payload[4..];
    if flags & CHECKSUM_PRESENT != 0 {
        if sections.len() < 4 {
            return Err(WireError::Malformed("truncated checksum".to_string()));
        }
        sections = &sections[..sections.len() - 4];
    }

    let body = body_section(sections)?;
    Ok(Message {
        request_id,
        response_to,
        body,
    })
}

/// Find and decode the kind-0 section, skipping document sequences.
fn body_section(mut sections: &[u8]) -> Result<Document, WireError> {
    while let Some((&kind, rest)) = sections.split_first() {
        if rest.len() < 4 {
            break;
        }
        let size = usize::try_from(le_i32(&rest[0..4]))
            .ok()
            .filter(|size| *size >= 4 && *size <= rest.len())
            .ok_or_else(|| WireError::Malformed("section overruns message".to_string()))?;

        match kind {
            0 => return Ok(Document::from_reader(&rest[..size])?),
            1 => sections = &rest[size..],
            other => {
                return Err(WireError::Malformed(format!("unknown section kind {}", other)));
            }
        }
    }
    Err(WireError::Malformed("no body section".to_string()))
}

fn le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
