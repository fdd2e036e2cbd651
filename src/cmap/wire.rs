//! OP_MSG framing: the header/flags/sections layout every command request and reply uses on the
//! wire. Legacy opcodes (OP_QUERY, OP_REPLY) are not supported — every server this crate talks to
//! is expected to understand OP_MSG, which has been the only opcode since MongoDB 3.6.

use std::sync::atomic::{AtomicI32, Ordering};

use bitflags::bitflags;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::bson::Document;
use crate::error::{Error, ErrorKind, Result};

const OP_MSG: i32 = 2013;
const HEADER_LENGTH: i32 = 16;

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(0);

pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

bitflags! {
    pub struct MessageFlags: u32 {
        const CHECKSUM_PRESENT = 0b0000_0000_0000_0000_0000_0000_0000_0001;
        const MORE_TO_COME     = 0b0000_0000_0000_0000_0000_0000_0000_0010;
        const EXHAUST_ALLOWED  = 0b0000_0000_0000_0001_0000_0000_0000_0000;
    }
}

struct Header {
    length: i32,
    request_id: i32,
    response_to: i32,
    op_code: i32,
}

impl Header {
    async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.length.to_le_bytes()).await?;
        w.write_all(&self.request_id.to_le_bytes()).await?;
        w.write_all(&self.response_to.to_le_bytes()).await?;
        w.write_all(&self.op_code.to_le_bytes()).await?;
        Ok(())
    }

    async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let length = r.read_i32_le().await?;
        let request_id = r.read_i32_le().await?;
        let response_to = r.read_i32_le().await?;
        let op_code = r.read_i32_le().await?;
        if op_code != OP_MSG {
            return Err(Error::new(ErrorKind::InvalidResponse {
                message: format!("unsupported wire protocol opcode: {op_code}"),
            }));
        }
        Ok(Self {
            length,
            request_id,
            response_to,
            op_code,
        })
    }
}

/// A single OP_MSG message. Only payload type 0 (a lone document section) is produced or
/// expected: this crate never issues the bulk-write commands that need payload type 1's document
/// sequences.
#[derive(Debug)]
pub struct Message {
    pub response_to: i32,
    pub flags: MessageFlags,
    pub documents: Vec<Document>,
}

impl Message {
    pub fn with_command(body: Document) -> Self {
        Self {
            response_to: 0,
            flags: MessageFlags::empty(),
            documents: vec![body],
        }
    }

    pub fn single_document_response(self) -> Result<Document> {
        self.documents.into_iter().next().ok_or_else(|| {
            Error::new(ErrorKind::InvalidResponse {
                message: "no response received from server".into(),
            })
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let mut body = Vec::new();
        for doc in &self.documents {
            body.push(0u8);
            body.extend(doc.to_bytes().map_err(Error::from)?);
        }

        let total_length = HEADER_LENGTH + 4 + body.len() as i32;
        let header = Header {
            length: total_length,
            request_id: next_request_id(),
            response_to: self.response_to,
            op_code: OP_MSG,
        };
        header.write_to(writer).await?;
        writer.write_all(&self.flags.bits().to_le_bytes()).await?;
        writer.write_all(&body).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let header = Header::read_from(reader).await?;
        let mut remaining = header.length - HEADER_LENGTH - 4;
        let flags = MessageFlags::from_bits_truncate(reader.read_u32_le().await?);

        let mut documents = Vec::new();
        while remaining > 0 {
            let payload_type = reader.read_u8().await?;
            remaining -= 1;
            match payload_type {
                0 => {
                    let (doc, consumed) = read_document(reader).await?;
                    remaining -= consumed as i32;
                    documents.push(doc);
                }
                other => {
                    return Err(Error::new(ErrorKind::InvalidResponse {
                        message: format!("unsupported OP_MSG section payload type: {other}"),
                    }));
                }
            }
        }

        if flags.contains(MessageFlags::CHECKSUM_PRESENT) {
            reader.read_u32_le().await?;
        }

        Ok(Self {
            response_to: header.response_to,
            flags,
            documents,
        })
    }
}

async fn read_document<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Document, usize)> {
    let declared_len = reader.read_i32_le().await?;
    if declared_len < 5 {
        return Err(Error::new(ErrorKind::InvalidResponse {
            message: format!("invalid BSON document length: {declared_len}"),
        }));
    }
    let mut buf = vec![0u8; declared_len as usize];
    buf[..4].copy_from_slice(&declared_len.to_le_bytes());
    reader.read_exact(&mut buf[4..]).await?;
    let doc = Document::from_bytes(&buf).map_err(Error::from)?;
    Ok((doc, declared_len as usize))
}
