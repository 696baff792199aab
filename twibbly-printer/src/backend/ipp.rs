//! Minimal IPP/1.1 message codec (RFC 8010)
//!
//! Only what the CUPS backend needs: building single-group requests and
//! reading attribute values back out of a response.

use crate::error::{PrintError, PrintResult};

pub const PRINT_JOB: u16 = 0x0002;
pub const CUPS_GET_DEFAULT: u16 = 0x4001;
pub const CUPS_GET_PRINTERS: u16 = 0x4002;

pub const STATUS_NOT_FOUND: u16 = 0x0406;

// Delimiter tags
const OPERATION_ATTRIBUTES: u8 = 0x01;
const END_OF_ATTRIBUTES: u8 = 0x03;

// Value tags
pub const INTEGER: u8 = 0x21;
pub const NAME: u8 = 0x42;
pub const KEYWORD: u8 = 0x44;
pub const URI: u8 = 0x45;
pub const CHARSET: u8 = 0x47;
pub const NATURAL_LANGUAGE: u8 = 0x48;
pub const MIME_MEDIA_TYPE: u8 = 0x49;

/// IPP request builder
pub struct IppRequest {
    buf: Vec<u8>,
}

impl IppRequest {
    /// Start a request with the mandatory charset and language attributes
    pub fn new(operation: u16, request_id: u32) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&[0x01, 0x01]);
        buf.extend_from_slice(&operation.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());
        buf.push(OPERATION_ATTRIBUTES);

        let mut req = Self { buf };
        req.attr(CHARSET, "attributes-charset", "utf-8");
        req.attr(NATURAL_LANGUAGE, "attributes-natural-language", "en");
        req
    }

    pub fn attr(&mut self, tag: u8, name: &str, value: &str) -> &mut Self {
        self.buf.push(tag);
        self.put_str(name);
        self.put_str(value);
        self
    }

    fn put_str(&mut self, s: &str) {
        // IPP strings are length-prefixed with a u16
        let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
        self.buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(bytes);
    }

    /// Close the attribute groups and append document data
    pub fn finish(mut self, document: &[u8]) -> Vec<u8> {
        self.buf.push(END_OF_ATTRIBUTES);
        self.buf.extend_from_slice(document);
        self.buf
    }
}

/// One attribute value as found on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct IppValue {
    pub tag: u8,
    pub name: String,
    pub value: Vec<u8>,
}

impl IppValue {
    pub fn as_text(&self) -> Option<String> {
        String::from_utf8(self.value.clone()).ok()
    }

    pub fn as_integer(&self) -> Option<i32> {
        if self.tag != INTEGER {
            return None;
        }
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }
}

/// Decoded IPP response
#[derive(Debug, Clone)]
pub struct IppResponse {
    pub status: u16,
    pub values: Vec<IppValue>,
}

impl IppResponse {
    pub fn parse(data: &[u8]) -> PrintResult<Self> {
        let mut cursor = Reader { data, pos: 0 };
        cursor.take(2)?; // version
        let status = cursor.u16()?;
        cursor.take(4)?; // request-id

        let mut values = Vec::new();
        let mut last_name = String::new();

        loop {
            let tag = cursor.u8()?;
            if tag == END_OF_ATTRIBUTES {
                break;
            }
            if tag < 0x10 {
                // Start of the next attribute group
                continue;
            }

            let name_len = cursor.u16()? as usize;
            let name = String::from_utf8_lossy(cursor.take(name_len)?).into_owned();
            let value_len = cursor.u16()? as usize;
            let value = cursor.take(value_len)?.to_vec();

            // Empty name marks an additional value of the previous attribute
            if !name.is_empty() {
                last_name = name;
            }
            values.push(IppValue {
                tag,
                name: last_name.clone(),
                value,
            });
        }

        Ok(Self { status, values })
    }

    pub fn is_success(&self) -> bool {
        self.status < 0x0100
    }

    pub fn texts(&self, name: &str) -> Vec<String> {
        self.values
            .iter()
            .filter(|v| v.name == name)
            .filter_map(IppValue::as_text)
            .collect()
    }

    pub fn integer(&self, name: &str) -> Option<i32> {
        self.values
            .iter()
            .find(|v| v.name == name)
            .and_then(IppValue::as_integer)
    }

    pub fn status_message(&self) -> String {
        self.texts("status-message")
            .into_iter()
            .next()
            .unwrap_or_else(|| format!("status 0x{:04x}", self.status))
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> PrintResult<&'a [u8]> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(PrintError::Connection(format!(
                "Truncated IPP response at byte {}",
                self.pos
            )));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> PrintResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> PrintResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}
