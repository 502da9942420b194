//! The parameter subsystem (`spec.md` §4.5): a cached table-of-contents walk
//! followed by typed read/write of individual parameters.
//!
//! Grounded in `crazyflie/param_functions.go` and `param_packets.go`: port 2,
//! channel 0 carries TOC management (`GetInfo`/`ReadMeta`), channel 1 reads a
//! value, channel 2 writes one. A parameter's name arrives as a single
//! null-separated `"group\0name"` string.

use crate::crtp::{header_byte, Decoded, Port, Request, ResponseTemplate};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

/// The six wire datatype codes a parameter's metadata can report
/// (`crazyflie/param_packets.go`'s `paramTypeToSize`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ParamType {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
    Float,
}

impl ParamType {
    pub fn from_wire(code: u8) -> Option<ParamType> {
        match code & 0x0F {
            0x08 => Some(ParamType::Uint8),
            0x09 => Some(ParamType::Uint16),
            0x0A => Some(ParamType::Uint32),
            0x00 => Some(ParamType::Int8),
            0x01 => Some(ParamType::Int16),
            0x02 => Some(ParamType::Int32),
            0x06 => Some(ParamType::Float),
            _ => None,
        }
    }

    pub fn wire_value(self) -> u8 {
        match self {
            ParamType::Uint8 => 0x08,
            ParamType::Uint16 => 0x09,
            ParamType::Uint32 => 0x0A,
            ParamType::Int8 => 0x00,
            ParamType::Int16 => 0x01,
            ParamType::Int32 => 0x02,
            ParamType::Float => 0x06,
        }
    }

    pub fn size_bytes(self) -> usize {
        match self {
            ParamType::Uint8 | ParamType::Int8 => 1,
            ParamType::Uint16 | ParamType::Int16 => 2,
            ParamType::Uint32 | ParamType::Int32 | ParamType::Float => 4,
        }
    }
}

/// A decoded parameter value, tagged with the type it was read as.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamValue {
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Float(f32),
}

impl ParamValue {
    pub fn datatype(self) -> ParamType {
        match self {
            ParamValue::Uint8(_) => ParamType::Uint8,
            ParamValue::Uint16(_) => ParamType::Uint16,
            ParamValue::Uint32(_) => ParamType::Uint32,
            ParamValue::Int8(_) => ParamType::Int8,
            ParamValue::Int16(_) => ParamType::Int16,
            ParamValue::Int32(_) => ParamType::Int32,
            ParamValue::Float(_) => ParamType::Float,
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            ParamValue::Uint8(v) => vec![v],
            ParamValue::Uint16(v) => v.to_le_bytes().to_vec(),
            ParamValue::Uint32(v) => v.to_le_bytes().to_vec(),
            ParamValue::Int8(v) => vec![v as u8],
            ParamValue::Int16(v) => v.to_le_bytes().to_vec(),
            ParamValue::Int32(v) => v.to_le_bytes().to_vec(),
            ParamValue::Float(v) => v.to_le_bytes().to_vec(),
        }
    }

    pub fn from_bytes(datatype: ParamType, bytes: &[u8]) -> Option<ParamValue> {
        if bytes.len() < datatype.size_bytes() {
            return None;
        }
        Some(match datatype {
            ParamType::Uint8 => ParamValue::Uint8(bytes[0]),
            ParamType::Uint16 => ParamValue::Uint16(u16::from_le_bytes([bytes[0], bytes[1]])),
            ParamType::Uint32 => ParamValue::Uint32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ParamType::Int8 => ParamValue::Int8(bytes[0] as i8),
            ParamType::Int16 => ParamValue::Int16(i16::from_le_bytes([bytes[0], bytes[1]])),
            ParamType::Int32 => ParamValue::Int32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            ParamType::Float => ParamValue::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        })
    }

    /// Widens any parameter value to `f64`, the convenience path
    /// `ParamWriteFromFloat64` generalizes in the original.
    pub fn as_f64(self) -> f64 {
        match self {
            ParamValue::Uint8(v) => v as f64,
            ParamValue::Uint16(v) => v as f64,
            ParamValue::Uint32(v) => v as f64,
            ParamValue::Int8(v) => v as f64,
            ParamValue::Int16(v) => v as f64,
            ParamValue::Int32(v) => v as f64,
            ParamValue::Float(v) => v as f64,
        }
    }

    pub fn from_f64(datatype: ParamType, v: f64) -> ParamValue {
        match datatype {
            ParamType::Uint8 => ParamValue::Uint8(v as u8),
            ParamType::Uint16 => ParamValue::Uint16(v as u16),
            ParamType::Uint32 => ParamValue::Uint32(v as u32),
            ParamType::Int8 => ParamValue::Int8(v as i8),
            ParamType::Int16 => ParamValue::Int16(v as i16),
            ParamType::Int32 => ParamValue::Int32(v as i32),
            ParamType::Float => ParamValue::Float(v as f32),
        }
    }
}

/// One TOC entry, as reported by `ReadMeta` (`param_packets.go`'s
/// `ParamTOCGetItem` response).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParamTocEntry {
    pub id: u8,
    pub group: String,
    pub name: String,
    pub datatype: ParamType,
    pub read_only: bool,
}

const CHANNEL_TOC: u8 = 0;
const CHANNEL_READ: u8 = 1;
const CHANNEL_WRITE: u8 = 2;

const CMD_GET_INFO: u8 = 0x01;
const CMD_GET_ITEM: u8 = 0x00;

struct GetInfoRequest;
impl Request for GetInfoRequest {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        CHANNEL_TOC
    }
    fn body(&self) -> Vec<u8> {
        vec![CMD_GET_INFO]
    }
}

#[derive(Default)]
struct GetInfoResponse {
    result: Option<(u8, u32)>,
}
impl ResponseTemplate for GetInfoResponse {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        CHANNEL_TOC
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 7 || frame[1] != CMD_GET_INFO {
            return Decoded::Mismatch;
        }
        let count = frame[2];
        let crc = u32::from_le_bytes([frame[3], frame[4], frame[5], frame[6]]);
        self.result = Some((count, crc));
        Decoded::Ok
    }
}

struct GetItemRequest(u8);
impl Request for GetItemRequest {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        CHANNEL_TOC
    }
    fn body(&self) -> Vec<u8> {
        vec![CMD_GET_ITEM, self.0]
    }
}

struct GetItemResponse {
    requested_id: u8,
    result: Option<ParamTocEntry>,
}
impl ResponseTemplate for GetItemResponse {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        CHANNEL_TOC
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 4 || frame[1] != CMD_GET_ITEM {
            return Decoded::Mismatch;
        }
        let id = frame[2];
        if id != self.requested_id {
            return Decoded::Mismatch;
        }
        let flags = frame[3];
        let datatype = match ParamType::from_wire(flags) {
            Some(t) => t,
            None => return Decoded::ContentError(Error::ParamNotFound(format!("id {}", id))),
        };
        let read_only = flags & 0x40 != 0;
        let text = String::from_utf8_lossy(&frame[4..]);
        let mut parts = text.splitn(2, '\0');
        let group = parts.next().unwrap_or_default().to_string();
        let name = parts.next().unwrap_or_default().trim_end_matches('\0').to_string();
        self.result = Some(ParamTocEntry { id, group, name, datatype, read_only });
        Decoded::Ok
    }
}

struct ReadRequest(u8);
impl Request for ReadRequest {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        CHANNEL_READ
    }
    fn body(&self) -> Vec<u8> {
        vec![self.0]
    }
}

struct ReadResponse {
    requested_id: u8,
    datatype: ParamType,
    result: Option<ParamValue>,
}
impl ResponseTemplate for ReadResponse {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        CHANNEL_READ
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 2 {
            return Decoded::Mismatch;
        }
        let id = frame[1];
        if id != self.requested_id {
            return Decoded::Mismatch;
        }
        match ParamValue::from_bytes(self.datatype, &frame[2..]) {
            Some(v) => {
                self.result = Some(v);
                Decoded::Ok
            }
            None => Decoded::ContentError(Error::ParamNotFound(format!("id {}", id))),
        }
    }
}

struct WriteRequest {
    id: u8,
    value: ParamValue,
}
impl Request for WriteRequest {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        CHANNEL_WRITE
    }
    fn body(&self) -> Vec<u8> {
        let mut body = vec![self.id];
        body.extend(self.value.to_bytes());
        body
    }
}

struct WriteResponse {
    requested_id: u8,
    result: Option<()>,
}
impl ResponseTemplate for WriteResponse {
    fn port(&self) -> Port {
        Port::Param
    }
    fn channel(&self) -> u8 {
        CHANNEL_WRITE
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 2 {
            return Decoded::Mismatch;
        }
        let id = frame[1];
        if id != self.requested_id {
            return Decoded::Mismatch;
        }
        self.result = Some(());
        Decoded::Ok
    }
}

const TOC_ITEM_RETRIES: usize = 5;
const TOC_ITEM_TIMEOUT: Duration = Duration::from_millis(1000);

/// Fetches the full parameter TOC, consulting `cache` by CRC first
/// (`spec.md` §4.5, mirroring `ParamTOCGetList`'s cache-or-walk behavior).
pub async fn fetch_toc(client: &crate::client::Client, cache: &crate::cache::Cache) -> Result<Vec<ParamTocEntry>> {
    let info = client
        .send_and_await_response(&GetInfoRequest, GetInfoResponse::default(), TOC_ITEM_TIMEOUT)
        .await?;
    let (count, crc) = info.result.expect("Ok verdict guarantees result is set");

    if let Some(cached) = cache.load_param_toc(crc)? {
        return Ok(cached);
    }

    let mut entries = Vec::with_capacity(count as usize);
    for id in 0..count {
        let mut last_err = Error::ParamNotFound(format!("id {}", id));
        let mut found = false;
        for _ in 0..TOC_ITEM_RETRIES {
            let resp = GetItemResponse { requested_id: id, result: None };
            match client.send_and_await_response(&GetItemRequest(id), resp, TOC_ITEM_TIMEOUT).await {
                Ok(resp) => {
                    entries.push(resp.result.expect("Ok verdict guarantees result is set"));
                    found = true;
                    break;
                }
                Err(e) => last_err = e,
            }
        }
        if !found {
            return Err(last_err);
        }
    }

    cache.save_param_toc(crc, &entries)?;
    Ok(entries)
}

/// Reads the current value of the parameter named `"group.name"`.
pub async fn read(client: &crate::client::Client, toc: &[ParamTocEntry], group: &str, name: &str) -> Result<ParamValue> {
    let entry = find(toc, group, name)?;
    let resp = ReadResponse { requested_id: entry.id, datatype: entry.datatype, result: None };
    let resp = client.send_and_await_response(&ReadRequest(entry.id), resp, TOC_ITEM_TIMEOUT).await?;
    Ok(resp.result.expect("Ok verdict guarantees result is set"))
}

/// Writes `value` to the parameter named `"group.name"`. The caller supplies
/// a value already tagged with the entry's datatype — mismatches are the
/// caller's bug, not a wire-level condition, so this doesn't re-validate.
pub async fn write(client: &crate::client::Client, toc: &[ParamTocEntry], group: &str, name: &str, value: ParamValue) -> Result<()> {
    let entry = find(toc, group, name)?;
    let resp = WriteResponse { requested_id: entry.id, result: None };
    client.send_and_await_response(&WriteRequest { id: entry.id, value }, resp, TOC_ITEM_TIMEOUT).await?;
    Ok(())
}

fn find<'a>(toc: &'a [ParamTocEntry], group: &str, name: &str) -> Result<&'a ParamTocEntry> {
    toc.iter()
        .find(|e| e.group == group && e.name == name)
        .ok_or_else(|| Error::ParamNotFound(format!("{}.{}", group, name)))
}

/// Builds a `group -> name -> id` index for quick lookup, as the original's
/// `crazyflie.paramTOC` map is used for.
pub fn index_by_name(toc: &[ParamTocEntry]) -> HashMap<(String, String), u8> {
    toc.iter().map(|e| ((e.group.clone(), e.name.clone()), e.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_type_round_trips_through_wire_value() {
        for t in [ParamType::Uint8, ParamType::Uint16, ParamType::Uint32, ParamType::Int8, ParamType::Int16, ParamType::Int32, ParamType::Float] {
            assert_eq!(ParamType::from_wire(t.wire_value()), Some(t));
        }
    }

    #[test]
    fn get_item_response_splits_group_and_name() {
        let mut resp = GetItemResponse { requested_id: 3, result: None };
        let header = header_byte(Port::Param, CHANNEL_TOC);
        let mut frame = vec![header, CMD_GET_ITEM, 3, ParamType::Float.wire_value()];
        frame.extend(b"pid_attitude\0pitch_kp\0");
        assert!(matches!(resp.load_from_bytes(&frame), Decoded::Ok));
        let entry = resp.result.unwrap();
        assert_eq!(entry.group, "pid_attitude");
        assert_eq!(entry.name, "pitch_kp");
        assert_eq!(entry.datatype, ParamType::Float);
        assert!(!entry.read_only);
    }

    #[test]
    fn read_only_bit_is_decoded() {
        let mut resp = GetItemResponse { requested_id: 1, result: None };
        let header = header_byte(Port::Param, CHANNEL_TOC);
        let flags = ParamType::Uint8.wire_value() | 0x40;
        let mut frame = vec![header, CMD_GET_ITEM, 1, flags];
        frame.extend(b"sys\0id\0");
        resp.load_from_bytes(&frame);
        assert!(resp.result.unwrap().read_only);
    }

    #[test]
    fn read_response_decodes_value_by_requested_datatype() {
        let mut resp = ReadResponse { requested_id: 9, datatype: ParamType::Int16, result: None };
        let header = header_byte(Port::Param, CHANNEL_READ);
        let value = (-42i16).to_le_bytes();
        let frame = vec![header, 9, value[0], value[1]];
        assert!(matches!(resp.load_from_bytes(&frame), Decoded::Ok));
        assert_eq!(resp.result, Some(ParamValue::Int16(-42)));
    }
}
