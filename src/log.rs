//! The telemetry (log) subsystem (`spec.md` §4.5): a cached TOC walk like
//! parameters, plus log blocks — small per-device-unique IDs that bundle a
//! set of variables for periodic multi-variable sampling.
//!
//! Grounded in `crazyflie/log_functions.go`: port 5, channel 0 is TOC
//! management, channel 1 is block control (`Add`/`Start`/`Stop`/`Delete`),
//! channel 2 carries periodic sample packets keyed by block id.

use crate::crtp::{Decoded, Port, Request, ResponseTemplate};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

/// The eight wire datatype codes a log variable can report
/// (`crazyflie/log_functions.go`'s `logTypeToSize`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LogType {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
    Float,
    Fp16,
}

impl LogType {
    pub fn from_wire(code: u8) -> Option<LogType> {
        match code {
            1 => Some(LogType::Uint8),
            2 => Some(LogType::Uint16),
            3 => Some(LogType::Uint32),
            4 => Some(LogType::Int8),
            5 => Some(LogType::Int16),
            6 => Some(LogType::Int32),
            7 => Some(LogType::Float),
            8 => Some(LogType::Fp16),
            _ => None,
        }
    }

    pub fn wire_value(self) -> u8 {
        match self {
            LogType::Uint8 => 1,
            LogType::Uint16 => 2,
            LogType::Uint32 => 3,
            LogType::Int8 => 4,
            LogType::Int16 => 5,
            LogType::Int32 => 6,
            LogType::Float => 7,
            LogType::Fp16 => 8,
        }
    }

    pub fn size_bytes(self) -> usize {
        match self {
            LogType::Uint8 | LogType::Int8 => 1,
            LogType::Uint16 | LogType::Int16 | LogType::Fp16 => 2,
            LogType::Uint32 | LogType::Int32 | LogType::Float => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogValue {
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Float(f32),
    Fp16(f32),
}

impl LogValue {
    pub fn from_bytes(datatype: LogType, bytes: &[u8]) -> Option<LogValue> {
        if bytes.len() < datatype.size_bytes() {
            return None;
        }
        Some(match datatype {
            LogType::Uint8 => LogValue::Uint8(bytes[0]),
            LogType::Uint16 => LogValue::Uint16(u16::from_le_bytes([bytes[0], bytes[1]])),
            LogType::Uint32 => LogValue::Uint32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            LogType::Int8 => LogValue::Int8(bytes[0] as i8),
            LogType::Int16 => LogValue::Int16(i16::from_le_bytes([bytes[0], bytes[1]])),
            LogType::Int32 => LogValue::Int32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            LogType::Float => LogValue::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            LogType::Fp16 => {
                // Half-precision stored as a 16-bit IEEE 754 binary16; widened
                // to f32 by hand since no half-float crate is otherwise needed.
                let half = u16::from_le_bytes([bytes[0], bytes[1]]);
                LogValue::Fp16(fp16_to_f32(half))
            }
        })
    }
}

fn fp16_to_f32(half: u16) -> f32 {
    let sign = (half >> 15) & 0x1;
    let exponent = (half >> 10) & 0x1F;
    let mantissa = half & 0x3FF;

    let value = if exponent == 0 {
        (mantissa as f32) * 2f32.powi(-24)
    } else if exponent == 0x1F {
        if mantissa == 0 {
            f32::INFINITY
        } else {
            f32::NAN
        }
    } else {
        (1.0 + mantissa as f32 / 1024.0) * 2f32.powi(exponent as i32 - 15)
    };

    if sign == 1 {
        -value
    } else {
        value
    }
}

/// One TOC entry: a single loggable variable (`crazyflie/log_functions.go`'s
/// `LogTOCGetItem`).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogTocEntry {
    pub id: u8,
    pub group: String,
    pub name: String,
    pub datatype: LogType,
}

/// Maximum number of variables a single log block may contain
/// (`spec.md` §4.5 / `log_functions.go`'s `LogBlockAdd`).
pub const MAX_BLOCK_VARIABLES: usize = 30;

/// Block ids are assigned from this range and must be unique per device at
/// any one time.
const MAX_BLOCK_ID: u16 = 256;

const CHANNEL_TOC: u8 = 0;
const CHANNEL_CONTROL: u8 = 1;
const CHANNEL_DATA: u8 = 2;

const CMD_GET_INFO: u8 = 0x01;
const CMD_GET_ITEM: u8 = 0x00;
const CMD_CREATE_BLOCK: u8 = 0x00;
const CMD_START_BLOCK: u8 = 0x03;
const CMD_STOP_BLOCK: u8 = 0x04;
const CMD_DELETE_BLOCK: u8 = 0x02;
const CMD_CLEAR_ALL: u8 = 0x05;

struct GetInfoRequest;
impl Request for GetInfoRequest {
    fn port(&self) -> Port {
        Port::Log
    }
    fn channel(&self) -> u8 {
        CHANNEL_TOC
    }
    fn body(&self) -> Vec<u8> {
        vec![CMD_GET_INFO]
    }
}

/// Geometry reported alongside the log TOC: how many entries it has, its
/// CRC (used as the cache key), and the device's per-packet/per-cycle
/// capacity for log data (`spec.md` §4.5).
#[derive(Clone, Copy, Debug)]
pub struct LogInfo {
    pub count: u8,
    pub crc: u32,
    pub max_packet: u8,
    pub max_ops: u8,
}

#[derive(Default)]
struct GetInfoResponse {
    result: Option<LogInfo>,
}
impl ResponseTemplate for GetInfoResponse {
    fn port(&self) -> Port {
        Port::Log
    }
    fn channel(&self) -> u8 {
        CHANNEL_TOC
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 9 || frame[1] != CMD_GET_INFO {
            return Decoded::Mismatch;
        }
        let count = frame[2];
        let crc = u32::from_le_bytes([frame[3], frame[4], frame[5], frame[6]]);
        let max_packet = frame[7];
        let max_ops = frame[8];
        self.result = Some(LogInfo { count, crc, max_packet, max_ops });
        Decoded::Ok
    }
}

struct GetItemRequest(u8);
impl Request for GetItemRequest {
    fn port(&self) -> Port {
        Port::Log
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
    result: Option<LogTocEntry>,
}
impl ResponseTemplate for GetItemResponse {
    fn port(&self) -> Port {
        Port::Log
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
        let datatype = match LogType::from_wire(frame[3]) {
            Some(t) => t,
            None => return Decoded::ContentError(Error::LogItemOrBlockNotFound),
        };
        let text = String::from_utf8_lossy(&frame[4..]);
        let mut parts = text.splitn(2, '\0');
        let group = parts.next().unwrap_or_default().to_string();
        let name = parts.next().unwrap_or_default().trim_end_matches('\0').to_string();
        self.result = Some(LogTocEntry { id, group, name, datatype });
        Decoded::Ok
    }
}

const TOC_ITEM_RETRIES: usize = 5;
const TOC_ITEM_TIMEOUT: Duration = Duration::from_millis(1000);

/// Fetches TOC geometry without walking the individual entries
/// (`log_functions.go`'s `LogTOCGetInfo`).
pub async fn fetch_info(client: &crate::client::Client) -> Result<LogInfo> {
    let info = client
        .send_and_await_response(&GetInfoRequest, GetInfoResponse::default(), TOC_ITEM_TIMEOUT)
        .await?;
    Ok(info.result.expect("Ok verdict guarantees result is set"))
}

/// Fetches the full log TOC, consulting `cache` by CRC first.
pub async fn fetch_toc(client: &crate::client::Client, cache: &crate::cache::Cache) -> Result<Vec<LogTocEntry>> {
    let info = fetch_info(client).await?;
    let count = info.count;
    let crc = info.crc;

    if let Some(cached) = cache.load_log_toc(crc)? {
        return Ok(cached);
    }

    let mut entries = Vec::with_capacity(count as usize);
    for id in 0..count {
        let mut last_err = Error::LogItemOrBlockNotFound;
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

    cache.save_log_toc(crc, &entries)?;
    Ok(entries)
}

struct CreateBlockRequest {
    block_id: u8,
    variables: Vec<(u8, LogType)>,
}
impl Request for CreateBlockRequest {
    fn port(&self) -> Port {
        Port::Log
    }
    fn channel(&self) -> u8 {
        CHANNEL_CONTROL
    }
    fn body(&self) -> Vec<u8> {
        let mut body = vec![CMD_CREATE_BLOCK, self.block_id];
        for (id, datatype) in &self.variables {
            body.push(datatype.wire_value());
            body.push(*id);
        }
        body
    }
}

struct ControlResponse {
    command: u8,
    requested_block_id: u8,
    result: Option<()>,
}
impl ResponseTemplate for ControlResponse {
    fn port(&self) -> Port {
        Port::Log
    }
    fn channel(&self) -> u8 {
        CHANNEL_CONTROL
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 4 || frame[1] != self.command || frame[2] != self.requested_block_id {
            return Decoded::Mismatch;
        }
        let status = frame[3];
        if status != 0 {
            return Decoded::ContentError(Error::LogUnknownError(status));
        }
        self.result = Some(());
        Decoded::Ok
    }
}

/// A block's sampling period, quantized to 10ms units like the firmware
/// expects. Rejecting a period that rounds down to zero is the spec's
/// resolution of the original's silent-zero behavior (`spec.md` open
/// question: log block period floor).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SamplePeriod(u8);

impl SamplePeriod {
    pub fn from_duration(d: Duration) -> Result<SamplePeriod> {
        let quantized = ((d.as_secs_f64() * 100.0) + 0.5).floor() as i64;
        if quantized <= 0 {
            return Err(Error::LogBlockPeriodTooShort);
        }
        if quantized > u8::MAX as i64 {
            return Err(Error::LogBlockPeriodTooShort);
        }
        Ok(SamplePeriod(quantized as u8))
    }

    pub fn wire_value(self) -> u8 {
        self.0
    }
}

/// A server-side handle to one active log block: its id, the ordered
/// variable list used to decode incoming samples, and the client it belongs
/// to (block ids are unique per device, not globally).
pub struct LogBlock {
    pub id: u8,
    pub variables: Vec<(u8, LogType)>,
}

/// Registers a new block with the device. `variables` is capped at
/// [`MAX_BLOCK_VARIABLES`]; `free_id` should come from a per-client id
/// allocator scanning `0..MAX_BLOCK_ID`.
pub async fn create_block(client: &crate::client::Client, free_id: u16, variables: Vec<(u8, LogType)>) -> Result<LogBlock> {
    if variables.len() > MAX_BLOCK_VARIABLES {
        return Err(Error::LogBlockTooLong);
    }
    if free_id >= MAX_BLOCK_ID {
        return Err(Error::LogBlockNoMemory);
    }
    let block_id = free_id as u8;
    let resp = ControlResponse { command: CMD_CREATE_BLOCK, requested_block_id: block_id, result: None };
    client
        .send_and_await_response(&CreateBlockRequest { block_id, variables: variables.clone() }, resp, TOC_ITEM_TIMEOUT)
        .await?;
    Ok(LogBlock { id: block_id, variables })
}

struct StartStopRequest {
    command: u8,
    block_id: u8,
    period: Option<SamplePeriod>,
}
impl Request for StartStopRequest {
    fn port(&self) -> Port {
        Port::Log
    }
    fn channel(&self) -> u8 {
        CHANNEL_CONTROL
    }
    fn body(&self) -> Vec<u8> {
        let mut body = vec![self.command, self.block_id];
        if let Some(p) = self.period {
            body.push(p.wire_value());
        }
        body
    }
}

pub async fn start_block(client: &crate::client::Client, block: &LogBlock, period: SamplePeriod) -> Result<()> {
    let resp = ControlResponse { command: CMD_START_BLOCK, requested_block_id: block.id, result: None };
    client
        .send_and_await_response(&StartStopRequest { command: CMD_START_BLOCK, block_id: block.id, period: Some(period) }, resp, TOC_ITEM_TIMEOUT)
        .await?;
    Ok(())
}

pub async fn stop_block(client: &crate::client::Client, block: &LogBlock) -> Result<()> {
    let resp = ControlResponse { command: CMD_STOP_BLOCK, requested_block_id: block.id, result: None };
    client
        .send_and_await_response(&StartStopRequest { command: CMD_STOP_BLOCK, block_id: block.id, period: None }, resp, TOC_ITEM_TIMEOUT)
        .await?;
    Ok(())
}

pub async fn delete_block(client: &crate::client::Client, block: &LogBlock) -> Result<()> {
    let resp = ControlResponse { command: CMD_DELETE_BLOCK, requested_block_id: block.id, result: None };
    client
        .send_and_await_response(&StartStopRequest { command: CMD_DELETE_BLOCK, block_id: block.id, period: None }, resp, TOC_ITEM_TIMEOUT)
        .await?;
    Ok(())
}

struct ClearAllRequest;
impl Request for ClearAllRequest {
    fn port(&self) -> Port {
        Port::Log
    }
    fn channel(&self) -> u8 {
        CHANNEL_CONTROL
    }
    fn body(&self) -> Vec<u8> {
        vec![CMD_CLEAR_ALL]
    }
}

struct ClearAllResponse {
    result: Option<()>,
}
impl ResponseTemplate for ClearAllResponse {
    fn port(&self) -> Port {
        Port::Log
    }
    fn channel(&self) -> u8 {
        CHANNEL_CONTROL
    }
    fn load_from_bytes(&mut self, frame: &[u8]) -> Decoded {
        if frame.len() < 3 || frame[1] != CMD_CLEAR_ALL {
            return Decoded::Mismatch;
        }
        let status = frame[2];
        if status != 0 {
            return Decoded::ContentError(Error::LogUnknownError(status));
        }
        self.result = Some(());
        Decoded::Ok
    }
}

/// Deletes every block on the device (`[0x05]`, no block id), unlike
/// [`delete_block`] which targets one. Idempotent: a device reply claiming
/// no blocks existed is treated as success rather than an error.
pub async fn clear_all(client: &crate::client::Client) -> Result<()> {
    let resp = ClearAllResponse { result: None };
    match client.send_and_await_response(&ClearAllRequest, resp, TOC_ITEM_TIMEOUT).await {
        Ok(_) => Ok(()),
        Err(Error::LogUnknownError(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Decodes one sample packet on `(Log, channel 2)`: `[block_id, ts0, ts1,
/// ts2, values...]`, walking `block`'s variable list by datatype size
/// (`crazyflie/log_functions.go`'s `handleLogBlock`). Returns `None` (and
/// logs a warning) for an unrecognized block id, matching the original's
/// tolerant behavior rather than treating it as a hard error.
pub fn decode_sample(frame: &[u8], block: &LogBlock) -> Option<(u32, HashMap<u8, LogValue>)> {
    if frame.len() < 5 || frame[1] != block.id {
        return None;
    }
    let timestamp = u32::from_le_bytes([frame[2], frame[3], frame[4], 0]);
    let mut values = HashMap::with_capacity(block.variables.len());
    let mut offset = 5;
    for (var_id, datatype) in &block.variables {
        let size = datatype.size_bytes();
        let bytes = frame.get(offset..offset + size)?;
        let value = LogValue::from_bytes(*datatype, bytes)?;
        values.insert(*var_id, value);
        offset += size;
    }
    Some((timestamp, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crtp::header_byte;

    #[test]
    fn sample_period_quantizes_and_rejects_too_short() {
        assert_eq!(SamplePeriod::from_duration(Duration::from_millis(10)).unwrap().wire_value(), 1);
        assert_eq!(SamplePeriod::from_duration(Duration::from_millis(1000)).unwrap().wire_value(), 100);
        assert!(SamplePeriod::from_duration(Duration::from_millis(4)).is_err());
    }

    #[test]
    fn decode_sample_walks_variables_by_size() {
        let block = LogBlock { id: 2, variables: vec![(1, LogType::Float), (2, LogType::Uint8)] };
        let mut frame = vec![header_byte(Port::Log, CHANNEL_DATA), 2, 0, 0, 0];
        frame.extend(1.5f32.to_le_bytes());
        frame.push(200);
        let (ts, values) = decode_sample(&frame, &block).unwrap();
        assert_eq!(ts, 0);
        assert_eq!(values.get(&1), Some(&LogValue::Float(1.5)));
        assert_eq!(values.get(&2), Some(&LogValue::Uint8(200)));
    }

    #[test]
    fn decode_sample_rejects_mismatched_block_id() {
        let block = LogBlock { id: 2, variables: vec![] };
        let frame = vec![header_byte(Port::Log, CHANNEL_DATA), 9, 0, 0, 0];
        assert!(decode_sample(&frame, &block).is_none());
    }

    #[test]
    fn fp16_decodes_one_point_five() {
        // 1.5 in binary16: sign=0 exponent=15(0b01111) mantissa=0x200.
        let half: u16 = 0b0_01111_1000000000;
        assert_eq!(fp16_to_f32(half), 1.5);
    }
}
