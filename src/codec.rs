//! Host link packets.
//!
//! Two framings share the same packet vocabulary:
//! - JSON lines (canonical): `{"packet_type":0,"packet_payload":{...}}\n`
//! - binary: a big-endian `u32` type followed by big-endian `f32` fields.
//!
//! Type numbers are per direction, so inbound and outbound type 0 differ.

use serde::{Deserialize, Serialize};

use crate::{
    error::CodecError,
    event::{Measurement, Reference},
};

const TYPE_LEN: usize = 4;
const F32_LEN: usize = 4;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    #[default]
    Json,
    Binary,
}

impl Framing {
    pub fn encode<P: Packet>(self, packet: &P, buffer: &mut [u8]) -> Result<usize, CodecError> {
        match self {
            Framing::Json => packet.encode_json(buffer),
            Framing::Binary => packet.encode_binary(buffer),
        }
    }

    pub fn decode<P: Packet>(self, bytes: &[u8]) -> Result<P, CodecError> {
        match self {
            Framing::Json => P::decode_json(bytes),
            Framing::Binary => P::decode_binary(bytes),
        }
    }

    /// Byte ending a frame, if the framing is delimited.
    pub const fn terminator(self) -> Option<u8> {
        match self {
            Framing::Json => Some(b'\n'),
            Framing::Binary => None,
        }
    }
}

pub trait Packet: Sized {
    /// Exact length of a binary frame.
    const BINARY_LEN: usize;

    fn encode_binary(&self, buffer: &mut [u8]) -> Result<usize, CodecError>;
    fn decode_binary(bytes: &[u8]) -> Result<Self, CodecError>;
    /// Writes one JSON line, newline included.
    fn encode_json(&self, buffer: &mut [u8]) -> Result<usize, CodecError>;
    /// Accepts a JSON line with or without its newline.
    fn decode_json(bytes: &[u8]) -> Result<Self, CodecError>;
}

/// Inbound, host to device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostCommand {
    Reference(Reference),
}

impl HostCommand {
    const TYPE_REFERENCE: u32 = 0;
}

/// Outbound, device to host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostReport {
    Measure(Measurement),
}

impl HostReport {
    const TYPE_MEASURE: u32 = 0;
}

#[derive(Serialize, Deserialize)]
struct JsonFrame<P> {
    packet_type: u32,
    packet_payload: P,
}

impl Packet for HostCommand {
    const BINARY_LEN: usize = TYPE_LEN + 2 * F32_LEN;

    fn encode_binary(&self, buffer: &mut [u8]) -> Result<usize, CodecError> {
        let HostCommand::Reference(reference) = self;
        let mut writer = BinaryWriter::new(buffer, Self::BINARY_LEN)?;
        writer.put_u32(Self::TYPE_REFERENCE);
        writer.put_f32(reference.temperature);
        writer.put_f32(reference.sampling_period);
        Ok(Self::BINARY_LEN)
    }

    fn decode_binary(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = BinaryReader::new(bytes, Self::BINARY_LEN)?;
        match reader.get_u32() {
            Self::TYPE_REFERENCE => Ok(HostCommand::Reference(Reference {
                temperature: reader.get_f32(),
                sampling_period: reader.get_f32(),
            })),
            unknown => Err(CodecError::UnknownPacketType(unknown)),
        }
    }

    fn encode_json(&self, buffer: &mut [u8]) -> Result<usize, CodecError> {
        let HostCommand::Reference(reference) = *self;
        encode_json_line(
            &JsonFrame {
                packet_type: Self::TYPE_REFERENCE,
                packet_payload: reference,
            },
            buffer,
        )
    }

    fn decode_json(bytes: &[u8]) -> Result<Self, CodecError> {
        let bytes = trim_line(bytes);
        let packet_type = peek_json_type(bytes)?;
        match packet_type {
            Self::TYPE_REFERENCE => {
                let frame: JsonFrame<Reference> = decode_json_frame(bytes)?;
                Ok(HostCommand::Reference(frame.packet_payload))
            }
            unknown => Err(CodecError::UnknownPacketType(unknown)),
        }
    }
}

impl Packet for HostReport {
    const BINARY_LEN: usize = TYPE_LEN + 3 * F32_LEN;

    fn encode_binary(&self, buffer: &mut [u8]) -> Result<usize, CodecError> {
        let HostReport::Measure(measure) = self;
        let mut writer = BinaryWriter::new(buffer, Self::BINARY_LEN)?;
        writer.put_u32(Self::TYPE_MEASURE);
        writer.put_f32(measure.temperature);
        writer.put_f32(measure.pressure);
        writer.put_f32(measure.humidity);
        Ok(Self::BINARY_LEN)
    }

    fn decode_binary(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = BinaryReader::new(bytes, Self::BINARY_LEN)?;
        match reader.get_u32() {
            Self::TYPE_MEASURE => Ok(HostReport::Measure(Measurement {
                temperature: reader.get_f32(),
                pressure: reader.get_f32(),
                humidity: reader.get_f32(),
            })),
            unknown => Err(CodecError::UnknownPacketType(unknown)),
        }
    }

    fn encode_json(&self, buffer: &mut [u8]) -> Result<usize, CodecError> {
        let HostReport::Measure(measure) = *self;
        encode_json_line(
            &JsonFrame {
                packet_type: Self::TYPE_MEASURE,
                packet_payload: measure,
            },
            buffer,
        )
    }

    fn decode_json(bytes: &[u8]) -> Result<Self, CodecError> {
        let bytes = trim_line(bytes);
        match peek_json_type(bytes)? {
            Self::TYPE_MEASURE => {
                let frame: JsonFrame<Measurement> = decode_json_frame(bytes)?;
                Ok(HostReport::Measure(frame.packet_payload))
            }
            unknown => Err(CodecError::UnknownPacketType(unknown)),
        }
    }
}

fn encode_json_line<P: Serialize>(
    frame: &JsonFrame<P>,
    buffer: &mut [u8],
) -> Result<usize, CodecError> {
    let len = serde_json_core::to_slice(frame, buffer).map_err(|_| CodecError::BufferTooSmall)?;
    let newline = buffer.get_mut(len).ok_or(CodecError::BufferTooSmall)?;
    *newline = b'\n';
    Ok(len + 1)
}

fn decode_json_frame<'a, P: Deserialize<'a>>(bytes: &'a [u8]) -> Result<JsonFrame<P>, CodecError> {
    serde_json_core::from_slice::<JsonFrame<P>>(bytes)
        .map(|(frame, _consumed)| frame)
        .map_err(|_| CodecError::Malformed)
}

/// Reads only `packet_type`, so an unknown type is reported as such rather
/// than as a payload mismatch.
fn peek_json_type(bytes: &[u8]) -> Result<u32, CodecError> {
    #[derive(Deserialize)]
    struct TypeOnly {
        packet_type: u32,
    }

    serde_json_core::from_slice::<TypeOnly>(bytes)
        .map(|(header, _consumed)| header.packet_type)
        .map_err(|_| CodecError::Malformed)
}

fn trim_line(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = bytes {
        bytes = rest;
    }
    bytes
}

struct BinaryWriter<'a> {
    buffer: &'a mut [u8],
    offset: usize,
}

impl<'a> BinaryWriter<'a> {
    fn new(buffer: &'a mut [u8], len: usize) -> Result<Self, CodecError> {
        if buffer.len() < len {
            return Err(CodecError::BufferTooSmall);
        }
        Ok(Self { buffer, offset: 0 })
    }

    fn put_u32(&mut self, value: u32) {
        self.buffer[self.offset..self.offset + 4].copy_from_slice(&value.to_be_bytes());
        self.offset += 4;
    }

    fn put_f32(&mut self, value: f32) {
        self.put_u32(value.to_bits());
    }
}

struct BinaryReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BinaryReader<'a> {
    fn new(bytes: &'a [u8], len: usize) -> Result<Self, CodecError> {
        if bytes.len() != len {
            return Err(CodecError::LengthMismatch);
        }
        Ok(Self { bytes, offset: 0 })
    }

    fn get_u32(&mut self) -> u32 {
        let mut word = [0; 4];
        word.copy_from_slice(&self.bytes[self.offset..self.offset + 4]);
        self.offset += 4;
        u32::from_be_bytes(word)
    }

    fn get_f32(&mut self) -> f32 {
        f32::from_bits(self.get_u32())
    }
}
