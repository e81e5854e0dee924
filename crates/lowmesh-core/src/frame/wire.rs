//! Whole network frames: header followed by a data or command payload.

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::FrameType;
use crate::error::FrameError;
use crate::frame::command::Command;
use crate::frame::header::NwkHeader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Data(Vec<u8>),
    Command(Command),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: NwkHeader,
    pub body: FrameBody,
}

impl Frame {
    pub fn command(header: NwkHeader, command: Command) -> Self {
        Self {
            header,
            body: FrameBody::Command(command),
        }
    }

    pub fn data(header: NwkHeader, payload: Vec<u8>) -> Self {
        Self {
            header,
            body: FrameBody::Data(payload),
        }
    }

    /// The command payload, or `NotACommand` for data frames.
    pub fn as_command(&self) -> Result<&Command, FrameError> {
        match &self.body {
            FrameBody::Command(cmd) => Ok(cmd),
            FrameBody::Data(_) => Err(FrameError::NotACommand),
        }
    }

    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        let (header, offset) = NwkHeader::parse(raw)?;
        let payload = &raw[offset..];
        let body = match header.frame_type {
            FrameType::Data => FrameBody::Data(payload.to_vec()),
            FrameType::Command => FrameBody::Command(Command::decode(payload)?),
        };
        Ok(Self { header, body })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.encoded_len() + 16);
        self.header.encode_into(&mut out);
        match &self.body {
            FrameBody::Data(payload) => out.extend_from_slice(payload),
            FrameBody::Command(cmd) => cmd.encode_into(&mut out),
        }
        out
    }
}
