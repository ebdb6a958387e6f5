use std::io::{self, Read, Write};
use thiserror::Error;

/// Oldest config protocol revision this controller can talk to.
///
/// This is the service's control-API revision, not its release version.
pub const VERSION_MIN: u32 = 5;
/// Newest config protocol revision this controller can talk to.
pub const VERSION_MAX: u32 = 17;

/// Returns the protocol version as a `u32` payload.
pub const CMD_GET_VERSION: u32 = 100;
/// Returns the current mode code as a `u32` payload.
pub const CMD_GET_MODE: u32 = 101;
/// Reset the service's display capture. Reserved; the controller never sends it.
pub const CMD_RESET_DISPLAY: u32 = 103;

// Mode codes. `MODE_OFF` is deliberately not adjacent to the others.
pub const MODE_USB: u32 = 1;
pub const MODE_TCP: u32 = 2;
pub const MODE_OFF: u32 = 3;
pub const MODE_RTSP: u32 = 4;

/// Result code the service uses for a successful dispatch.
pub const RESULT_SUCCESS: u32 = 0;

/// Upper bound on a single frame body.  Control traffic is a handful of
/// bytes; anything larger means the stream is out of sync.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const HEADER_LEN: usize = 4;

/// A mode change has no opcode of its own: the mode code is the command id.
pub const fn mode_command(mode_code: u32) -> u32 {
    mode_code
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("insufficient data for length header")]
    ShortHeader,
    #[error("insufficient data for frame: need {needed} bytes, have {available}")]
    ShortBody { needed: usize, available: usize },
    #[error("frame body of {0} bytes is below the 4-byte minimum")]
    Truncated(usize),
    #[error("frame body of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),
    #[error("expected a 4-byte u32 payload, got {0} bytes")]
    BadPayload(usize),
}

/// Controller → service.
///
/// Encoded as a big-endian `u32` body length, then the little-endian command
/// id, then the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: u32,
    pub payload: Vec<u8>,
}

/// Service → controller.
///
/// Same framing as [`Request`]; the first body word is the service result
/// code instead of a command id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub result: u32,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(command: u32) -> Self {
        Self {
            command,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(command: u32, payload: &[u8]) -> Self {
        Self {
            command,
            payload: payload.to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.command, &self.payload)
    }

    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        let (command, payload, consumed) = decode_frame(data)?;
        Ok((Self { command, payload }, consumed))
    }
}

impl Response {
    pub fn success(payload: &[u8]) -> Self {
        Self {
            result: RESULT_SUCCESS,
            payload: payload.to_vec(),
        }
    }

    pub fn success_u32(value: u32) -> Self {
        Self::success(&value.to_le_bytes())
    }

    pub fn failure(result: u32) -> Self {
        Self {
            result,
            payload: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == RESULT_SUCCESS
    }

    /// Interpret the payload as a single little-endian `u32`.
    pub fn value_u32(&self) -> Result<u32, FrameError> {
        let bytes: [u8; 4] = self
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| FrameError::BadPayload(self.payload.len()))?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.result, &self.payload)
    }

    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        let (result, payload, consumed) = decode_frame(data)?;
        Ok((Self { result, payload }, consumed))
    }
}

fn encode_frame(word: u32, payload: &[u8]) -> Vec<u8> {
    let len = (4 + payload.len()) as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + len as usize);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&word.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_frame(data: &[u8]) -> Result<(u32, Vec<u8>, usize), FrameError> {
    if data.len() < HEADER_LEN {
        return Err(FrameError::ShortHeader);
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    if len < 4 {
        return Err(FrameError::Truncated(len));
    }
    if data.len() < HEADER_LEN + len {
        return Err(FrameError::ShortBody {
            needed: HEADER_LEN + len,
            available: data.len(),
        });
    }
    let body = &data[HEADER_LEN..HEADER_LEN + len];
    let word = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    Ok((word, body[4..].to_vec(), HEADER_LEN + len))
}

/// Read one complete frame (header included) from a blocking stream.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            FrameError::TooLarge(len),
        ));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&header);
    frame.resize(HEADER_LEN + len, 0);
    reader.read_exact(&mut frame[HEADER_LEN..])?;
    Ok(frame)
}

pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame)?;
    writer.flush()
}
