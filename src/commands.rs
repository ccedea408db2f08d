/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    commands.rs

    Defines the raw bus commands assembled by the addressing state machine
    and the typed Amigo operations they decode into. The secondary address
    selects the operation family; the parameter payload shape selects the
    operation within it.

*/

use std::fmt::{Display, Formatter};

use crate::chs::DiskChs;

/// A raw bus command: addressing plus an undecoded secondary address and
/// parameter payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusCmd {
    Identify,
    ParallelPoll(bool),
    DeviceClear,
    Talk { sa: u8 },
    Listen { sa: u8, params: Vec<u8> },
}

/// A typed Amigo operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AmigoCmd {
    Identify,
    ParallelPoll(bool),
    DeviceClear,
    /// Talk SA 0: stream the sector buffer to the host.
    SendData,
    /// Talk SA 8: stream the 4-byte status frame to the host.
    SendStatus,
    /// Talk SA 0x10: one-byte pre-status indicator.
    Dsj,
    UnknownTalk { sa: u8 },
    /// Listen SA 0: sector data from the host.
    ReceiveData { data: Vec<u8> },
    Seek { unit: u8, chs: DiskChs },
    ReqStatus { unit: u8 },
    Verify { unit: u8, sector_count: u16 },
    ReqLogicalAddr,
    End,
    BufferedWrite { unit: u8 },
    BufferedRead { unit: u8 },
    Format { unit: u8, override_byte: u8, filler: u8 },
    AmigoClear,
    UnknownListen { sa: u8, params: Vec<u8> },
}

impl BusCmd {
    /// Classify a raw command into its typed operation.
    pub fn decode(self) -> AmigoCmd {
        match self {
            BusCmd::Identify => AmigoCmd::Identify,
            BusCmd::ParallelPoll(state) => AmigoCmd::ParallelPoll(state),
            BusCmd::DeviceClear => AmigoCmd::DeviceClear,
            BusCmd::Talk { sa } => match sa {
                0x00 => AmigoCmd::SendData,
                0x08 => AmigoCmd::SendStatus,
                0x10 => AmigoCmd::Dsj,
                _ => AmigoCmd::UnknownTalk { sa },
            },
            BusCmd::Listen { sa, params } => decode_listen(sa, params),
        }
    }
}

fn decode_listen(sa: u8, params: Vec<u8>) -> AmigoCmd {
    match sa {
        0x00 => {
            return AmigoCmd::ReceiveData { data: params };
        }
        0x08 => {
            if params.len() == 6 && (params[0] == 0x02 || params[0] == 0x0c) {
                // Seek & set address record
                return AmigoCmd::Seek {
                    unit: params[1],
                    chs:  DiskChs::from_wire([params[2], params[3], params[4], params[5]]),
                };
            }
            else if params.len() == 2 && params[0] == 0x03 {
                return AmigoCmd::ReqStatus { unit: params[1] };
            }
            else if params.len() == 4 && params[0] == 0x07 {
                return AmigoCmd::Verify {
                    unit: params[1],
                    sector_count: u16::from_be_bytes([params[2], params[3]]),
                };
            }
            else if params.len() == 2 && params[0] == 0x14 {
                return AmigoCmd::ReqLogicalAddr;
            }
            else if params.len() == 2 && params[0] == 0x15 {
                return AmigoCmd::End;
            }
        }
        0x09 => {
            if params.len() == 2 && params[0] == 0x08 {
                return AmigoCmd::BufferedWrite { unit: params[1] };
            }
        }
        0x0a => {
            if params.len() == 2 && params[0] == 0x03 {
                return AmigoCmd::ReqStatus { unit: params[1] };
            }
            else if params.len() == 2 && params[0] == 0x05 {
                return AmigoCmd::BufferedRead { unit: params[1] };
            }
            else if params.len() == 2 && params[0] == 0x14 {
                return AmigoCmd::ReqLogicalAddr;
            }
        }
        0x0b => {
            if params.len() == 2 && params[0] == 0x05 {
                // Buffered read/verify; served the same as a buffered read
                return AmigoCmd::BufferedRead { unit: params[1] };
            }
        }
        0x0c => {
            if params.len() == 5 && params[0] == 0x18 {
                return AmigoCmd::Format {
                    unit: params[1],
                    override_byte: params[2],
                    filler: params[4],
                };
            }
        }
        0x10 => {
            if params.len() == 1 {
                return AmigoCmd::AmigoClear;
            }
        }
        _ => {}
    }
    AmigoCmd::UnknownListen { sa, params }
}

impl AmigoCmd {
    /// Whether executing this operation re-enables and re-asserts the
    /// parallel poll line on completion.
    pub fn pp_enable(&self) -> bool {
        !matches!(
            self,
            AmigoCmd::Identify | AmigoCmd::ParallelPoll(_) | AmigoCmd::AmigoClear
        )
    }
}

impl Display for AmigoCmd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AmigoCmd::Identify => write!(f, "IDENTIFY"),
            AmigoCmd::ParallelPoll(state) => write!(f, "PP {}", *state as u8),
            AmigoCmd::DeviceClear => write!(f, "CLEAR"),
            AmigoCmd::SendData => write!(f, "SEND DATA"),
            AmigoCmd::SendStatus => write!(f, "SEND ADDR/STATUS"),
            AmigoCmd::Dsj => write!(f, "DSJ"),
            AmigoCmd::UnknownTalk { sa } => write!(f, "UNKNOWN TALK {:02x}", sa),
            AmigoCmd::ReceiveData { data } => write!(f, "RECEIVE DATA ({} bytes)", data.len()),
            AmigoCmd::Seek { unit, chs } => write!(f, "SEEK {}:{}", unit, chs),
            AmigoCmd::ReqStatus { unit } => write!(f, "REQ STATUS {}", unit),
            AmigoCmd::Verify { unit, sector_count } => write!(f, "VERIFY {}:{}", unit, sector_count),
            AmigoCmd::ReqLogicalAddr => write!(f, "REQ LOG ADDRESS"),
            AmigoCmd::End => write!(f, "END"),
            AmigoCmd::BufferedWrite { unit } => write!(f, "BUFFERED WR {}", unit),
            AmigoCmd::BufferedRead { unit } => write!(f, "BUFFERED RD {}", unit),
            AmigoCmd::Format {
                unit,
                override_byte,
                filler,
            } => write!(f, "FORMAT {} {:02x} {:02x}", unit, override_byte, filler),
            AmigoCmd::AmigoClear => write!(f, "AMIGO CLEAR"),
            AmigoCmd::UnknownListen { sa, params } => {
                write!(f, "UNKNOWN LISTEN {:02x}:", sa)?;
                for b in params {
                    write!(f, " {:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listen(sa: u8, params: &[u8]) -> AmigoCmd {
        BusCmd::Listen {
            sa,
            params: params.to_vec(),
        }
        .decode()
    }

    #[test]
    fn decode_talk_commands() {
        assert_eq!(BusCmd::Talk { sa: 0x00 }.decode(), AmigoCmd::SendData);
        assert_eq!(BusCmd::Talk { sa: 0x08 }.decode(), AmigoCmd::SendStatus);
        assert_eq!(BusCmd::Talk { sa: 0x10 }.decode(), AmigoCmd::Dsj);
        assert_eq!(BusCmd::Talk { sa: 0x0e }.decode(), AmigoCmd::UnknownTalk { sa: 0x0e });
    }

    #[test]
    fn decode_seek() {
        let cmd = listen(0x08, &[0x02, 0x01, 0x01, 0x23, 0x02, 0x1d]);
        assert_eq!(
            cmd,
            AmigoCmd::Seek {
                unit: 1,
                chs:  DiskChs::new(0x0123, 0x02, 0x1d),
            }
        );
        // Set-address-record opcode decodes to the same operation
        let cmd = listen(0x08, &[0x0c, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            cmd,
            AmigoCmd::Seek {
                unit: 0,
                chs:  DiskChs::new(0, 0, 0),
            }
        );
    }

    #[test]
    fn decode_listen_sa8_family() {
        assert_eq!(listen(0x08, &[0x03, 0x01]), AmigoCmd::ReqStatus { unit: 1 });
        assert_eq!(
            listen(0x08, &[0x07, 0x00, 0x01, 0x2c]),
            AmigoCmd::Verify {
                unit: 0,
                sector_count: 300,
            }
        );
        assert_eq!(listen(0x08, &[0x14, 0x00]), AmigoCmd::ReqLogicalAddr);
        assert_eq!(listen(0x08, &[0x15, 0x00]), AmigoCmd::End);
    }

    #[test]
    fn decode_buffered_io() {
        assert_eq!(listen(0x09, &[0x08, 0x00]), AmigoCmd::BufferedWrite { unit: 0 });
        assert_eq!(listen(0x0a, &[0x05, 0x01]), AmigoCmd::BufferedRead { unit: 1 });
        assert_eq!(listen(0x0a, &[0x03, 0x00]), AmigoCmd::ReqStatus { unit: 0 });
        assert_eq!(listen(0x0a, &[0x14, 0x00]), AmigoCmd::ReqLogicalAddr);
        // Read/verify variant
        assert_eq!(listen(0x0b, &[0x05, 0x00]), AmigoCmd::BufferedRead { unit: 0 });
    }

    #[test]
    fn decode_format_and_clear() {
        assert_eq!(
            listen(0x0c, &[0x18, 0x00, 0x80, 0x00, 0xe5]),
            AmigoCmd::Format {
                unit: 0,
                override_byte: 0x80,
                filler: 0xe5,
            }
        );
        assert_eq!(listen(0x10, &[0x00]), AmigoCmd::AmigoClear);
    }

    #[test]
    fn decode_receive_data_passthrough() {
        let data = vec![1, 2, 3];
        assert_eq!(listen(0x00, &data), AmigoCmd::ReceiveData { data });
    }

    #[test]
    fn malformed_payloads_are_unknown() {
        // Wrong lengths and unknown opcodes fall through with the raw
        // payload preserved for diagnostics
        assert_eq!(
            listen(0x08, &[0x02, 0x00]),
            AmigoCmd::UnknownListen {
                sa: 0x08,
                params: vec![0x02, 0x00],
            }
        );
        assert_eq!(
            listen(0x09, &[0x05, 0x00]),
            AmigoCmd::UnknownListen {
                sa: 0x09,
                params: vec![0x05, 0x00],
            }
        );
        assert_eq!(
            listen(0x10, &[0x00, 0x00]),
            AmigoCmd::UnknownListen {
                sa: 0x10,
                params: vec![0x00, 0x00],
            }
        );
        assert_eq!(
            listen(0x1f, &[]),
            AmigoCmd::UnknownListen {
                sa: 0x1f,
                params: vec![],
            }
        );
    }

    #[test]
    fn pp_enable_flags() {
        assert!(!AmigoCmd::Identify.pp_enable());
        assert!(!AmigoCmd::ParallelPoll(true).pp_enable());
        assert!(!AmigoCmd::AmigoClear.pp_enable());

        assert!(AmigoCmd::DeviceClear.pp_enable());
        assert!(AmigoCmd::Dsj.pp_enable());
        assert!(AmigoCmd::SendData.pp_enable());
        assert!(AmigoCmd::BufferedRead { unit: 0 }.pp_enable());
        assert!(AmigoCmd::UnknownTalk { sa: 2 }.pp_enable());
    }
}
