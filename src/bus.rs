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

    bus.rs

    Implements the IEEE-488 addressing state machine. Consumes Remote488
    messages and reassembles raw bus commands: talker/listener addressing,
    universal commands, secondary addresses and listen parameter payloads.

*/

use crate::{
    commands::BusCmd,
    remote488::{Msg, MsgType},
};

/// Bit 0 of the signal shadow byte is ATN. Signal lines are active low on
/// the wire: a cleared bit means the line is asserted.
const ATN_MASK: u8 = 0x01;

/// Secondary addressing state: which primary command group byte was seen
/// last, and so how the next secondary byte is to be interpreted.
#[derive(Copy, Clone, Debug, PartialEq)]
enum SaState {
    None,
    /// Parallel poll configure received
    Pacs,
    /// Talker primary addressed state (MTA seen)
    Tpas,
    /// Listener primary addressed state (MLA seen)
    Lpas,
    /// Untalk seen; an MSA next means an Identify sequence
    Unt,
}

/// Command assembly state.
#[derive(Copy, Clone, Debug, PartialEq)]
enum DecState {
    Idle,
    /// Talk or Identify pending; emitted when ATN releases
    MtaSa,
    /// Listen pending; accumulating parameters until EOI
    MlaSa,
}

/// The bus command decoder for one device address.
pub struct CmdDecoder {
    my_mta: u8,
    my_mla: u8,
    my_msa: u8,

    sa_state:  SaState,
    dec_state: DecState,

    talker:   bool,
    listener: bool,
    pp_state: bool,
    signals:  u8,

    pending: Option<BusCmd>,
}

impl CmdDecoder {
    pub fn new(hpib_address: u8) -> CmdDecoder {
        log::debug!("Command decoder at HPIB address {}", hpib_address & 0x1f);
        CmdDecoder {
            my_mta: (hpib_address & 0x1f) | 0x40,
            my_mla: (hpib_address & 0x1f) | 0x20,
            my_msa: (hpib_address & 0x1f) | 0x60,
            sa_state: SaState::None,
            dec_state: DecState::Idle,
            talker: false,
            listener: false,
            pp_state: false,
            signals: !0,
            pending: None,
        }
    }

    /// Consume one message, emitting a raw bus command when one completes.
    pub fn feed(&mut self, msg: Msg) -> Option<BusCmd> {
        match msg.msg_type {
            MsgType::SignalClear => self.signals &= !msg.data,
            MsgType::SignalSet => self.signals |= msg.data,
            // Poll state is pushed, not polled; nothing to answer
            MsgType::PpRequest => return None,
            _ => {}
        }

        let is_cmd = (self.signals & ATN_MASK) == 0 && msg.msg_type == MsgType::Data;
        if is_cmd {
            if let Some(cmd) = self.feed_cmd_byte(msg.data & 0x7f) {
                return Some(cmd);
            }
        }

        match self.dec_state {
            DecState::MtaSa => {
                if (self.signals & ATN_MASK) != 0 {
                    // ATN released: the talk command is complete
                    self.dec_state = DecState::Idle;
                    return self.pending.take();
                }
            }
            DecState::MlaSa => {
                if self.listener && !is_cmd {
                    if msg.msg_type == MsgType::Data || msg.msg_type == MsgType::End {
                        if let Some(BusCmd::Listen { params, .. }) = self.pending.as_mut() {
                            params.push(msg.data);
                        }
                    }
                    if msg.msg_type == MsgType::End {
                        self.dec_state = DecState::Idle;
                        return self.pending.take();
                    }
                }
            }
            DecState::Idle => {}
        }
        None
    }

    /// Interpret one bus command byte (a DATA byte received with ATN
    /// asserted, high bit masked off).
    fn feed_cmd_byte(&mut self, byte: u8) -> Option<BusCmd> {
        let is_pcg = (byte & 0x60) != 0x60;
        if is_pcg {
            self.sa_state = SaState::None;
        }

        if byte == 0x05 && self.listener {
            // Parallel poll configure
            self.sa_state = SaState::Pacs;
        }
        else if byte == 0x15 {
            // Parallel poll unconfigure; the poll line stays hardwired
        }
        else if self.listener && byte == 0x3f {
            // UNL
            log::trace!("UNL");
            self.listener = false;
            self.dec_state = DecState::Idle;
            if !self.pp_state {
                self.pp_state = true;
                return Some(BusCmd::ParallelPoll(true));
            }
        }
        else if byte == 0x5f {
            // UNT
            self.talker = false;
            self.dec_state = DecState::Idle;
            self.sa_state = SaState::Unt;
            if !self.pp_state {
                self.pp_state = true;
                return Some(BusCmd::ParallelPoll(true));
            }
        }
        else if byte == self.my_mla {
            log::trace!("Addressed to listen");
            self.listener = true;
            self.dec_state = DecState::Idle;
            self.sa_state = SaState::Lpas;
        }
        else if byte == self.my_mta {
            log::trace!("Addressed to talk");
            self.talker = true;
            self.dec_state = DecState::Idle;
            self.sa_state = SaState::Tpas;
        }
        else if self.talker && (byte & 0x60) == 0x40 {
            // Other talker addressed
            self.talker = false;
            self.dec_state = DecState::Idle;
            if !self.pp_state {
                self.pp_state = true;
                return Some(BusCmd::ParallelPoll(true));
            }
        }
        else if (self.listener && byte == 0x04) || byte == 0x14 {
            // Selected or universal device clear
            self.dec_state = DecState::Idle;
            return Some(BusCmd::DeviceClear);
        }
        else if !is_pcg {
            match self.sa_state {
                SaState::Pacs => {
                    // PPE/PPD ignored; poll response is fixed
                }
                SaState::Tpas => {
                    self.dec_state = DecState::MtaSa;
                    self.pending = Some(BusCmd::Talk { sa: byte & 0x1f });
                    if self.pp_state {
                        self.pp_state = false;
                        return Some(BusCmd::ParallelPoll(false));
                    }
                }
                SaState::Lpas => {
                    self.dec_state = DecState::MlaSa;
                    self.pending = Some(BusCmd::Listen {
                        sa: byte & 0x1f,
                        params: Vec::new(),
                    });
                    if self.pp_state {
                        self.pp_state = false;
                        return Some(BusCmd::ParallelPoll(false));
                    }
                }
                SaState::Unt => {
                    if byte == self.my_msa {
                        self.pending = Some(BusCmd::Identify);
                        self.dec_state = DecState::MtaSa;
                    }
                }
                SaState::None => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed a message script through the decoder and collect emissions.
    fn feed_script(decoder: &mut CmdDecoder, script: &[Msg]) -> Vec<BusCmd> {
        script.iter().filter_map(|msg| decoder.feed(*msg)).collect()
    }

    fn sig_clr(data: u8) -> Msg {
        Msg::new(MsgType::SignalClear, data)
    }
    fn sig_set(data: u8) -> Msg {
        Msg::new(MsgType::SignalSet, data)
    }
    fn data(data: u8) -> Msg {
        Msg::new(MsgType::Data, data)
    }
    fn end(data: u8) -> Msg {
        Msg::new(MsgType::End, data)
    }

    #[test]
    fn identify_sequence() {
        let mut decoder = CmdDecoder::new(0);
        let cmds = feed_script(
            &mut decoder,
            &[sig_clr(0x01), data(0x5f), data(0x60), sig_set(0x01)],
        );
        // UNT asserts the poll line, then ATN release completes the Identify
        assert_eq!(cmds, vec![BusCmd::ParallelPoll(true), BusCmd::Identify]);
    }

    #[test]
    fn talk_command_emitted_on_atn_release() {
        let mut decoder = CmdDecoder::new(0);
        let cmds = feed_script(&mut decoder, &[sig_clr(0x01), data(0x40), data(0x70)]);
        assert!(cmds.is_empty());
        let cmds = feed_script(&mut decoder, &[sig_set(0x01)]);
        assert_eq!(cmds, vec![BusCmd::Talk { sa: 0x10 }]);
    }

    #[test]
    fn listen_command_accumulates_params() {
        let mut decoder = CmdDecoder::new(0);
        let cmds = feed_script(
            &mut decoder,
            &[
                sig_clr(0x01),
                data(0x20), // MLA
                data(0x68), // SA 8
                sig_set(0x01),
                data(0x03),
                end(0x01),
            ],
        );
        assert_eq!(
            cmds,
            vec![BusCmd::Listen {
                sa: 0x08,
                params: vec![0x03, 0x01],
            }]
        );
    }

    #[test]
    fn listen_params_ignore_command_bytes() {
        let mut decoder = CmdDecoder::new(0);
        // ATN stays asserted: the data bytes remain commands, and the
        // pending listen command never completes.
        let cmds = feed_script(
            &mut decoder,
            &[sig_clr(0x01), data(0x20), data(0x60), data(0x03)],
        );
        assert!(cmds.is_empty());
    }

    #[test]
    fn unl_asserts_parallel_poll() {
        let mut decoder = CmdDecoder::new(0);
        let cmds = feed_script(&mut decoder, &[sig_clr(0x01), data(0x20), data(0x3f)]);
        assert_eq!(cmds, vec![BusCmd::ParallelPoll(true)]);

        // Addressing with a secondary address takes the poll away again
        let cmds = feed_script(&mut decoder, &[data(0x20), data(0x68)]);
        assert_eq!(cmds, vec![BusCmd::ParallelPoll(false)]);
    }

    #[test]
    fn other_talker_releases_talker() {
        let mut decoder = CmdDecoder::new(0);
        let cmds = feed_script(&mut decoder, &[sig_clr(0x01), data(0x40), data(0x41)]);
        assert_eq!(cmds, vec![BusCmd::ParallelPoll(true)]);

        // No longer addressed: a secondary address byte is ignored
        let cmds = feed_script(&mut decoder, &[data(0x70), sig_set(0x01)]);
        assert!(cmds.is_empty());
    }

    #[test]
    fn device_clear_bytes() {
        let mut decoder = CmdDecoder::new(0);
        // DCL is universal
        let cmds = feed_script(&mut decoder, &[sig_clr(0x01), data(0x14)]);
        assert_eq!(cmds, vec![BusCmd::DeviceClear]);

        // SDC requires the device to be addressed as a listener
        let cmds = feed_script(&mut decoder, &[data(0x04)]);
        assert!(cmds.is_empty());
        let cmds = feed_script(&mut decoder, &[data(0x20), data(0x04)]);
        assert_eq!(cmds, vec![BusCmd::DeviceClear]);
    }

    #[test]
    fn nondefault_address() {
        let mut decoder = CmdDecoder::new(5);
        let cmds = feed_script(
            &mut decoder,
            &[sig_clr(0x01), data(0x5f), data(0x65), sig_set(0x01)],
        );
        assert_eq!(cmds, vec![BusCmd::ParallelPoll(true), BusCmd::Identify]);

        // Another device's MSA does not identify us
        let mut decoder = CmdDecoder::new(5);
        let cmds = feed_script(
            &mut decoder,
            &[sig_clr(0x01), data(0x5f), data(0x62), sig_set(0x01)],
        );
        assert_eq!(cmds, vec![BusCmd::ParallelPoll(true)]);
    }

    #[test]
    fn data_with_atn_released_is_not_command() {
        let mut decoder = CmdDecoder::new(0);
        // Without ATN, addressing bytes are payload and must not address us
        let cmds = feed_script(
            &mut decoder,
            &[sig_set(0x01), data(0x20), data(0x68), end(0x00)],
        );
        assert!(cmds.is_empty());
    }
}
