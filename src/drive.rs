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

    drive.rs

    Implements the Amigo drive state machine: per-unit state and media
    access, the DSJ error reporting path, the implicit two-phase command
    sequencing protocol, and execution of each decoded operation.

*/

#![allow(dead_code)]

use anyhow::Result;
use modular_bitfield::prelude::*;

use crate::{
    chs::{DiskChs, GeometryError, Lba},
    commands::AmigoCmd,
    disk_image::{SectorImage, SECTOR_SIZE},
    drive_model::DriveModel,
    remote488::MsgSender,
};

// Error codes reported in stat1
const ERROR_BAD_CMD: u8 = 0x01; // Unknown command
const ERROR_IO: u8 = 0x0a; // I/O error
const ERROR_STAT2: u8 = 0x13; // Some error in stat2
const ERROR_NO_UNIT: u8 = 0x17; // Unit # out of range
const ERROR_ATTENTION: u8 = 0x1f; // Unit attention

// Drive type nibble reported in the first encoded status byte
const UNIT_DRIVE_TYPE: u8 = 6;

// Error summary value of a unit with no media attached
const SS_NOT_READY: u8 = 3;

/// First byte of the encoded per-unit status pair.
#[bitfield]
#[derive(Copy, Clone, Debug)]
struct UnitStatusHigh {
    #[skip]
    __: B1,
    drive_type: B4,
    #[skip]
    __: B2,
    error_summary: bool,
}

/// Second byte of the encoded per-unit status pair.
#[bitfield]
#[derive(Copy, Clone, Debug)]
struct UnitStatusLow {
    error_code: B2,
    seek_error: bool,
    first_status: bool,
    #[skip]
    __: B2,
    write_protect: bool,
    attention: bool,
}

/// State of one drive unit: optional backing media, current position and
/// status bits.
pub struct UnitState {
    image: Option<SectorImage>,
    lba: Lba,
    a_bit: bool,
    c_bit: bool,
    f_bit: bool,
    w_bit: bool,
    ss: u8,
    tttt: u8,
}

impl UnitState {
    pub fn new(image: Option<SectorImage>) -> UnitState {
        let mut unit = UnitState {
            image,
            lba: 0,
            a_bit: false,
            c_bit: false,
            f_bit: true,
            w_bit: false,
            ss: 0,
            tttt: UNIT_DRIVE_TYPE,
        };
        if !unit.is_ready() {
            unit.ss = SS_NOT_READY;
            unit.f_bit = false;
        }
        unit
    }

    pub fn is_ready(&self) -> bool {
        self.image.is_some()
    }

    pub fn lba(&self) -> Lba {
        self.lba
    }

    fn format_img(&mut self, filler: u8) -> Result<()> {
        if let Some(image) = &mut self.image {
            image.format(filler)?;
            self.lba = 0;
        }
        Ok(())
    }

    fn write_img(&mut self, data: &[u8]) -> Result<()> {
        if let Some(image) = &mut self.image {
            image.write_sector(data, self.lba)?;
            self.lba += 1;
        }
        Ok(())
    }

    fn read_img(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; SECTOR_SIZE];
        if let Some(image) = &mut self.image {
            image.read_sector(&mut buf, self.lba)?;
            self.lba += 1;
        }
        Ok(buf.to_vec())
    }

    /// Encode the unit status bits into the two-byte wire representation.
    pub fn encode_status(&self) -> [u8; 2] {
        let high = UnitStatusHigh::new()
            .with_drive_type(self.tttt)
            .with_error_summary(self.c_bit || self.ss != 0)
            .into_bytes()[0];
        let low = UnitStatusLow::new()
            .with_error_code(self.ss)
            .with_seek_error(self.c_bit)
            .with_first_status(self.f_bit)
            .with_write_protect(self.w_bit)
            .with_attention(self.a_bit)
            .into_bytes()[0];
        [high, low]
    }
}

/// Command sequencing state. Two-phase operations leave IDLE between the
/// request command and its paired completion command; any other command
/// arriving in that window is a sequencing error.
#[derive(Copy, Clone, Debug, PartialEq)]
enum CmdSeqState {
    Idle,
    /// Waiting for a send address/status command
    WaitSendStatus,
    /// Waiting for a send data command
    WaitSendData,
    /// Waiting for a receive data command
    WaitReceiveData,
    /// Waiting for a clear command
    WaitClear,
}

/// The drive state machine for one Remote488 session.
pub struct AmigoDrive<'a> {
    io: &'a dyn MsgSender,
    model: &'static DriveModel,
    units: Vec<UnitState>,

    dsj: u8,
    stat1: u8,
    current_unit: usize,
    failed_unit: usize,

    pp_enabled: bool,
    pp_state: bool,

    status: [u8; 4],
    buffer: Vec<u8>,
    seq_state: CmdSeqState,
}

impl<'a> AmigoDrive<'a> {
    pub fn new(
        io: &'a dyn MsgSender,
        model: &'static DriveModel,
        images: Vec<Option<SectorImage>>,
    ) -> AmigoDrive<'a> {
        let mut units: Vec<UnitState> = images.into_iter().map(UnitState::new).collect();
        while units.len() < model.units {
            units.push(UnitState::new(None));
        }

        AmigoDrive {
            io,
            model,
            units,
            dsj: 2,
            stat1: 0,
            current_unit: 0,
            failed_unit: 0,
            pp_enabled: true,
            pp_state: false,
            status: [0; 4],
            buffer: Vec::new(),
            seq_state: CmdSeqState::Idle,
        }
    }

    /// Execute one decoded operation, applying the parallel poll policy: a
    /// command with the poll flag re-enables the poll line and re-asserts it
    /// once execution completes.
    pub fn exec_cmd(&mut self, cmd: AmigoCmd) -> Result<()> {
        let en_pp = cmd.pp_enable();
        if en_pp {
            self.pp_enabled = true;
        }
        self.dispatch(cmd)?;
        if en_pp {
            self.set_pp(true)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, cmd: AmigoCmd) -> Result<()> {
        match cmd {
            AmigoCmd::Identify => self.cmd_identify(),
            AmigoCmd::ParallelPoll(state) => self.set_pp(state),
            AmigoCmd::DeviceClear => self.cmd_device_clear(),
            AmigoCmd::SendData => self.cmd_send_data(),
            AmigoCmd::SendStatus => self.cmd_send_status(),
            AmigoCmd::Dsj => self.cmd_dsj(),
            AmigoCmd::UnknownTalk { sa } => self.cmd_unknown_talk(sa),
            AmigoCmd::ReceiveData { data } => self.cmd_receive_data(data),
            AmigoCmd::Seek { unit, chs } => self.cmd_seek(unit, chs),
            AmigoCmd::ReqStatus { unit } => self.cmd_req_status(unit),
            AmigoCmd::Verify { unit, sector_count } => self.cmd_verify(unit, sector_count),
            AmigoCmd::ReqLogicalAddr => self.cmd_req_logical_addr(),
            AmigoCmd::End => self.cmd_end(),
            AmigoCmd::BufferedWrite { unit } => self.cmd_buffered_write(unit),
            AmigoCmd::BufferedRead { unit } => self.cmd_buffered_read(unit),
            AmigoCmd::Format {
                unit,
                override_byte,
                filler,
            } => self.cmd_format(unit, override_byte, filler),
            AmigoCmd::AmigoClear => self.cmd_amigo_clear(),
            AmigoCmd::UnknownListen { sa, params } => self.cmd_unknown_listen(sa, params),
        }
    }

    /// Drive the parallel poll line, emitting a poll message only when the
    /// effective state changes.
    fn set_pp(&mut self, state: bool) -> Result<()> {
        let new_state = self.pp_enabled && state;
        if new_state != self.pp_state {
            self.pp_state = new_state;
            log::trace!("Parallel poll {}", if new_state { "asserted" } else { "released" });
            self.io.send_pp_state(if new_state { 0x80 } else { 0x00 })?;
        }
        Ok(())
    }

    fn set_seq_error(&mut self, talker: bool) -> Result<()> {
        log::warn!("Command sequencing error (state {:?})", self.seq_state);
        self.seq_state = CmdSeqState::Idle;
        if self.dsj == 0 {
            self.set_error(ERROR_IO);
        }
        if talker {
            // Give the host one byte so it isn't left hanging on a read
            self.io.send_end_byte(1)?;
        }
        Ok(())
    }

    /// Sequencing guard. Failing it reports an I/O error and resets to IDLE.
    fn require_seq_state(&mut self, req_state: CmdSeqState, talker: bool) -> Result<bool> {
        if self.seq_state != req_state {
            self.set_seq_error(talker)?;
            self.seq_state = CmdSeqState::Idle;
            Ok(false)
        }
        else {
            Ok(true)
        }
    }

    fn is_dsj_ok(&self) -> bool {
        self.dsj != 2
    }

    /// Select the addressed unit, failing into stat1 if the unit number is
    /// out of range, the unit has no media, or its first-status bit has not
    /// been collected yet.
    fn select_unit(&mut self, unit_no: usize) -> Option<usize> {
        if unit_no < self.model.units {
            self.current_unit = unit_no;
            let unit = &self.units[unit_no];
            if unit.f_bit || !unit.is_ready() {
                self.set_error(ERROR_STAT2);
                None
            }
            else {
                Some(unit_no)
            }
        }
        else {
            self.set_error(ERROR_NO_UNIT);
            None
        }
    }

    /// A pending unreported error (other than bad command / IO) holds off
    /// data transfer commands until the host collects status.
    fn dsj1_holdoff(&self) -> bool {
        self.dsj == 1 && self.stat1 != ERROR_BAD_CMD && self.stat1 != ERROR_IO
    }

    /// Check the current unit's position, raising the attention condition if
    /// it has run off the end of the media.
    fn is_lba_ok(&mut self) -> bool {
        if self.units[self.current_unit].lba < self.model.geometry.max_lba() {
            true
        }
        else {
            self.set_error(ERROR_ATTENTION);
            let unit = &mut self.units[self.current_unit];
            unit.a_bit = true;
            unit.c_bit = true;
            false
        }
    }

    fn set_error(&mut self, error_code: u8) {
        log::debug!("Error {:02x} on unit {}", error_code, self.current_unit);
        self.stat1 = error_code;
        self.failed_unit = self.current_unit;
        if self.dsj != 2 {
            self.dsj = 1;
        }
    }

    fn clear_errors(&mut self) {
        self.stat1 = 0;
        self.dsj = 0;
    }

    fn clear_dsj(&mut self) {
        if self.dsj != 2 {
            self.dsj = 0;
        }
    }

    fn amigo_clear(&mut self) {
        log::debug!("Amigo clear");
        for unit in self.units.iter_mut() {
            unit.a_bit = false;
            unit.c_bit = false;
            unit.f_bit = false;
            unit.lba = 0;
        }
        self.current_unit = 0;
        self.seq_state = CmdSeqState::Idle;
        self.clear_errors();
    }

    fn cmd_identify(&mut self) -> Result<()> {
        self.io.send_data(&self.model.id_bytes, true)?;
        Ok(())
    }

    fn cmd_device_clear(&mut self) -> Result<()> {
        self.amigo_clear();
        Ok(())
    }

    fn cmd_dsj(&mut self) -> Result<()> {
        if self.require_seq_state(CmdSeqState::Idle, true)? {
            self.io.send_end_byte(self.dsj)?;
            if self.dsj == 2 {
                self.dsj = 0;
            }
        }
        // DSJ must not re-assert the poll line on its way out
        self.pp_enabled = false;
        Ok(())
    }

    fn cmd_send_data(&mut self) -> Result<()> {
        if self.require_seq_state(CmdSeqState::WaitSendData, true)? {
            self.io.send_data(&self.buffer, false)?;
            self.seq_state = CmdSeqState::Idle;
        }
        Ok(())
    }

    fn cmd_send_status(&mut self) -> Result<()> {
        if self.require_seq_state(CmdSeqState::WaitSendStatus, true)? {
            self.io.send_data(&self.status, false)?;
            self.seq_state = CmdSeqState::Idle;
        }
        Ok(())
    }

    fn cmd_unknown_talk(&mut self, sa: u8) -> Result<()> {
        log::warn!("Unknown talk command, sa {:02x}", sa);
        Ok(())
    }

    fn cmd_receive_data(&mut self, data: Vec<u8>) -> Result<()> {
        if self.require_seq_state(CmdSeqState::WaitReceiveData, false)? {
            self.buffer = data;
            let unit_no = self.current_unit;
            self.units[unit_no].write_img(&self.buffer)?;
            self.clear_errors();
            self.seq_state = CmdSeqState::Idle;
        }
        Ok(())
    }

    fn cmd_seek(&mut self, unit_no: u8, chs: DiskChs) -> Result<()> {
        if !(self.require_seq_state(CmdSeqState::Idle, false)? && self.is_dsj_ok()) {
            return Ok(());
        }
        if let Some(unit_no) = self.select_unit(unit_no as usize) {
            // A seek always raises attention on the unit
            self.set_error(ERROR_ATTENTION);
            self.units[unit_no].a_bit = true;
            match chs.to_lba(&self.model.geometry) {
                Ok(lba) => {
                    self.units[unit_no].lba = lba;
                    self.clear_dsj();
                }
                Err(GeometryError::ChsOutOfRange) | Err(GeometryError::LbaOutOfRange) => {
                    self.units[unit_no].c_bit = true;
                }
            }
        }
        Ok(())
    }

    fn cmd_req_status(&mut self, unit_no: u8) -> Result<()> {
        if self.require_seq_state(CmdSeqState::Idle, false)? && self.is_dsj_ok() {
            if (unit_no as usize) < self.model.units {
                self.current_unit = unit_no as usize;
                let encoded = self.units[self.current_unit].encode_status();
                self.status = [self.stat1, unit_no, encoded[0], encoded[1]];
            }
            else {
                // Invalid unit number; report against the current unit
                self.status = [ERROR_NO_UNIT, unit_no, 0, 0];
            }
            let unit = &mut self.units[self.current_unit];
            unit.a_bit = false;
            unit.f_bit = false;
            unit.c_bit = false;
            self.clear_errors();
            self.seq_state = CmdSeqState::WaitSendStatus;
        }
        Ok(())
    }

    fn cmd_verify(&mut self, unit_no: u8, sector_count: u16) -> Result<()> {
        if !(self.require_seq_state(CmdSeqState::Idle, false)? && self.is_dsj_ok()) {
            return Ok(());
        }
        if let Some(unit_no) = self.select_unit(unit_no as usize) {
            let max_lba = self.model.geometry.max_lba();
            let unit = &mut self.units[unit_no];
            if sector_count == 0 {
                // Verify to end of media
                unit.lba = max_lba;
            }
            else {
                unit.lba = max_lba.min(unit.lba + sector_count as Lba);
            }
            self.clear_errors();
        }
        Ok(())
    }

    fn cmd_req_logical_addr(&mut self) -> Result<()> {
        if self.require_seq_state(CmdSeqState::Idle, false)? && self.is_dsj_ok() {
            let lba = self.units[self.current_unit].lba;
            let chs = DiskChs::from_lba(lba, &self.model.geometry)?;
            self.status = chs.to_wire();
            self.clear_errors();
            self.seq_state = CmdSeqState::WaitSendStatus;
        }
        Ok(())
    }

    fn cmd_end(&mut self) -> Result<()> {
        if self.require_seq_state(CmdSeqState::Idle, false)? && self.is_dsj_ok() {
            self.clear_errors();
            self.pp_enabled = false;
        }
        Ok(())
    }

    fn cmd_buffered_write(&mut self, unit_no: u8) -> Result<()> {
        if self.require_seq_state(CmdSeqState::Idle, false)?
            && self.is_dsj_ok()
            && self.select_unit(unit_no as usize).is_some()
            && !self.dsj1_holdoff()
            && self.is_lba_ok()
        {
            self.seq_state = CmdSeqState::WaitReceiveData;
        }
        Ok(())
    }

    fn cmd_buffered_read(&mut self, unit_no: u8) -> Result<()> {
        if !(self.require_seq_state(CmdSeqState::Idle, false)? && self.is_dsj_ok()) {
            return Ok(());
        }
        if let Some(unit_no) = self.select_unit(unit_no as usize) {
            if !self.dsj1_holdoff() && self.is_lba_ok() {
                self.buffer = self.units[unit_no].read_img()?;
                self.clear_errors();
                self.seq_state = CmdSeqState::WaitSendData;
            }
        }
        Ok(())
    }

    fn cmd_format(&mut self, unit_no: u8, override_byte: u8, filler: u8) -> Result<()> {
        if !(self.require_seq_state(CmdSeqState::Idle, false)? && self.is_dsj_ok()) {
            return Ok(());
        }
        if let Some(unit_no) = self.select_unit(unit_no as usize) {
            if !self.model.ignore_format_filler || (override_byte & 0x80) != 0 {
                let filler = if self.model.ignore_format_filler { 0xff } else { filler };
                log::debug!("Formatting unit {} with filler {:02x}", unit_no, filler);
                self.units[unit_no].format_img(filler)?;
            }
            self.units[unit_no].lba = 0;
            self.clear_errors();
        }
        Ok(())
    }

    fn cmd_amigo_clear(&mut self) -> Result<()> {
        if self.require_seq_state(CmdSeqState::Idle, false)? {
            // The actual clear arrives as a device clear command; hold the
            // poll line until it does.
            self.seq_state = CmdSeqState::WaitClear;
        }
        Ok(())
    }

    fn cmd_unknown_listen(&mut self, sa: u8, params: Vec<u8>) -> Result<()> {
        log::warn!("Unknown listen command, sa {:02x}, {} param bytes", sa, params.len());
        self.set_error(ERROR_IO);
        self.seq_state = CmdSeqState::Idle;
        Ok(())
    }
}
