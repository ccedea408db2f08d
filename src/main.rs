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

    main.rs

    Emulator entry point: command line handling, image setup, the TCP
    endpoint, and the decode/execute session loop.

*/

#![deny(clippy::all)]
#![forbid(unsafe_code)]

use std::{net::TcpListener, path::PathBuf};

use bpaf::Bpaf;

mod bus;
mod chs;
mod commands;
mod disk_image;
mod drive;
mod drive_model;
mod remote488;

use bus::CmdDecoder;
use disk_image::SectorImage;
use drive::AmigoDrive;
use remote488::{RemoteMsgIo, TransportError};

const DEFAULT_PORT: u16 = 1234;
const DEFAULT_HPIB_ADDRESS: u8 = 0;

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version, generate(cli_args))]
pub struct CmdLineArgs {
    /// TCP port to listen on for the Remote488 connection (default 1234)
    #[bpaf(long)]
    pub port: Option<u16>,

    /// HPIB address of the drive, 0-7 (default 0)
    #[bpaf(long)]
    pub address: Option<u8>,

    /// Drive model to emulate
    #[bpaf(positional("MODEL"))]
    pub model: String,

    /// Disk image per unit; a unit without an image is not ready
    #[bpaf(positional("IMAGE"))]
    pub images: Vec<PathBuf>,
}

fn main() {
    env_logger::init();

    let args = cli_args().run();

    let model = match drive_model::find_model(&args.model) {
        Some(model) => model,
        None => {
            eprintln!("Model {} not found", args.model);
            eprintln!("\nAvailable models:");
            for model in drive_model::all_models() {
                eprintln!("{} {}", model.name, model);
            }
            std::process::exit(1);
        }
    };

    if args.images.len() > model.units {
        log::warn!(
            "Model {} has {} unit(s); extra image files ignored",
            model.name,
            model.units
        );
    }

    let mut images: Vec<Option<SectorImage>> = Vec::new();
    for unit in 0..model.units {
        match args.images.get(unit) {
            Some(path) => {
                println!("Opening image file {} for unit #{}..", path.display(), unit);
                match SectorImage::open(path, model.geometry) {
                    Ok(image) => images.push(Some(image)),
                    Err(e) => {
                        eprintln!("Can't open {}: {}", path.display(), e);
                        std::process::exit(1);
                    }
                }
            }
            None => {
                println!("No image for unit #{}", unit);
                images.push(None);
            }
        }
    }

    let port = args.port.unwrap_or(DEFAULT_PORT);
    let address = args.address.unwrap_or(DEFAULT_HPIB_ADDRESS) & 0x07;

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Can't listen on port {}: {}", port, e);
            std::process::exit(1);
        }
    };

    println!("Listening...");

    let (stream, peer) = match listener.accept() {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("Accept failed: {}", e);
            std::process::exit(1);
        }
    };
    // One session per process; stop listening once the emulator is attached
    drop(listener);

    println!("Connected from {}", peer);

    if let Err(e) = stream.set_nodelay(true) {
        eprintln!("Can't set TCP_NODELAY: {}", e);
        std::process::exit(1);
    }

    let io = match RemoteMsgIo::new(stream) {
        Ok(io) => io,
        Err(e) => {
            eprintln!("Socket setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let mut decoder = CmdDecoder::new(address);
    let mut drive = AmigoDrive::new(&io, model, images);

    if let Err(e) = run_session(&io, &mut decoder, &mut drive) {
        eprintln!("Session failed: {:#}", e);
        std::process::exit(1);
    }

    println!("Disconnected!");
}

/// Pull messages off the wire, assemble and decode commands, and execute
/// them until the peer closes the connection.
fn run_session(
    io: &RemoteMsgIo,
    decoder: &mut CmdDecoder,
    drive: &mut AmigoDrive,
) -> anyhow::Result<()> {
    loop {
        let msg = match io.get_msg() {
            Ok(msg) => msg,
            Err(TransportError::ConnectionClosed) => return Ok(()),
        };
        if let Some(raw_cmd) = decoder.feed(msg) {
            let cmd = raw_cmd.decode();
            log::debug!("{}", cmd);
            drive.exec_cmd(cmd)?;
        }
    }
}
