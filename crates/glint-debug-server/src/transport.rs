//! Concrete [`Transport`] implementations: a line-framed TCP socket and a
//! `lrdb_stream_message:`-prefixed stdio pair. Both hand inbound bytes to
//! the VM thread through a `crossbeam-channel` queue fed by a dedicated
//! reader thread, so [`Transport::poll`] never blocks.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use crossbeam_channel::{Receiver, TryRecvError};
use log::warn;
use serde_json::Value as Json;

use crate::protocol::{frame_line, frame_stdio, unframe_stdio};
use crate::server::Transport;

fn spawn_line_reader(
    mut reader: impl BufRead + Send + 'static,
    decode: impl Fn(&str) -> Option<Json> + Send + 'static,
) -> Receiver<Json> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\r', '\n']);
                    if trimmed.is_empty() {
                        continue;
                    }
                    match decode(trimmed) {
                        Some(msg) => {
                            if tx.send(msg).is_err() {
                                break;
                            }
                        },
                        None => continue,
                    }
                },
            }
        }
    });
    rx
}

/// A single-accept TCP server transport: accepts one client, then frames
/// messages `\r\n`-terminated.
pub struct TcpTransport {
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    inbound: Option<Receiver<Json>>,
    open: bool,
}

impl TcpTransport {
    pub fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        Ok(Self { listener: Some(listener), stream: None, inbound: None, open: true })
    }
}

impl Transport for TcpTransport {
    fn close(&mut self) {
        self.open = false;
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn poll(&mut self) -> Vec<Json> {
        let Some(rx) = &self.inbound else { return Vec::new() };
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(msg) => out.push(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.open = false;
                    break;
                },
            }
        }
        out
    }

    fn run_one(&mut self) -> Option<Json> {
        let rx = self.inbound.as_ref()?;
        match rx.recv() {
            Ok(msg) => Some(msg),
            Err(_) => {
                self.open = false;
                None
            },
        }
    }

    fn wait_for_connection(&mut self) {
        if self.stream.is_some() {
            return;
        }
        let Some(listener) = &self.listener else { return };
        match listener.accept() {
            Ok((stream, _addr)) => {
                let reader = BufReader::new(stream.try_clone().expect("clone accepted stream"));
                self.inbound = Some(spawn_line_reader(reader, |line| serde_json::from_str(line).ok()));
                self.stream = Some(stream);
            },
            Err(e) => warn!("tcp accept failed: {e}"),
        }
    }

    fn send_message(&mut self, msg: &Json) -> bool {
        let Some(stream) = &mut self.stream else { return false };
        stream.write_all(frame_line(msg).as_bytes()).is_ok()
    }
}

/// A stdio pair multiplexing protocol traffic with the debugged program's
/// own output. Always considered connected (there's no separate accept
/// step for a process's own stdio).
pub struct StdioTransport {
    stdout: std::io::Stdout,
    inbound: Receiver<Json>,
    open: bool,
}

impl Default for StdioTransport {
    fn default() -> Self {
        let stdin = std::io::stdin();
        let inbound = spawn_line_reader(BufReader::new(stdin), |line| {
            let body = unframe_stdio(line)?;
            serde_json::from_str(body).ok()
        });
        Self { stdout: std::io::stdout(), inbound, open: true }
    }
}

impl Transport for StdioTransport {
    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn poll(&mut self) -> Vec<Json> {
        let mut out = Vec::new();
        loop {
            match self.inbound.try_recv() {
                Ok(msg) => out.push(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.open = false;
                    break;
                },
            }
        }
        out
    }

    fn run_one(&mut self) -> Option<Json> {
        match self.inbound.recv() {
            Ok(msg) => Some(msg),
            Err(_) => {
                self.open = false;
                None
            },
        }
    }

    fn wait_for_connection(&mut self) {
        // Stdio is connected from process start; nothing to wait for.
    }

    fn send_message(&mut self, msg: &Json) -> bool {
        self.stdout.write_all(frame_stdio(msg).as_bytes()).is_ok() && self.stdout.flush().is_ok()
    }
}
