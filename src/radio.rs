//! Packet source abstraction and the subprocess-backed receiver
//!
//! The gateway never talks to the transceiver directly. It consumes an
//! abstract [`PacketSource`] that hands out a receive context (a channel of
//! raw packets, each carrying the link-quality metadata measured for it)
//! and can tear that context down and open a fresh one, which is how the
//! watchdog recovers from a silently wedged radio.
//!
//! The production implementation spawns an external receiver process and
//! parses one JSON object per stdout line:
//!
//! ```text
//! {"data":"0165..","rssi":-87.0,"snr":9.2,"fei":-1432.0}
//! ```

use std::process::Stdio;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Link-quality metadata the radio measured for one received packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkQuality {
    /// Received signal strength, dBm.
    pub rssi: f64,
    /// Signal-to-noise ratio, dB.
    pub snr: f64,
    /// Frequency error, Hz.
    pub fei: f64,
}

/// One raw packet as delivered by the radio.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub bytes: Vec<u8>,
    pub link: LinkQuality,
}

/// Abstract receiver. `open` starts a fresh receive context and returns
/// its packet channel; `close` tears the current context down. Opening
/// implicitly invalidates any previous context.
pub trait PacketSource {
    fn open(&mut self) -> Result<mpsc::Receiver<RawPacket>>;
    fn close(&mut self);
}

/// Wire shape of one receiver stdout line.
#[derive(Debug, Deserialize)]
struct RxLine {
    data: String,
    rssi: f64,
    snr: f64,
    fei: f64,
}

impl RxLine {
    fn into_packet(self) -> Result<RawPacket> {
        Ok(RawPacket {
            bytes: decode_hex(&self.data)?,
            link: LinkQuality {
                rssi: self.rssi,
                snr: self.snr,
                fei: self.fei,
            },
        })
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        anyhow::bail!("malformed hex payload: {:?}", s);
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .with_context(|| format!("invalid hex payload: {:?}", s))
        })
        .collect()
}

/// Packet source backed by an external receiver subprocess.
pub struct SubprocessSource {
    program: String,
    args: Vec<String>,
    channel_capacity: usize,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

impl SubprocessSource {
    pub fn new(program: impl Into<String>, args: Vec<String>, channel_capacity: usize) -> Self {
        SubprocessSource {
            program: program.into(),
            args,
            channel_capacity,
            child: None,
            reader: None,
        }
    }
}

impl PacketSource for SubprocessSource {
    fn open(&mut self) -> Result<mpsc::Receiver<RawPacket>> {
        self.close();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawning receiver {:?}", self.program))?;

        let stdout = child
            .stdout
            .take()
            .context("receiver stdout not captured")?;

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let pkt = serde_json::from_str::<RxLine>(line)
                            .map_err(anyhow::Error::from)
                            .and_then(RxLine::into_packet);
                        match pkt {
                            Ok(pkt) => {
                                if tx.send(pkt).await.is_err() {
                                    // Receive context was replaced or dropped.
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, line, "discarding unparseable receiver line");
                            }
                        }
                    }
                    Ok(None) => {
                        warn!("receiver process closed stdout");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "error reading receiver stdout");
                        break;
                    }
                }
            }
        });

        self.child = Some(child);
        self.reader = Some(reader);
        Ok(rx)
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to kill receiver process");
            }
        }
    }
}

impl Drop for SubprocessSource {
    fn drop(&mut self) {
        self.close();
    }
}
