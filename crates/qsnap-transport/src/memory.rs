//! In-memory emulated target.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use qsnap_core::{
    ChannelError, CommandChannel, ERROR_SENTINEL, LoadPhase, Request, Verb,
};
use serde::{Deserialize, Serialize};

/// Execution state of the emulated machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Program counter.
    pub pc: u64,
    /// Opaque memory and register contents.
    pub state: Vec<u8>,
}

/// Emulated remote side of the snapshot protocol.
///
/// Useful for development and tests. Snapshots serialize as JSON, so `save`
/// blobs are self-contained and can be `load`ed back.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    machine: Machine,
    snapshots: BTreeMap<String, Machine>,
    upload: Option<Vec<u8>>,
    upload_chunks: usize,
    ack_overrides: HashMap<usize, usize>,
    generated: usize,
    history: Vec<String>,
}

impl MemoryTarget {
    /// Create an empty target.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a target whose machine holds `state`.
    #[must_use]
    pub fn with_state(state: Vec<u8>) -> Self {
        Self {
            machine: Machine { pc: 0, state },
            ..Self::default()
        }
    }

    /// Current machine.
    #[must_use]
    pub const fn machine(&self) -> &Machine {
        &self.machine
    }

    #[must_use]
    pub const fn pc(&self) -> u64 {
        self.machine.pc
    }

    /// Move the program counter, as if the target had executed.
    pub const fn set_pc(&mut self, pc: u64) {
        self.machine.pc = pc;
    }

    /// Every command line received so far.
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Answer the `index`-th chunk (0-based) of every upload with `ack`
    /// instead of the real byte count.
    pub fn inject_ack(&mut self, index: usize, ack: usize) {
        self.ack_overrides.insert(index, ack);
    }

    /// Handle one command line and produce the response text.
    pub fn handle(&mut self, line: &str) -> String {
        self.history.push(line.to_string());
        let result = Request::parse_command_line(line)
            .map_err(|e| e.to_string())
            .and_then(|request| self.dispatch(request));
        match result {
            Ok(response) => response,
            Err(reason) => {
                tracing::debug!(line, reason, "Emulated target rejected command");
                format!("{ERROR_SENTINEL}: {reason}")
            }
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<String, String> {
        match request.verb {
            Verb::Info => Ok(self
                .snapshots
                .iter()
                .map(|(name, machine)| format!("{name}:{:#x}\n", machine.pc))
                .collect()),
            Verb::Create => {
                let name = self.claim_name(request.name)?;
                self.snapshots.insert(name.clone(), self.machine.clone());
                Ok(name)
            }
            Verb::Restore => {
                let name = required_name(request.name)?;
                self.machine = self.snapshot(&name)?.clone();
                Ok(name)
            }
            Verb::Delete => {
                let name = required_name(request.name)?;
                self.snapshots
                    .remove(&name)
                    .ok_or_else(|| format!("snapshot {name} not found"))?;
                Ok(name)
            }
            Verb::Save => {
                let name = required_name(request.name)?;
                let blob = serde_json::to_vec(self.snapshot(&name)?).map_err(|e| e.to_string())?;
                Ok(hex::encode(blob))
            }
            Verb::Load => self.load(request),
        }
    }

    fn load(&mut self, request: Request) -> Result<String, String> {
        match request.state.ok_or("missing load state")? {
            LoadPhase::Start => {
                let data = request.data.ok_or("missing load data")?;
                self.upload_chunks = 0;
                let ack = self.ack(data.len());
                self.upload = Some(data);
                Ok(ack.to_string())
            }
            LoadPhase::Continuing => {
                let data = request.data.ok_or("missing load data")?;
                let upload = self.upload.as_mut().ok_or("no upload in progress")?;
                upload.extend_from_slice(&data);
                Ok(self.ack(data.len()).to_string())
            }
            LoadPhase::Done => {
                let blob = self.upload.take().ok_or("no upload in progress")?;
                let machine: Machine =
                    serde_json::from_slice(&blob).map_err(|e| format!("corrupt snapshot: {e}"))?;
                let name = self.claim_name(request.name)?;
                self.snapshots.insert(name.clone(), machine);
                Ok(name)
            }
        }
    }

    fn ack(&mut self, received: usize) -> usize {
        let index = self.upload_chunks;
        self.upload_chunks += 1;
        self.ack_overrides.get(&index).copied().unwrap_or(received)
    }

    fn snapshot(&self, name: &str) -> Result<&Machine, String> {
        self.snapshots
            .get(name)
            .ok_or_else(|| format!("snapshot {name} not found"))
    }

    fn claim_name(&mut self, requested: Option<String>) -> Result<String, String> {
        match requested {
            Some(name) if self.snapshots.contains_key(&name) => {
                Err(format!("snapshot {name} already exists"))
            }
            Some(name) => Ok(name),
            None => loop {
                self.generated += 1;
                let name = format!("snapshot_{}", self.generated);
                if !self.snapshots.contains_key(&name) {
                    break Ok(name);
                }
            },
        }
    }
}

fn required_name(name: Option<String>) -> Result<String, String> {
    name.ok_or_else(|| "missing snapshot name".to_string())
}

#[async_trait]
impl CommandChannel for MemoryTarget {
    async fn execute(&mut self, command: &str) -> Result<String, ChannelError> {
        Ok(self.handle(command))
    }
}
