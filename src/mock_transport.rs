//! A scripted [Transport] for poller and coordinator tests.
//!
//! Every call is appended to a shared log, so tests can check ordering and
//! that no two cycles interleave on the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Connect,
    Read { address: u16, device_id: u8 },
    Close,
}

/// Scripted outcome of reading one register.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Value(u16),
    Timeout,
    /// The line goes away while reading this register.
    Disconnect,
}

#[derive(Default)]
struct Script {
    replies: HashMap<u16, Reply>,
    refuse_connect: bool,
    read_delay: Duration,
}

/// Shared view of a [ScriptedTransport], kept by the test after the
/// transport itself moves into a poller or coordinator.
#[derive(Clone, Default)]
pub struct ScriptHandle {
    calls: Arc<Mutex<Vec<Call>>>,
    script: Arc<Mutex<Script>>,
}

impl ScriptHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Read { .. }))
            .count()
    }

    pub fn set_reply(&self, address: u16, reply: Reply) {
        self.script.lock().unwrap().replies.insert(address, reply);
    }

    pub fn clear_replies(&self) {
        self.script.lock().unwrap().replies.clear();
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.script.lock().unwrap().refuse_connect = refuse;
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.script.lock().unwrap().read_delay = delay;
    }
}

pub struct ScriptedTransport {
    connected: bool,
    handle: ScriptHandle,
}

impl ScriptedTransport {
    /// A disconnected transport. Unscripted registers read as `address * 10`.
    pub fn new() -> (Self, ScriptHandle) {
        let handle = ScriptHandle::default();
        let transport = Self {
            connected: false,
            handle: handle.clone(),
        };
        (transport, handle)
    }

    pub fn connected() -> (Self, ScriptHandle) {
        let (mut transport, handle) = Self::new();
        transport.connected = true;
        (transport, handle)
    }

    fn record(&self, call: Call) {
        self.handle.calls.lock().unwrap().push(call);
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<()> {
        self.record(Call::Connect);
        if self.handle.script.lock().unwrap().refuse_connect {
            return Err(Error::ConnectionFailure {
                port: "mock".into(),
                reason: "refused".into(),
            });
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_holding_register(&mut self, address: u16, device_id: u8) -> Result<u16> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.record(Call::Read { address, device_id });

        let (reply, delay) = {
            let script = self.handle.script.lock().unwrap();
            (script.replies.get(&address).copied(), script.read_delay)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match reply.unwrap_or(Reply::Value(address * 10)) {
            Reply::Value(value) => Ok(value),
            Reply::Timeout => Err(Error::Timeout),
            Reply::Disconnect => {
                self.connected = false;
                Err(Error::SerialError(embedded_io::ErrorKind::BrokenPipe))
            }
        }
    }

    fn close(&mut self) {
        self.record(Call::Close);
        self.connected = false;
    }
}
