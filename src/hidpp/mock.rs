//! In-memory receiver used by tests. Records every written report and
//! answers register accesses the way a receiver would, by delivering the
//! reply through the raw device.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::raw::{RawDevice, RawTransport};
use super::report::{offset, sub_id, RECEIVER_INDEX};

#[derive(Default)]
struct State {
    device: Weak<RawDevice>,
    written: Vec<Vec<u8>>,
    rejects: HashMap<u8, u8>,
    ignored: HashSet<u8>,
    long_replies: HashMap<(u8, u8), Vec<u8>>,
}

struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl RawTransport for MockTransport {
    fn write_report(&self, report: &[u8]) -> io::Result<()> {
        let (device, reply) = {
            let mut state = self.state.lock();
            state.written.push(report.to_vec());
            (state.device.upgrade(), reply_for(&state, report))
        };
        if let (Some(device), Some(reply)) = (device, reply) {
            device.deliver(&reply);
        }
        Ok(())
    }
}

fn reply_for(state: &State, request: &[u8]) -> Option<Vec<u8>> {
    let sub = request[offset::SUB_ID];
    if !(sub_id::SET_REGISTER_SHORT..=sub_id::GET_REGISTER_LONG).contains(&sub) {
        return None;
    }
    let register = request[offset::ADDRESS];
    if state.ignored.contains(&register) {
        return None;
    }
    if let Some(&code) = state.rejects.get(&register) {
        return Some(vec![0x10, RECEIVER_INDEX, sub_id::ERROR, sub, register, code, 0x00]);
    }
    if sub == sub_id::GET_REGISTER_LONG {
        let mut reply = vec![0x11, RECEIVER_INDEX, sub, register];
        let key = (register, request[offset::PARAMETERS]);
        let mut data = state.long_replies.get(&key).cloned().unwrap_or_default();
        data.resize(16, 0);
        reply.extend_from_slice(&data);
        return Some(reply);
    }
    Some(vec![0x10, RECEIVER_INDEX, sub, register, 0x00, 0x00, 0x00])
}

/// Test handle on a mock receiver node.
#[derive(Clone)]
pub struct MockDevice {
    device: Arc<RawDevice>,
    state: Arc<Mutex<State>>,
}

impl MockDevice {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let device = Arc::new(RawDevice::new(
            "/dev/hidraw-mock",
            Box::new(MockTransport {
                state: state.clone(),
            }),
        ));
        state.lock().device = Arc::downgrade(&device);
        Self { device, state }
    }

    pub fn device(&self) -> Arc<RawDevice> {
        self.device.clone()
    }

    /// Deliver `report` as if the receiver had sent it.
    pub fn inject(&self, report: &[u8]) {
        self.device.deliver(report);
    }

    /// Answer every access to `register` with HID++ 1.0 error `code`.
    pub fn reject(&self, register: u8, code: u8) {
        self.state.lock().rejects.insert(register, code);
    }

    /// Never answer accesses to `register`.
    pub fn ignore(&self, register: u8) {
        self.state.lock().ignored.insert(register);
    }

    /// Reply data for a long register read whose first parameter is `param`.
    pub fn long_reply(&self, register: u8, param: u8, data: &[u8]) {
        self.state
            .lock()
            .long_replies
            .insert((register, param), data.to_vec());
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Writes addressed to `register`, in order.
    pub fn register_writes(&self, register: u8) -> Vec<Vec<u8>> {
        self.written()
            .into_iter()
            .filter(|r| r[offset::ADDRESS] == register)
            .collect()
    }

    /// Poll until `register` has been written `count` times.
    pub fn wait_for_register(&self, register: u8, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.register_writes(register).len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}
