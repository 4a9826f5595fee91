#![allow(unused)]

use std::{str::FromStr, sync::Mutex};

use log::{debug, LevelFilter};
use simplelog::SimpleLogger;

use otee_core::{
    proto::{
        ConnectionMethod, CorrelationToken, Direction, MemoryFlags, ReturnCode, ReturnOrigin,
        TaUuid, WireMemory, WireOperation, WireParam,
    },
    Connector, EngineResult, Guard, GuardConfig,
};

/// Setup logging from the `LOG_LEVEL` environment variable
pub fn setup_logging() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());
}

/// Setup a guard over a fresh [MockConnector]
pub fn setup() -> Guard<MockConnector> {
    setup_with_config(GuardConfig::default())
}

pub fn setup_with_config(config: GuardConfig) -> Guard<MockConnector> {
    setup_logging();

    Guard::with_config(MockConnector::default(), config)
}

/// Calls recorded by the [MockConnector]
#[derive(Clone, PartialEq, Debug)]
pub enum Call {
    Initialize(Option<String>),
    Finalize,
    Register {
        id: u32,
        block: WireMemory,
    },
    Release(u32),
    Open {
        session_id: u32,
        uuid: TaUuid,
        method: ConnectionMethod,
        token: CorrelationToken,
        operation: Option<WireOperation>,
    },
    Close(u32),
    Invoke {
        session_id: u32,
        command_id: u32,
        token: CorrelationToken,
        operation: Option<WireOperation>,
    },
    Cancel(CorrelationToken),
}

/// Scripted connector recording every call.
///
/// Operations are returned with output values swapped and output memory
/// references filled with `0xa5` up to the scripted return size.
pub struct MockConnector {
    calls: Mutex<Vec<Call>>,
    result: Mutex<(ReturnCode, ReturnOrigin)>,
    return_size: Mutex<u32>,
    garbled: Mutex<bool>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            calls: Mutex::new(vec![]),
            result: Mutex::new((ReturnCode::Success, ReturnOrigin::TrustedApp)),
            return_size: Mutex::new(0),
            garbled: Mutex::new(false),
        }
    }
}

impl MockConnector {
    /// Fetch recorded calls
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Clear recorded calls
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear()
    }

    /// Set the result for subsequent open / invoke calls
    pub fn set_result(&self, code: ReturnCode, origin: ReturnOrigin) {
        *self.result.lock().unwrap() = (code, origin);
    }

    /// Set the return size applied to output memory references
    pub fn set_return_size(&self, n: u32) {
        *self.return_size.lock().unwrap() = n;
    }

    /// Return malformed operation bytes from open / invoke calls
    pub fn set_garbled(&self, garbled: bool) {
        *self.garbled.lock().unwrap() = garbled;
    }

    /// Fetch global ids of registered shared memory
    pub fn registered(&self) -> Vec<u32> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                Call::Register { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Fetch global ids of opened sessions
    pub fn opened(&self) -> Vec<u32> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                Call::Open { session_id, .. } => Some(*session_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, c: Call) {
        debug!("mock: {c:?}");
        self.calls.lock().unwrap().push(c);
    }

    fn execute(&self, operation: Option<&[u8]>) -> (Option<WireOperation>, EngineResult) {
        let (code, origin) = *self.result.lock().unwrap();
        let return_size = *self.return_size.lock().unwrap();

        let mut op = match operation {
            Some(b) => WireOperation::decode(b).unwrap(),
            None => return (None, EngineResult::error(code, origin)),
        };
        let received = op.clone();

        for p in op.params.iter_mut() {
            match p {
                WireParam::Value { a, b, direction } if direction.is_output() => {
                    core::mem::swap(a, b);
                }
                WireParam::MemRef {
                    parent,
                    offset,
                    direction,
                } if direction.is_output() => {
                    let start = *offset as usize;
                    let end = (start + return_size as usize).min(parent.buffer.len());
                    parent.buffer[start..end].fill(0xa5);
                    parent.return_size = return_size;
                }
                _ => (),
            }
        }

        let encoded = match *self.garbled.lock().unwrap() {
            true => vec![0xff, 0x00],
            false => op.encode().unwrap(),
        };

        (
            Some(received),
            EngineResult::new(code, origin, Some(encoded)),
        )
    }
}

impl Connector for MockConnector {
    fn initialize(&self, name: Option<&str>) -> ReturnCode {
        self.record(Call::Initialize(name.map(String::from)));
        ReturnCode::Success
    }

    fn finalize(&self) {
        self.record(Call::Finalize);
    }

    fn register_shared_memory(&self, block: &[u8], id: u32) -> ReturnCode {
        let block = WireMemory::decode(block).unwrap();
        assert_eq!(block.id, id);

        self.record(Call::Register { id, block });
        ReturnCode::Success
    }

    fn release_shared_memory(&self, id: u32) {
        self.record(Call::Release(id));
    }

    fn open_session(
        &self,
        session_id: u32,
        uuid: &TaUuid,
        method: ConnectionMethod,
        _data: u32,
        operation: Option<&[u8]>,
        token: CorrelationToken,
    ) -> EngineResult {
        let (received, r) = self.execute(operation);

        self.record(Call::Open {
            session_id,
            uuid: *uuid,
            method,
            token,
            operation: received,
        });

        r
    }

    fn close_session(&self, session_id: u32) {
        self.record(Call::Close(session_id));
    }

    fn invoke_command(
        &self,
        session_id: u32,
        command_id: u32,
        operation: Option<&[u8]>,
        token: CorrelationToken,
    ) -> EngineResult {
        let (received, r) = self.execute(operation);

        self.record(Call::Invoke {
            session_id,
            command_id,
            token,
            operation: received,
        });

        r
    }

    fn request_cancellation(&self, token: CorrelationToken) {
        self.record(Call::Cancel(token));
    }
}

/// Build an encoded operation with a single memory reference
pub fn memref_op(id: u32, size: usize, flags: MemoryFlags, direction: Direction) -> Vec<u8> {
    WireOperation::new(vec![WireParam::MemRef {
        parent: WireMemory::new(id, flags, vec![0u8; size]),
        offset: 0,
        direction,
    }])
    .encode()
    .unwrap()
}
