// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Sample trusted applications for the [SimEngine][crate::SimEngine]

use std::sync::atomic::{AtomicI32, Ordering};

use log::debug;

use otee_proto::{Direction, ReturnCode, TaUuid, WireParam};

use crate::{Cancellation, TaSession, TrustedApp};

/// Echo application UUID
pub const ECHO_UUID: TaUuid = TaUuid::new([
    0x79, 0xb7, 0x77, 0x88, 0x97, 0x89, 0x4a, 0x7a, 0xa2, 0xbe, 0xb6, 0x01, 0x55, 0xee, 0xf5, 0xf4,
]);

/// Copy input memory reference (slot 0) to output memory reference (slot 1)
pub const ECHO_CMD_COPY: u32 = 0x00;

/// Fill an output memory reference (slot 1) with `a` bytes of value `b` from a value (slot 0)
pub const ECHO_CMD_FILL: u32 = 0x01;

/// Add `b` to `a` for an in/out value (slot 0)
pub const ECHO_CMD_ADD: u32 = 0x02;

/// Block until cancelled
pub const ECHO_CMD_WAIT: u32 = 0x03;

/// Counter application UUID
pub const COUNTER_UUID: TaUuid = TaUuid::new([
    0x3e, 0x93, 0x63, 0x2e, 0xa7, 0x1e, 0x4a, 0x4f, 0x9b, 0x3c, 0x51, 0x0e, 0x2d, 0x7a, 0x6c, 0x11,
]);

/// Increment the session counter, returning the new value in an output value (slot 0)
pub const COUNTER_CMD_INCREMENT: u32 = 0x00;

/// Fetch the session counter into an output value (slot 0)
pub const COUNTER_CMD_GET: u32 = 0x01;

/// Fetch a value parameter with the required direction
fn value(params: &mut [WireParam], i: usize, output: bool) -> Result<(&mut i32, &mut i32), ReturnCode> {
    match params.get_mut(i) {
        Some(WireParam::Value { a, b, direction })
            if (!output && direction.is_input()) || (output && direction.is_output()) =>
        {
            Ok((a, b))
        }
        _ => Err(ReturnCode::BadParameters),
    }
}

/// Fetch the usable region of a memory reference with the required direction
fn region(params: &mut [WireParam], i: usize, output: bool) -> Result<(&mut Vec<u8>, usize, &mut u32), ReturnCode> {
    match params.get_mut(i) {
        Some(WireParam::MemRef {
            parent,
            offset,
            direction,
        }) if (!output && direction.is_input()) || (output && direction.is_output()) => {
            let offset = *offset as usize;
            if offset > parent.buffer.len() {
                return Err(ReturnCode::BadParameters);
            }
            Ok((&mut parent.buffer, offset, &mut parent.return_size))
        }
        _ => Err(ReturnCode::BadParameters),
    }
}

/// Echo application, stateless
#[derive(Clone, Debug, Default)]
pub struct EchoApp;

impl TrustedApp for EchoApp {
    fn name(&self) -> &str {
        "echo"
    }

    fn open_session(
        &self,
        _params: &mut [WireParam],
        _cancel: &Cancellation,
    ) -> Result<Box<dyn TaSession>, ReturnCode> {
        Ok(Box::new(EchoApp))
    }
}

impl TaSession for EchoApp {
    fn invoke_command(
        &self,
        command_id: u32,
        params: &mut [WireParam],
        cancel: &Cancellation,
    ) -> Result<(), ReturnCode> {
        match command_id {
            ECHO_CMD_COPY => {
                let data = {
                    let (buff, offset, _) = region(params, 0, false)?;
                    buff[offset..].to_vec()
                };

                let (buff, offset, return_size) = region(params, 1, true)?;
                if buff.len() - offset < data.len() {
                    return Err(ReturnCode::ShortBuffer);
                }

                buff[offset..][..data.len()].copy_from_slice(&data);
                *return_size = data.len() as u32;
            }
            ECHO_CMD_FILL => {
                let (len, v) = {
                    let (a, b) = value(params, 0, false)?;
                    (*a, *b)
                };

                let len = usize::try_from(len).map_err(|_| ReturnCode::BadParameters)?;

                let (buff, offset, return_size) = region(params, 1, true)?;
                if buff.len() - offset < len {
                    return Err(ReturnCode::ShortBuffer);
                }

                buff[offset..][..len].fill(v as u8);
                *return_size = len as u32;
            }
            ECHO_CMD_ADD => match params.get_mut(0) {
                Some(WireParam::Value {
                    a,
                    b,
                    direction: Direction::InOut,
                }) => *a = a.wrapping_add(*b),
                _ => return Err(ReturnCode::BadParameters),
            },
            ECHO_CMD_WAIT => {
                debug!("Waiting for cancellation");
                cancel.wait();
                return Err(ReturnCode::Cancel);
            }
            _ => return Err(ReturnCode::NotImplemented),
        }

        Ok(())
    }
}

/// Counter application, each session holds a counter initialised from
/// an optional input value (slot 0) on open
#[derive(Clone, Debug, Default)]
pub struct CounterApp;

/// Counter session state
#[derive(Debug, Default)]
pub struct CounterSession {
    count: AtomicI32,
}

impl TrustedApp for CounterApp {
    fn name(&self) -> &str {
        "counter"
    }

    fn open_session(
        &self,
        params: &mut [WireParam],
        _cancel: &Cancellation,
    ) -> Result<Box<dyn TaSession>, ReturnCode> {
        let initial = value(params, 0, false).map(|(a, _)| *a).unwrap_or(0);

        Ok(Box::new(CounterSession {
            count: AtomicI32::new(initial),
        }))
    }
}

impl TaSession for CounterSession {
    fn invoke_command(
        &self,
        command_id: u32,
        params: &mut [WireParam],
        _cancel: &Cancellation,
    ) -> Result<(), ReturnCode> {
        let v = match command_id {
            COUNTER_CMD_INCREMENT => self.count.fetch_add(1, Ordering::SeqCst).wrapping_add(1),
            COUNTER_CMD_GET => self.count.load(Ordering::SeqCst),
            _ => return Err(ReturnCode::NotImplemented),
        };

        let (a, _b) = value(params, 0, true)?;
        *a = v;

        Ok(())
    }
}
