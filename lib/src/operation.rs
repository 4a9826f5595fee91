// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Operations and their parameters
//!
//! An [Operation] carries up to [MAX_PARAMS] parameter slots to a session
//! open or command invocation, outputs are written back in place when the
//! call succeeds. Operations may be shared between threads (for example to
//! request cancellation) but only one call may use an operation at a time.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex, MutexGuard,
};

use log::debug;

use otee_proto::{
    Direction, ReturnCode, ReturnOrigin, WireOperation, WireParam, MAX_PARAMS,
};

use crate::{Error, SharedMemory};

/// Value parameter
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Value {
    pub a: i32,
    pub b: i32,
    pub direction: Direction,
}

impl Value {
    pub fn new(a: i32, b: i32, direction: Direction) -> Self {
        Self { a, b, direction }
    }
}

/// Reference to a region of a registered [SharedMemory] block
#[derive(Copy, Clone, Debug)]
pub struct MemoryReference<'a> {
    parent: &'a SharedMemory,
    offset: usize,
    direction: Direction,
}

impl<'a> MemoryReference<'a> {
    /// Reference `parent` from `offset`, the direction must be permitted
    /// by the parent block flags
    pub fn new(
        parent: &'a SharedMemory,
        offset: usize,
        direction: Direction,
    ) -> Result<Self, Error> {
        if !direction.permitted_by(parent.flags()) || offset > parent.size() {
            return Err(Error::api(ReturnCode::BadParameters));
        }

        Ok(Self {
            parent,
            offset,
            direction,
        })
    }

    pub fn parent(&self) -> &'a SharedMemory {
        self.parent
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Check returned output bytes fit the parent buffer
    fn check(&self, returned: &otee_proto::WireMemory) -> Result<(), Error> {
        let end = self.offset + returned.return_size as usize;

        if end > self.parent.size() {
            return Err(Error::api(ReturnCode::ShortBuffer));
        }
        if end > returned.buffer.len() {
            return Err(Error::Tee {
                code: ReturnCode::BadFormat,
                origin: ReturnOrigin::Comms,
            });
        }

        Ok(())
    }

    /// Copy returned output bytes into the parent buffer, see [Self::check]
    fn update(&self, returned: &otee_proto::WireMemory) {
        let n = returned.return_size as usize;
        let end = self.offset + n;

        self.parent.buffer().write(|b| {
            b[self.offset..end].copy_from_slice(&returned.buffer[self.offset..end])
        });
        self.parent.set_return_size(n);
    }
}

/// Operation parameter slot
#[derive(Copy, Clone, Debug, Default)]
pub enum Parameter<'a> {
    #[default]
    Empty,
    Value(Value),
    MemoryReference(MemoryReference<'a>),
}

impl<'a> From<Value> for Parameter<'a> {
    fn from(v: Value) -> Self {
        Parameter::Value(v)
    }
}

impl<'a> From<MemoryReference<'a>> for Parameter<'a> {
    fn from(r: MemoryReference<'a>) -> Self {
        Parameter::MemoryReference(r)
    }
}

/// Operation, see module docs
#[derive(Debug, Default)]
pub struct Operation<'a> {
    params: Mutex<Vec<Parameter<'a>>>,
    started: AtomicBool,
    sequence: AtomicU64,
}

/// Marks an [Operation] started, returning it to idle on drop
#[derive(Debug)]
pub(crate) struct Started<'o, 'a> {
    op: &'o Operation<'a>,
}

impl<'o, 'a> Drop for Started<'o, 'a> {
    fn drop(&mut self) {
        self.op.sequence.store(0, Ordering::Release);
        self.op.started.store(false, Ordering::Release);
    }
}

impl<'a> Operation<'a> {
    /// Create an operation from up to [MAX_PARAMS] parameters
    pub fn new(params: Vec<Parameter<'a>>) -> Result<Self, Error> {
        if params.len() > MAX_PARAMS {
            return Err(Error::api(ReturnCode::ExcessData));
        }

        Ok(Self {
            params: Mutex::new(params),
            ..Default::default()
        })
    }

    /// Fetch the parameter in the provided slot
    pub fn param(&self, index: usize) -> Option<Parameter<'a>> {
        self.params().get(index).copied()
    }

    /// Fetch the value parameter in the provided slot
    pub fn value(&self, index: usize) -> Option<Value> {
        match self.param(index) {
            Some(Parameter::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Replace the parameter in the provided slot, fails with busy
    /// while the operation is in use
    pub fn set_param(&self, index: usize, param: impl Into<Parameter<'a>>) -> Result<(), Error> {
        if self.is_started() {
            return Err(Error::api(ReturnCode::Busy));
        }

        match self.params().get_mut(index) {
            Some(p) => *p = param.into(),
            None => return Err(Error::api(ReturnCode::BadParameters)),
        }

        Ok(())
    }

    /// Check whether the operation is in use by a call
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Sequence number of the call using this operation (zero when idle)
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Mark the operation started for the call with the provided sequence number
    pub(crate) fn start(&self, sequence: u64) -> Result<Started<'_, 'a>, Error> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Operation already started");
            return Err(Error::api(ReturnCode::Busy));
        }

        self.sequence.store(sequence, Ordering::Release);

        Ok(Started { op: self })
    }

    /// Build the wire message for this operation
    pub(crate) fn to_wire(&self) -> WireOperation {
        let params = self
            .params()
            .iter()
            .map(|p| match p {
                Parameter::Empty => WireParam::Empty,
                Parameter::Value(v) => WireParam::Value {
                    a: v.a,
                    b: v.b,
                    direction: v.direction,
                },
                Parameter::MemoryReference(r) => WireParam::MemRef {
                    parent: r.parent.to_wire(),
                    offset: r.offset as u32,
                    direction: r.direction,
                },
            })
            .collect();

        WireOperation {
            started: true,
            params,
        }
    }

    /// Write outputs from a returned operation back in place.
    ///
    /// Every slot is checked before any is written, on error the
    /// operation and its memory are left untouched.
    pub(crate) fn update(&self, returned: &WireOperation) -> Result<(), Error> {
        let mut params = self.params();

        for (p, w) in params.iter().zip(returned.params.iter()) {
            if let (Parameter::MemoryReference(r), WireParam::MemRef { parent, .. }) = (p, w) {
                if r.direction.is_output() {
                    r.check(parent)?;
                }
            }
        }

        for (p, w) in params.iter_mut().zip(returned.params.iter()) {
            match (p, w) {
                (Parameter::Value(v), WireParam::Value { a, b, .. }) if v.direction.is_output() => {
                    v.a = *a;
                    v.b = *b;
                }
                (Parameter::MemoryReference(r), WireParam::MemRef { parent, .. })
                    if r.direction.is_output() =>
                {
                    r.update(parent)
                }
                _ => (),
            }
        }

        Ok(())
    }

    fn params(&self) -> MutexGuard<'_, Vec<Parameter<'a>>> {
        self.params.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod test {
    use otee_proto::{MemoryFlags, WireMemory};

    use super::*;
    use crate::SharedBuffer;

    #[test]
    fn reference_validation() {
        let m = SharedMemory::new(1, MemoryFlags::INPUT, SharedBuffer::zeroed(8));

        assert!(MemoryReference::new(&m, 0, Direction::Input).is_ok());
        assert!(MemoryReference::new(&m, 8, Direction::Input).is_ok());

        let e = MemoryReference::new(&m, 9, Direction::Input).unwrap_err();
        assert_eq!(e.code(), ReturnCode::BadParameters);

        let e = MemoryReference::new(&m, 0, Direction::InOut).unwrap_err();
        assert_eq!(e.code(), ReturnCode::BadParameters);
    }

    #[test]
    fn excess_params() {
        let e = Operation::new(vec![Parameter::Empty; 5]).unwrap_err();
        assert_eq!(e.code(), ReturnCode::ExcessData);
        assert_eq!(e.origin(), ReturnOrigin::Api);
    }

    #[test]
    fn start_busy() {
        let op = Operation::new(vec![Value::new(1, 2, Direction::Input).into()]).unwrap();

        let s = op.start(7).unwrap();
        assert!(op.is_started());
        assert_eq!(op.sequence(), 7);

        assert_eq!(op.start(8).unwrap_err().code(), ReturnCode::Busy);
        assert_eq!(
            op.set_param(0, Parameter::Empty).unwrap_err().code(),
            ReturnCode::Busy
        );

        drop(s);
        assert!(!op.is_started());
        assert_eq!(op.sequence(), 0);
    }

    #[test]
    fn update_outputs() {
        let m = SharedMemory::new(3, MemoryFlags::all(), SharedBuffer::zeroed(12));

        let op = Operation::new(vec![
            Value::new(1, 2, Direction::Input).into(),
            Value::new(3, 4, Direction::InOut).into(),
            MemoryReference::new(&m, 2, Direction::InOut).unwrap().into(),
        ])
        .unwrap();

        let mut w = op.to_wire();
        assert_eq!(w.params.len(), 3);

        for p in w.params.iter_mut() {
            match p {
                WireParam::Value { a, b, .. } => {
                    *a += 10;
                    *b += 10;
                }
                WireParam::MemRef { parent, .. } => {
                    parent.buffer.iter_mut().for_each(|b| *b = 0xa5);
                    parent.return_size = 4;
                }
                _ => (),
            }
        }

        op.update(&w).unwrap();

        // Inputs are untouched, outputs updated
        assert_eq!(op.value(0), Some(Value::new(1, 2, Direction::Input)));
        assert_eq!(op.value(1), Some(Value::new(13, 14, Direction::InOut)));

        assert_eq!(m.return_size(), 4);
        assert_eq!(
            m.buffer().to_vec(),
            vec![0, 0, 0xa5, 0xa5, 0xa5, 0xa5, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn update_short_buffer() {
        let m = SharedMemory::new(3, MemoryFlags::OUTPUT, SharedBuffer::zeroed(4));
        let op =
            Operation::new(vec![MemoryReference::new(&m, 2, Direction::Output).unwrap().into()])
                .unwrap();

        let mut returned = WireMemory::new(3, MemoryFlags::OUTPUT, vec![0u8; 4]);
        returned.return_size = 4;

        let w = WireOperation::new(vec![WireParam::MemRef {
            parent: returned,
            offset: 2,
            direction: Direction::Output,
        }]);

        let e = op.update(&w).unwrap_err();
        assert_eq!(e.code(), ReturnCode::ShortBuffer);
        assert_eq!(m.return_size(), 0);
    }

    #[test]
    fn update_all_or_nothing() {
        let a = SharedMemory::new(1, MemoryFlags::OUTPUT, SharedBuffer::zeroed(4));
        let b = SharedMemory::new(2, MemoryFlags::OUTPUT, SharedBuffer::zeroed(4));

        let op = Operation::new(vec![
            Value::new(1, 2, Direction::Output).into(),
            MemoryReference::new(&a, 0, Direction::Output).unwrap().into(),
            MemoryReference::new(&b, 0, Direction::Output).unwrap().into(),
        ])
        .unwrap();

        let mut w = op.to_wire();
        for (i, p) in w.params.iter_mut().enumerate() {
            match p {
                WireParam::Value { a, b, .. } => {
                    *a = 10;
                    *b = 20;
                }
                // Second reference reports more than its buffer holds
                WireParam::MemRef { parent, .. } => {
                    parent.buffer.iter_mut().for_each(|b| *b = 0xa5);
                    parent.return_size = if i == 1 { 4 } else { 8 };
                }
                _ => (),
            }
        }

        let e = op.update(&w).unwrap_err();
        assert_eq!(e.code(), ReturnCode::ShortBuffer);

        // Earlier slots are not written back
        assert_eq!(op.value(0), Some(Value::new(1, 2, Direction::Output)));
        assert_eq!(a.return_size(), 0);
        assert_eq!(a.buffer().to_vec(), vec![0u8; 4]);
        assert_eq!(b.return_size(), 0);
    }
}
