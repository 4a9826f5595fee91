use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use otee::{
    transport::LocalTransport, ConnectionMethod, Context, ContextConfig, ContextState, Direction,
    Error, MemoryFlags, MemoryReference, Operation, ReturnCode, ReturnOrigin, SharedBuffer, Value,
};
use otee_sim::apps::*;

mod helpers;
use helpers::*;

#[test]
fn lifecycle() -> anyhow::Result<()> {
    let guard = setup();

    let ctx = Context::local(guard.clone());
    assert_eq!(ctx.state(), ContextState::Uninitialized);

    // Calls prior to initialisation are rejected
    let e = ctx
        .register_shared_memory(vec![0u8; 4], MemoryFlags::INPUT)
        .unwrap_err();
    assert!(matches!(e, Error::NotReady));
    assert!(matches!(
        ctx.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None),
        Err(Error::NotReady)
    ));

    // Unknown engines are reported by the engine
    let e = ctx.initialize_context(Some("unknown")).unwrap_err();
    assert_eq!(e.code(), ReturnCode::ItemNotFound);
    assert_eq!(e.origin(), ReturnOrigin::Tee);
    assert_eq!(ctx.state(), ContextState::Uninitialized);

    ctx.initialize_context(None)?;
    assert_eq!(ctx.state(), ContextState::Active);
    assert!(guard.is_connected());
    assert_eq!(guard.caller_count(), 1);

    // Finalise is idempotent
    ctx.finalize_context();
    ctx.finalize_context();

    assert_eq!(ctx.state(), ContextState::Finalized);
    assert_eq!(guard.caller_count(), 0);
    assert!(!guard.is_connected());

    assert!(matches!(
        ctx.initialize_context(None),
        Err(Error::NotReady)
    ));

    Ok(())
}

#[test]
fn shared_memory_return_size() -> anyhow::Result<()> {
    let guard = setup();
    let ctx = context(&guard)?;

    let m = ctx.register_shared_memory(vec![0x11u8; 12], MemoryFlags::all())?;
    assert_eq!(m.size(), 12);
    assert_eq!(m.return_size(), 0);

    let s = ctx.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None)?;

    let op = Operation::new(vec![
        Value::new(8, 0x5a, Direction::Input).into(),
        MemoryReference::new(&m, 0, Direction::InOut)?.into(),
    ])?;

    s.invoke_command(ECHO_CMD_FILL, Some(&op))?;

    assert!(!op.is_started());
    assert_eq!(m.return_size(), 8);

    let b = m.buffer().to_vec();
    assert_eq!(&b[..8], &[0x5a; 8]);
    assert_eq!(&b[8..], &[0x11; 4]);

    // Input values are not written back
    assert_eq!(op.value(0), Some(Value::new(8, 0x5a, Direction::Input)));

    s.close_session();
    ctx.release_shared_memory(&m);
    ctx.finalize_context();

    Ok(())
}

#[test]
fn values_and_copy() -> anyhow::Result<()> {
    let guard = setup();
    let ctx = context(&guard)?;

    let s = ctx.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None)?;

    // In/out values are written back
    let op = Operation::new(vec![Value::new(40, 2, Direction::InOut).into()])?;
    s.invoke_command(ECHO_CMD_ADD, Some(&op))?;
    assert_eq!(op.value(0), Some(Value::new(42, 2, Direction::InOut)));

    // Operations are reusable once idle
    s.invoke_command(ECHO_CMD_ADD, Some(&op))?;
    assert_eq!(op.value(0), Some(Value::new(44, 2, Direction::InOut)));

    // Memory references with offsets
    let input = ctx.register_shared_memory(vec![1, 2, 3, 4, 5], MemoryFlags::INPUT)?;
    let output = ctx.register_shared_memory(SharedBuffer::zeroed(8), MemoryFlags::OUTPUT)?;
    let small = ctx.register_shared_memory(SharedBuffer::zeroed(2), MemoryFlags::OUTPUT)?;

    let op = Operation::new(vec![
        MemoryReference::new(&input, 2, Direction::Input)?.into(),
        MemoryReference::new(&output, 1, Direction::Output)?.into(),
    ])?;
    s.invoke_command(ECHO_CMD_COPY, Some(&op))?;

    assert_eq!(output.return_size(), 3);
    assert_eq!(output.buffer().to_vec(), vec![0, 3, 4, 5, 0, 0, 0, 0]);

    // Short output buffers are reported by the application
    op.set_param(1, MemoryReference::new(&small, 0, Direction::Output)?)?;

    let e = s.invoke_command(ECHO_CMD_COPY, Some(&op)).unwrap_err();
    assert_eq!(e.code(), ReturnCode::ShortBuffer);
    assert_eq!(e.origin(), ReturnOrigin::TrustedApp);
    assert!(!op.is_started());

    ctx.finalize_context();

    Ok(())
}

#[test]
fn shared_storage() -> anyhow::Result<()> {
    let guard = setup();
    let ctx = context(&guard)?;

    // Registering one buffer twice yields distinct blocks over the same storage
    let buff = SharedBuffer::zeroed(4);
    let a = ctx.register_shared_memory(buff.clone(), MemoryFlags::all())?;
    let b = ctx.register_shared_memory(buff.clone(), MemoryFlags::all())?;

    assert_ne!(a.id(), b.id());
    assert!(a.buffer().shares_storage(b.buffer()));
    assert_eq!(guard.live_ids(), (2, 0));
    assert_eq!(guard.connector().memory_count(), 2);

    let s = ctx.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None)?;
    let op = Operation::new(vec![
        Value::new(4, 0x77, Direction::Input).into(),
        MemoryReference::new(&a, 0, Direction::Output)?.into(),
    ])?;
    s.invoke_command(ECHO_CMD_FILL, Some(&op))?;

    assert_eq!(b.buffer().to_vec(), vec![0x77; 4]);
    assert_eq!(buff.to_vec(), vec![0x77; 4]);

    // Empty buffers are rejected locally
    let e = ctx
        .register_shared_memory(Vec::new(), MemoryFlags::INPUT)
        .unwrap_err();
    assert_eq!(e.code(), ReturnCode::BadParameters);
    assert_eq!(e.origin(), ReturnOrigin::Api);

    ctx.finalize_context();

    Ok(())
}

#[test]
fn caller_isolation() -> anyhow::Result<()> {
    let guard = setup();

    let ctx_a = context(&guard)?;
    let ctx_b = context(&guard)?;

    let m_b = ctx_b.register_shared_memory(SharedBuffer::zeroed(8), MemoryFlags::all())?;
    assert_eq!(guard.live_ids(), (1, 0));

    let s_a = ctx_a.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None)?;
    let s_b = ctx_b.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None)?;
    assert_eq!(guard.live_ids(), (1, 2));

    // Referencing memory registered by another caller is rejected by the broker
    let op = Operation::new(vec![
        Value::new(8, 0x33, Direction::Input).into(),
        MemoryReference::new(&m_b, 0, Direction::Output)?.into(),
    ])?;

    let e = s_a.invoke_command(ECHO_CMD_FILL, Some(&op)).unwrap_err();
    assert_eq!(e.code(), ReturnCode::ItemNotFound);
    assert_eq!(m_b.return_size(), 0);
    assert_eq!(m_b.buffer().to_vec(), vec![0u8; 8]);

    // Releasing by another callers id has no effect
    ctx_a.release_shared_memory(&m_b);
    assert_eq!(guard.live_ids(), (1, 2));

    // While the owner is unaffected
    s_b.invoke_command(ECHO_CMD_FILL, Some(&op))?;
    assert_eq!(m_b.return_size(), 8);

    // Finalising one caller leaves the other (and the engine) intact
    ctx_a.finalize_context();
    assert_eq!(guard.live_ids(), (1, 1));
    assert!(guard.is_connected());

    s_b.invoke_command(ECHO_CMD_FILL, Some(&op))?;

    ctx_b.finalize_context();
    assert_eq!(guard.live_ids(), (0, 0));
    assert!(!guard.is_connected());

    Ok(())
}

#[test]
fn invoke_without_operation() -> anyhow::Result<()> {
    let guard = setup();
    let (ctx, count) = counted_context(&guard)?;

    let s = ctx.open_session(&COUNTER_UUID, ConnectionMethod::Public, 0, None)?;

    let n = count.load(Ordering::SeqCst);

    // Status only, the application requires an output value
    let e = s.invoke_command(COUNTER_CMD_INCREMENT, None).unwrap_err();
    assert_eq!(e.code(), ReturnCode::BadParameters);
    assert_eq!(e.origin(), ReturnOrigin::TrustedApp);

    let e = s.invoke_command(0x99, None).unwrap_err();
    assert_eq!(e.code(), ReturnCode::NotImplemented);

    assert_eq!(count.load(Ordering::SeqCst), n + 2);

    ctx.finalize_context();

    Ok(())
}

#[test]
fn open_with_operation() -> anyhow::Result<()> {
    let guard = setup();
    let ctx = context(&guard)?;

    let init = Operation::new(vec![Value::new(10, 0, Direction::Input).into()])?;
    let s1 = ctx.open_session(
        &COUNTER_UUID,
        ConnectionMethod::User,
        0,
        Some(&init),
    )?;
    let s2 = ctx.open_session(&COUNTER_UUID, ConnectionMethod::Public, 0, None)?;
    assert_ne!(s1.id(), s2.id());

    let op = Operation::new(vec![Value::new(0, 0, Direction::Output).into()])?;

    s1.invoke_command(COUNTER_CMD_INCREMENT, Some(&op))?;
    assert_eq!(op.value(0).map(|v| v.a), Some(11));

    s2.invoke_command(COUNTER_CMD_INCREMENT, Some(&op))?;
    assert_eq!(op.value(0).map(|v| v.a), Some(1));

    // Unknown applications fail to open and leave no session behind
    let uuid = "00000000-0000-0000-0000-000000000001".parse()?;
    let e = ctx
        .open_session(&uuid, ConnectionMethod::Public, 0, None)
        .unwrap_err();
    assert_eq!(e.code(), ReturnCode::ItemNotFound);
    assert_eq!(e.origin(), ReturnOrigin::Tee);
    assert_eq!(guard.live_ids(), (0, 2));

    ctx.finalize_context();

    Ok(())
}

#[test]
fn busy_and_cancellation() -> anyhow::Result<()> {
    let guard = setup();
    let (ctx, count) = counted_context(&guard)?;

    let s = ctx.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None)?;
    let op = Operation::new(vec![Value::new(1, 1, Direction::InOut).into()])?;

    // Cancelling an idle operation has no effect
    ctx.request_cancellation(&op);

    thread::scope(|scope| -> anyhow::Result<()> {
        let h = scope.spawn(|| s.invoke_command(ECHO_CMD_WAIT, Some(&op)));

        assert!(wait_for(Duration::from_secs(5), || op.is_started()));

        // Started operations are rejected without transport I/O
        let n = count.load(Ordering::SeqCst);
        let e = s.invoke_command(ECHO_CMD_ADD, Some(&op)).unwrap_err();
        assert_eq!(e.code(), ReturnCode::Busy);
        assert_eq!(e.origin(), ReturnOrigin::Api);
        assert_eq!(count.load(Ordering::SeqCst), n);

        // Cancellation races with dispatch, retry until the call completes
        let cancelled = wait_for(Duration::from_secs(5), || {
            ctx.request_cancellation(&op);
            h.is_finished()
        });
        assert!(cancelled);

        let e = h.join().unwrap().unwrap_err();
        assert_eq!(e.code(), ReturnCode::Cancel);
        assert_eq!(e.origin(), ReturnOrigin::TrustedApp);

        Ok(())
    })?;

    // Operations are idle after any call
    assert!(!op.is_started());
    assert_eq!(guard.connector().pending_count(), 0);

    s.invoke_command(ECHO_CMD_ADD, Some(&op))?;
    assert_eq!(op.value(0), Some(Value::new(2, 1, Direction::InOut)));

    // Late cancellation is a no-op
    ctx.request_cancellation(&op);

    ctx.finalize_context();

    Ok(())
}

#[test]
fn idempotent_teardown() -> anyhow::Result<()> {
    let guard = setup();
    let ctx = context(&guard)?;

    let m = ctx.register_shared_memory(vec![1u8; 4], MemoryFlags::INPUT)?;
    let s = ctx.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None)?;
    assert_eq!(guard.live_ids(), (1, 1));

    ctx.release_shared_memory(&m);
    ctx.release_shared_memory(&m);
    assert!(m.is_released());

    s.close_session();
    s.close_session();
    assert!(s.is_closed());

    assert_eq!(guard.live_ids(), (0, 0));
    assert_eq!(guard.connector().session_count(), 0);

    // Closed sessions reject invocations
    let e = s.invoke_command(ECHO_CMD_ADD, None).unwrap_err();
    assert_eq!(e.code(), ReturnCode::BadState);

    ctx.finalize_context();
    ctx.finalize_context();

    Ok(())
}

#[test]
fn finalize_reclaims_resources() -> anyhow::Result<()> {
    let guard = setup();
    let ctx = context(&guard)?;

    let _m = ctx.register_shared_memory(vec![1u8; 4], MemoryFlags::INPUT)?;
    let s = ctx.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None)?;

    ctx.finalize_context();

    assert_eq!(guard.live_ids(), (0, 0));
    assert_eq!(guard.connector().memory_count(), 0);
    assert_eq!(guard.connector().session_count(), 0);

    // Handles outliving the context report not ready
    assert!(matches!(
        s.invoke_command(ECHO_CMD_ADD, None),
        Err(Error::NotReady)
    ));
    s.close_session();

    Ok(())
}

#[test]
fn drop_disconnects() -> anyhow::Result<()> {
    let guard = setup();

    {
        let ctx = context(&guard)?;
        let _m = ctx.register_shared_memory(vec![1u8; 4], MemoryFlags::INPUT)?;
        let _s = ctx.open_session(&ECHO_UUID, ConnectionMethod::Public, 0, None)?;

        assert_eq!(guard.caller_count(), 1);
    }

    assert_eq!(guard.caller_count(), 0);
    assert_eq!(guard.live_ids(), (0, 0));
    assert!(!guard.is_connected());

    Ok(())
}

#[test]
fn open_with_bad_outputs() -> anyhow::Result<()> {
    let guard = setup();

    // A single local session id, so a leaked id blocks the next open
    let ctx = Context::with_config(
        Garbling {
            inner: LocalTransport::new(guard.clone()),
            armed: AtomicBool::new(true),
        },
        ContextConfig {
            id_space: 1,
            id_retries: 1,
        },
    );
    ctx.initialize_context(None)?;

    let op = Operation::new(vec![Value::new(5, 0, Direction::Input).into()])?;

    let e = ctx
        .open_session(&COUNTER_UUID, ConnectionMethod::Public, 0, Some(&op))
        .unwrap_err();
    assert_eq!(e.code(), ReturnCode::BadFormat);
    assert!(!op.is_started());

    // The session opened by the engine is closed again
    assert_eq!(guard.live_ids(), (0, 0));
    assert_eq!(guard.connector().session_count(), 0);

    let s = ctx.open_session(&COUNTER_UUID, ConnectionMethod::Public, 0, Some(&op))?;
    assert_eq!(guard.live_ids(), (0, 1));

    s.close_session();
    ctx.finalize_context();

    Ok(())
}
