#![allow(unused)]

use std::{
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, LevelFilter};
use simplelog::SimpleLogger;

use otee::{
    proto::Request,
    transport::{Completion, LocalTransport, Transport},
    Context,
};
use otee_core::Guard;
use otee_sim::{default_engine, SimEngine, DEFAULT_TEE_NAME};

pub type SimGuard = Arc<Guard<SimEngine>>;

/// Setup logging from the `LOG_LEVEL` environment variable
pub fn setup_logging() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("otee")
        .build();

    let _ = SimpleLogger::init(log_level, log_cfg);
}

/// Setup a broker over the simulated engine with sample applications
pub fn setup() -> SimGuard {
    setup_logging();

    Arc::new(Guard::new(default_engine(DEFAULT_TEE_NAME)))
}

/// Create and initialise a context attached to the provided broker
pub fn context(guard: &SimGuard) -> anyhow::Result<Context> {
    let ctx = Context::local(guard.clone());
    ctx.initialize_context(None)?;
    Ok(ctx)
}

/// Create and initialise a context with submissions counted
pub fn counted_context(guard: &SimGuard) -> anyhow::Result<(Context, Arc<AtomicUsize>)> {
    let count = Arc::new(AtomicUsize::new(0));

    let ctx = Context::new(Counting {
        inner: LocalTransport::new(guard.clone()),
        count: count.clone(),
    });
    ctx.initialize_context(None)?;

    Ok((ctx, count))
}

/// Transport wrapper counting submitted requests
pub struct Counting<T: Transport> {
    pub inner: T,
    pub count: Arc<AtomicUsize>,
}

impl<T: Transport> Transport for Counting<T> {
    fn submit(&self, request: Request, completion: Completion) {
        debug!("Submit {}", request.command());
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.submit(request, completion)
    }

    fn close(&self) {
        self.inner.close()
    }
}

/// Transport wrapper replacing the operation returned by the next
/// successful open session with malformed bytes
pub struct Garbling<T: Transport> {
    pub inner: T,
    pub armed: AtomicBool,
}

impl<T: Transport> Transport for Garbling<T> {
    fn submit(&self, request: Request, completion: Completion) {
        let garble = matches!(request, Request::OpenSession { .. })
            && self.armed.swap(false, Ordering::SeqCst);

        self.inner.submit(
            request,
            Box::new(move |r| {
                completion(r.map(|mut r| {
                    if garble && r.code.is_success() {
                        r.operation = Some(vec![0xff, 0x00]);
                    }
                    r
                }))
            }),
        )
    }

    fn close(&self) {
        self.inner.close()
    }
}

/// Fresh socket path for broker tests
pub fn socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("otee-test-{}.sock", rand::random::<u32>()))
}

/// Poll until the condition holds or the timeout elapses
pub fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();

    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    f()
}
