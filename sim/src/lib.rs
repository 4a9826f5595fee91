// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Simulated trusted engine for broker and client development.
//!
//! Provides a [SimEngine] implementing [otee_core::Connector] with a small
//! set of in-process trusted applications (see [apps]), for use with the
//! `otee-sim` daemon or directly in tests.

use clap::Parser;

use otee_core::GuardConfig;

mod cancel;
pub use cancel::Cancellation;

mod engine;
pub use engine::{SimEngine, TaSession, TrustedApp};

pub mod apps;

/// Default engine name
pub const DEFAULT_TEE_NAME: &str = "otee-sim";

/// Simulator options
#[derive(Clone, Debug, PartialEq, Parser)]
pub struct SimOptions {
    /// Engine name reported to (and matched against) clients
    #[clap(long, default_value = DEFAULT_TEE_NAME)]
    pub tee_name: String,

    /// Size of the global id space for memory blocks and sessions
    #[clap(long, default_value = "500000")]
    pub id_space: u32,

    /// Random probes before falling back to an id sweep
    #[clap(long, default_value = "64")]
    pub id_retries: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            tee_name: DEFAULT_TEE_NAME.to_string(),
            id_space: 500_000,
            id_retries: 64,
        }
    }
}

impl SimOptions {
    /// Broker configuration for these options
    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            id_space: self.id_space,
            id_retries: self.id_retries,
        }
    }
}

/// Create an engine with the sample applications registered
pub fn default_engine(name: &str) -> SimEngine {
    SimEngine::new(name)
        .with_app(apps::ECHO_UUID, apps::EchoApp)
        .with_app(apps::COUNTER_UUID, apps::CounterApp)
}
