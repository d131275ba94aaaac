//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use opus_wasm::{CodecContext, RuntimeConfig};

/// WAT build of the mock codec module.
pub const MOCK_OPUS: &str = include_str!("../fixtures/mock_opus.wat");

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("opus_wasm=debug")),
        )
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Open a context on the mock module with default settings.
pub fn context() -> CodecContext {
    context_with(RuntimeConfig::default())
}

/// Open a context on the mock module with `config`.
pub fn context_with(config: RuntimeConfig) -> CodecContext {
    init_tracing();
    CodecContext::open(MOCK_OPUS, config).expect("failed to open mock codec module")
}

/// Interleaved silent frame of `ms` milliseconds (2.5 ms passed as 2.5).
pub fn silence(sample_rate: i32, channels: usize, ms: f32) -> Vec<i16> {
    vec![0i16; frame_len(sample_rate, ms) * channels]
}

/// Samples per channel in a frame of `ms` milliseconds.
pub fn frame_len(sample_rate: i32, ms: f32) -> usize {
    (sample_rate as f32 * ms / 1000.0) as usize
}

/// Every frame duration the codec accepts.
pub const FRAME_DURATIONS_MS: [f32; 6] = [2.5, 5.0, 10.0, 20.0, 40.0, 60.0];
