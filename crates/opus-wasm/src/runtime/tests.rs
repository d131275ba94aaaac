//! Tests for the sandbox runtime.

use super::pool::InstancePool;
use super::*;
use crate::config::{RuntimeConfig, WasiCapabilities};
use crate::error::OpusError;

const MOCK_OPUS: &str = include_str!("../../tests/fixtures/mock_opus.wat");

fn compile(config: &RuntimeConfig) -> SandboxModule {
    SandboxModule::compile(MOCK_OPUS.as_bytes(), config).expect("mock module should compile")
}

#[test]
fn test_runtime_config_default() {
    let config = RuntimeConfig::default();
    assert_eq!(config.max_memory, 64 * 1024 * 1024);
    assert!(config.enable_simd);
    assert!(config.fuel_limit.is_none());
    assert_eq!(config.pool_size, 4);
    assert!(config.validate().is_ok());
}

#[test]
fn test_runtime_config_minimal() {
    let config = RuntimeConfig::minimal();
    assert_eq!(config.max_memory, 16 * 1024 * 1024);
    assert!(config.fuel_limit.is_some());
    assert_eq!(config.pool_size, 1);
}

#[test]
fn test_runtime_config_realtime() {
    let config = RuntimeConfig::realtime();
    assert_eq!(config.optimization_level, 3);
    assert!((1..=16).contains(&config.pool_size));
}

#[test]
fn test_wasi_capabilities_none() {
    let caps = WasiCapabilities::none();
    assert!(!caps.stdout);
    assert!(!caps.stderr);
    assert!(caps.env_vars.is_empty());
}

#[test]
fn test_wasi_capabilities_builder() {
    let caps = WasiCapabilities::none()
        .stdout(true)
        .env("OPUS_TRACE", "1");

    assert!(caps.stdout);
    assert!(!caps.stderr);
    assert_eq!(caps.env_vars, vec![("OPUS_TRACE".to_string(), "1".to_string())]);
    assert!(WasiCapabilities::with_stdio().stdout(false).stderr);
}

#[test]
fn test_runtime_config_builder_chain() {
    let config = RuntimeConfig::default()
        .max_memory(32 * 1024 * 1024)
        .fuel_limit(1_000_000)
        .simd(false)
        .optimize(7)
        .pool_size(2)
        .cache("/tmp/wasmtime-cache.toml");

    assert_eq!(config.max_memory, 32 * 1024 * 1024);
    assert_eq!(config.fuel_limit, Some(1_000_000));
    assert!(!config.enable_simd);
    assert_eq!(config.optimization_level, 3);
    assert_eq!(config.pool_size, 2);
    assert!(config.cache_path.is_some());
}

#[test]
fn test_runtime_config_from_json() {
    let config = RuntimeConfig::from_json(r#"{ "pool_size": 2, "fuel_limit": 5000 }"#).unwrap();
    assert_eq!(config.pool_size, 2);
    assert_eq!(config.fuel_limit, Some(5000));
    assert_eq!(config.max_memory, RuntimeConfig::default().max_memory);

    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(RuntimeConfig::from_json(&json).unwrap(), config);
}

#[test]
fn test_runtime_config_validation() {
    let err = RuntimeConfig::from_json(r#"{ "pool_size": 0 }"#).unwrap_err();
    assert!(matches!(err, OpusError::Config(_)));

    assert!(RuntimeConfig::default().fuel_limit(0).validate().is_err());
    assert!(matches!(
        RuntimeConfig::from_json("{ not json"),
        Err(OpusError::Config(_))
    ));
}

#[test]
fn test_module_exports_complete() {
    let module = compile(&RuntimeConfig::default());
    assert!(module.missing_exports().is_empty());

    let exports: Vec<&str> = module.exports().collect();
    assert_eq!(exports.len(), Entry::ALL.len());
    assert!(exports.contains(&"opus_encode_float"));
    assert!(exports.contains(&"get_opus_application_restricted_lowdelay_address"));
}

#[test]
fn test_compile_rejects_garbage() {
    let err = SandboxModule::compile(b"\0asm-not-really", &RuntimeConfig::default())
        .err()
        .expect("garbage should not compile");
    assert!(matches!(err, OpusError::Compile(_)));
}

#[test]
fn test_constants_and_strings() {
    let module = compile(&RuntimeConfig::default());
    let mut instance = module.instantiate(0).unwrap();

    let constants = OpusConstants::load(&mut instance).unwrap();
    assert_eq!(constants.ok, 0);
    assert_eq!(constants.invalid_packet, -4);
    assert_eq!(constants.bandwidth_superwideband, 1104);
    assert_eq!(constants.auto, -1000);
    assert_eq!(constants.application_restricted_lowdelay, 2051);

    let ptr = instance.call(Entry::VersionString, &[]).unwrap();
    assert_eq!(instance.read_c_string(ptr as u32).unwrap(), "libopus 1.5.2-mock");

    let ptr = instance.call(Entry::Strerror, &[-1]).unwrap();
    assert_eq!(instance.read_c_string(ptr as u32).unwrap(), "invalid argument");
}

#[test]
fn test_scratch_frees_on_error() {
    let module = compile(&RuntimeConfig::default());
    let mut instance = module.instantiate(0).unwrap();

    let result: crate::Result<()> = instance.scratch(|scratch| {
        scratch.alloc(16)?;
        scratch.write(b"frame")?;
        Err(OpusError::Protocol("abandoned".to_string()))
    });

    assert!(result.is_err());
    assert_eq!(instance.live_allocations(), 0);
}

#[test]
fn test_memory_access_checks() {
    let module = compile(&RuntimeConfig::default());
    let mut instance = module.instantiate(0).unwrap();

    let ptr = instance.write_bytes(b"opus").unwrap();
    assert_eq!(instance.read_bytes(ptr, 4).unwrap(), b"opus");
    instance.free(ptr).unwrap();

    let size = instance.memory_size() as u32;
    assert!(matches!(
        instance.read_bytes(size - 2, 8),
        Err(OpusError::OutOfBounds { len: 8, .. })
    ));
    assert!(matches!(instance.free(ptr), Err(OpusError::Protocol(_))));
    assert!(instance.free(0).is_ok());
}

#[test]
fn test_call_timed_reports_fuel() {
    let config = RuntimeConfig::default().fuel_limit(10_000);
    let module = compile(&config);
    let mut instance = module.instantiate(0).unwrap();

    let result = instance.call_timed(Entry::VersionString, &[]).unwrap();
    assert_eq!(result.value, 2400);
    assert!(result.fuel_consumed.is_some());

    let mut unmetered = compile(&RuntimeConfig::default()).instantiate(0).unwrap();
    let result = unmetered.call_timed(Entry::ConstOk, &[]).unwrap();
    assert_eq!(result.value, 1024);
    assert!(result.fuel_consumed.is_none());
}

#[test]
fn test_pool_lazy_slots() {
    let module = compile(&RuntimeConfig::default());
    let pool = InstancePool::new(3);

    assert_eq!(pool.assign(), 0);
    assert_eq!(pool.assign(), 1);
    assert_eq!(pool.assign(), 2);
    assert_eq!(pool.load(), vec![1, 1, 1]);
    pool.unassign(1);
    assert_eq!(pool.assign(), 1);

    // Nothing instantiated yet
    assert!(pool.try_checkout_ready().is_none());

    let guard = pool.checkout(2, &module).unwrap();
    assert_eq!(guard.slot(), 2);
    assert!(pool.try_checkout_ready().is_none());
    drop(guard);

    assert_eq!(pool.try_checkout_ready().map(|g| g.slot()), Some(2));
    assert!(matches!(pool.checkout(7, &module), Err(OpusError::Protocol(_))));

    pool.close(std::time::Duration::ZERO);
    assert!(matches!(pool.checkout(0, &module), Err(OpusError::ContextClosed)));
    assert!(matches!(pool.checkout_any(&module), Err(OpusError::ContextClosed)));
}
