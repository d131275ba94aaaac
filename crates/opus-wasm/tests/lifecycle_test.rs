//! Context and handle lifecycle against the mock codec module.

mod common;

use std::thread;

use common::{context, context_with, init_tracing, MOCK_OPUS};
use opus_wasm::codec::SAMPLE_RATES;
use opus_wasm::runtime::Entry;
use opus_wasm::{Application, CodecContext, Decoder, Encoder, ErrorKind, OpusError, RuntimeConfig};

#[test]
fn test_construct_and_release_every_configuration() {
    let ctx = context();

    for &rate in &SAMPLE_RATES {
        for channels in 1..=2 {
            let mut encoder = Encoder::new(&ctx, rate, channels, Application::Voip)
                .unwrap_or_else(|e| panic!("encoder {}Hz/{}ch: {}", rate, channels, e));
            let mut decoder = Decoder::new(&ctx, rate, channels)
                .unwrap_or_else(|e| panic!("decoder {}Hz/{}ch: {}", rate, channels, e));

            assert_eq!(encoder.channels(), channels);
            assert_eq!(encoder.sample_rate(), rate);
            assert_eq!(encoder.queried_sample_rate().unwrap(), rate);
            assert_eq!(decoder.sample_rate(), rate);

            encoder.release().expect("encoder release failed");
            decoder.release().expect("decoder release failed");
        }
    }

    assert!(ctx.slot_load().iter().all(|&n| n == 0));

    // Still usable afterwards
    let encoder = Encoder::new(&ctx, 48_000, 2, Application::Audio).expect("context not reusable");
    assert!(!encoder.is_released());
}

#[test]
fn test_release_is_idempotent() {
    let ctx = context_with(RuntimeConfig::default().pool_size(1));
    let mut encoder = Encoder::new(&ctx, 48_000, 1, Application::Voip).unwrap();

    encoder.release().expect("first release failed");
    encoder.release().expect("second release failed");
    assert!(encoder.is_released());

    let err = encoder.encode(&[0i16; 960], &mut [0u8; 64]).unwrap_err();
    assert!(matches!(err, OpusError::Released));
    assert!(err.is_caller_input());

    drop(encoder);
    assert_eq!(ctx.acquire().unwrap().live_allocations(), 0);
}

#[test]
fn test_drop_releases_state() {
    let ctx = context_with(RuntimeConfig::default().pool_size(1));
    {
        let _encoder = Encoder::new(&ctx, 16_000, 2, Application::Audio).unwrap();
        let _decoder = Decoder::new(&ctx, 16_000, 2).unwrap();
        assert_eq!(ctx.slot_load(), vec![2]);
        assert_eq!(ctx.acquire().unwrap().live_allocations(), 2);
    }
    assert_eq!(ctx.slot_load(), vec![0]);
    assert_eq!(ctx.acquire().unwrap().live_allocations(), 0);
}

#[test]
fn test_invalid_channels_rejected_before_sandbox() {
    let ctx = context();

    for channels in [0, 3, 8] {
        let err = Encoder::new(&ctx, 48_000, channels, Application::Voip).unwrap_err();
        assert!(matches!(err, OpusError::InvalidArgument(_)), "got {:?}", err);
        let err = Decoder::new(&ctx, 48_000, channels).unwrap_err();
        assert!(err.is_caller_input());
    }
    assert!(ctx.slot_load().iter().all(|&n| n == 0));
}

#[test]
fn test_bad_sample_rate_is_codec_error() {
    let ctx = context_with(RuntimeConfig::default().pool_size(1));

    let err = Encoder::new(&ctx, 44_100, 2, Application::Audio).unwrap_err();
    assert_eq!(err.codec_kind(), Some(ErrorKind::BadArg));
    assert!(err.is_codec());
    assert_eq!(err.to_string(), "opus: invalid argument");

    match &err {
        OpusError::Codec(codec) => {
            assert_eq!(codec.code(), ctx.constants().unwrap().bad_arg);
            assert_eq!(codec.message(), "invalid argument");
        }
        other => panic!("expected codec error, got {:?}", other),
    }

    // The state block was freed and the binding dropped
    assert_eq!(ctx.slot_load(), vec![0]);
    assert_eq!(ctx.acquire().unwrap().live_allocations(), 0);
}

#[test]
fn test_close_fails_later_operations() {
    let ctx = context();
    let mut encoder = Encoder::new(&ctx, 48_000, 1, Application::Voip).unwrap();
    let mut decoder = Decoder::new(&ctx, 48_000, 1).unwrap();

    ctx.close();
    ctx.close();
    assert!(ctx.is_closed());

    let err = encoder.encode_to_vec(&[0i16; 960]).unwrap_err();
    assert!(matches!(err, OpusError::ContextClosed));
    assert!(err.is_bridge());
    assert!(matches!(decoder.decode_plc(&mut [0i16; 960]), Err(OpusError::ContextClosed)));
    assert!(matches!(encoder.bitrate(), Err(OpusError::ContextClosed)));

    assert!(matches!(
        Encoder::new(&ctx, 48_000, 1, Application::Voip),
        Err(OpusError::ContextClosed)
    ));
    assert!(matches!(ctx.acquire(), Err(OpusError::ContextClosed)));
    assert!(matches!(ctx.describe(-1), Err(OpusError::ContextClosed)));

    // Releasing after close is still fine
    encoder.release().expect("release after close failed");
    decoder.release().expect("release after close failed");
}

#[test]
fn test_lazy_startup() {
    init_tracing();
    let ctx = CodecContext::new(MOCK_OPUS, RuntimeConfig::default());
    assert!(format!("{:?}", ctx).contains("pending"));
    assert!(ctx.slot_load().is_empty());

    assert_eq!(ctx.version().unwrap(), "libopus 1.5.2-mock");
    assert!(format!("{:?}", ctx).contains("ready"));
    assert_eq!(ctx.slot_load().len(), ctx.pool_size());

    ctx.init().expect("init is idempotent");
}

#[test]
fn test_missing_exports_reported_together() {
    init_tracing();
    let wat = r#"
        (module
          (memory (export "memory") 1)
          (func (export "malloc") (param i32) (result i32) (i32.const 0))
          (func (export "free") (param i32) (result i32) (i32.const 0)))
    "#;

    let err = CodecContext::open(wat, RuntimeConfig::default()).unwrap_err();
    let missing = match &err {
        OpusError::MissingExports(missing) => missing.clone(),
        other => panic!("expected missing exports, got {:?}", other),
    };

    assert_eq!(missing.len(), Entry::ALL.len() - 1);
    assert!(missing.contains(&"free (signature mismatch)".to_string()));
    assert!(missing.contains(&"opus_encode".to_string()));
    assert!(missing.contains(&"get_opus_auto_address".to_string()));
    assert!(!missing.iter().any(|m| m.starts_with("malloc")));
    assert!(err.is_bridge());
}

#[test]
fn test_startup_failure_is_replayed() {
    init_tracing();
    let ctx = CodecContext::new(b"definitely not wasm".to_vec(), RuntimeConfig::default());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = ctx.clone();
            thread::spawn(move || ctx.init().unwrap_err().to_string())
        })
        .collect();
    let messages: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(messages.iter().all(|m| m == &messages[0]));
    assert!(messages[0].starts_with("module compilation failed"));

    let later = ctx.version().unwrap_err();
    assert!(matches!(later, OpusError::Compile(_)));
    assert_eq!(later.to_string(), messages[0]);
    assert!(format!("{:?}", ctx).contains("failed"));
}

#[test]
fn test_invalid_config_rejected() {
    init_tracing();
    let err = CodecContext::open(MOCK_OPUS, RuntimeConfig::default().pool_size(0)).unwrap_err();
    assert!(matches!(err, OpusError::Config(_)));
}

#[test]
fn test_trap_only_fails_the_call() {
    let ctx = context_with(RuntimeConfig::default().pool_size(1));

    {
        let mut lease = ctx.acquire().unwrap();
        let err = lease.call(Entry::EncoderGetSize, &[99]).unwrap_err();
        match err {
            OpusError::Trap { entry, .. } => assert_eq!(entry, "opus_encoder_get_size"),
            other => panic!("expected trap, got {:?}", other),
        }
        assert_eq!(lease.call(Entry::EncoderGetSize, &[2]).unwrap(), 64);
    }

    let mut encoder = Encoder::new(&ctx, 48_000, 2, Application::Audio).unwrap();
    assert_eq!(encoder.encode_to_vec(&[0i16; 1920]).unwrap().len(), 5);
}

#[test]
fn test_raw_lease_contract() {
    let ctx = context();
    let mut lease = ctx.acquire().unwrap();

    assert!(matches!(lease.call(Entry::Malloc, &[]), Err(OpusError::Protocol(_))));
    assert!(matches!(lease.free(0x1234), Err(OpusError::Protocol(_))));
    assert!(lease.free(0).is_ok());

    let ptr = lease.write_bytes(&[1, 2, 3]).unwrap();
    assert_eq!(lease.read_bytes(ptr, 3).unwrap(), vec![1, 2, 3]);
    lease.free(ptr).unwrap();
    assert_eq!(lease.live_allocations(), 0);

    let err = lease.check(lease.constants().invalid_packet).unwrap_err();
    assert_eq!(err.codec_kind(), Some(ErrorKind::InvalidPacket));
    assert_eq!(lease.check(12).unwrap(), 12);
}

#[test]
fn test_describe_and_constants() {
    let ctx = context();

    assert_eq!(ctx.describe(-4).unwrap(), "corrupted stream");
    assert_eq!(ctx.describe(-7).unwrap(), "memory allocation failed");
    assert_eq!(ctx.describe(-42).unwrap(), "unknown error");
    assert_eq!(ctx.describe(0).unwrap(), "success");

    let constants = ctx.constants().unwrap();
    assert_eq!(constants.bad_arg, -1);
    assert_eq!(constants.bitrate_max, -1);
    assert_eq!(constants.auto, -1000);
    assert_eq!(constants.application_voip, 2048);
    assert_eq!(constants.classify(-6), ErrorKind::InvalidState);
}

#[test]
fn test_invalid_channels_do_not_start_lazy_context() {
    init_tracing();
    let ctx = CodecContext::new(MOCK_OPUS, RuntimeConfig::default());

    for channels in [0, 3] {
        let err = Encoder::new(&ctx, 48_000, channels, Application::Voip).unwrap_err();
        assert!(matches!(err, OpusError::InvalidArgument(_)), "got {:?}", err);
        let err = Decoder::new(&ctx, 48_000, channels).unwrap_err();
        assert!(matches!(err, OpusError::InvalidArgument(_)), "got {:?}", err);
    }
    assert!(format!("{:?}", ctx).contains("pending"));

    // A module that would fail startup is never reached either
    let broken = CodecContext::new(b"not wasm".to_vec(), RuntimeConfig::default());
    let err = Encoder::new(&broken, 48_000, 3, Application::Audio).unwrap_err();
    assert!(err.is_caller_input(), "got {:?}", err);
    assert!(format!("{:?}", broken).contains("pending"));
}

#[test]
fn test_describe_after_close() {
    let ctx = context();
    assert_eq!(ctx.describe(-4).unwrap(), "corrupted stream");

    ctx.close();
    assert!(matches!(ctx.describe(-4), Err(OpusError::ContextClosed)));
}

#[test]
fn test_release_while_holding_lease() {
    let ctx = context_with(RuntimeConfig::default().pool_size(1));
    let mut encoder = Encoder::new(&ctx, 48_000, 1, Application::Voip).unwrap();

    {
        let _lease = ctx.acquire().unwrap();
        let err = encoder.release().unwrap_err();
        assert!(matches!(err, OpusError::SlotBusy { slot: 0 }), "got {:?}", err);
        assert!(err.is_bridge());
    }

    // Nothing was lost, the handle still works and releases normally
    assert!(!encoder.is_released());
    assert_eq!(encoder.encode_to_vec(&[0i16; 960]).unwrap().len(), 5);
    encoder.release().unwrap();
    assert_eq!(ctx.acquire().unwrap().live_allocations(), 0);
}

#[test]
fn test_drop_and_close_while_holding_lease() {
    init_tracing();
    let ctx = context_with(RuntimeConfig::default().pool_size(1));
    let decoder = Decoder::new(&ctx, 48_000, 2).unwrap();

    let lease = ctx.acquire().unwrap();
    drop(decoder);
    // The binding is gone, the state block is left in the instance
    assert_eq!(ctx.slot_load(), vec![0]);
    assert_eq!(lease.live_allocations(), 1);

    ctx.close();
    assert!(ctx.is_closed());
    drop(lease);

    assert!(matches!(ctx.acquire(), Err(OpusError::ContextClosed)));
}
