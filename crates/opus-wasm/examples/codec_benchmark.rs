//! Sandboxed codec benchmarks
//!
//! Run with: cargo run -p opus-wasm --example codec_benchmark --release [-- path/to/opus.wasm]
//!
//! Without an argument the mock module from the test fixtures is used, which
//! measures bridge overhead rather than real codec cost.

use opus_wasm::runtime::Entry;
use opus_wasm::{Application, CodecContext, Decoder, Encoder, RuntimeConfig};
use std::thread;
use std::time::Instant;

const MOCK_OPUS: &str = include_str!("../tests/fixtures/mock_opus.wat");

fn main() {
    let wasm = match std::env::args().nth(1) {
        Some(path) => std::fs::read(&path).unwrap_or_else(|e| panic!("reading {}: {}", path, e)),
        None => MOCK_OPUS.as_bytes().to_vec(),
    };

    println!("=== Sandboxed Opus Benchmarks ===\n");

    bench_startup(&wasm);
    bench_handle_creation(&wasm);
    bench_call_overhead(&wasm);
    bench_encode_decode(&wasm);
    bench_with_fuel_metering(&wasm);
    bench_pool_scaling(&wasm);

    println!("\n=== Benchmark Complete ===");
}

fn bench_startup(wasm: &[u8]) {
    println!("## Context Startup");

    let mut times = Vec::new();
    for _ in 0..20 {
        let start = Instant::now();
        let ctx = CodecContext::open(wasm.to_vec(), RuntimeConfig::default()).unwrap();
        times.push(start.elapsed().as_micros() as u64);
        ctx.close();
    }

    print_stats("open", &times);
    println!();
}

fn bench_handle_creation(wasm: &[u8]) {
    println!("## Handle Creation");

    let ctx = CodecContext::open(wasm.to_vec(), RuntimeConfig::default().pool_size(1)).unwrap();
    let mut times = Vec::new();

    for _ in 0..1_000 {
        let start = Instant::now();
        let mut encoder = Encoder::new(&ctx, 48_000, 2, Application::Audio).unwrap();
        encoder.release().unwrap();
        times.push(start.elapsed().as_micros() as u64);
    }

    print_stats("encoder new+release", &times);
    println!();
}

fn bench_call_overhead(wasm: &[u8]) {
    println!("## Raw Call Overhead");

    let ctx = CodecContext::open(wasm.to_vec(), RuntimeConfig::default().pool_size(1)).unwrap();
    let mut lease = ctx.acquire().unwrap();

    let mut times = Vec::new();
    for _ in 0..10_000 {
        let result = lease.call_timed(Entry::VersionString, &[]).unwrap();
        times.push(result.execution_time_us);
    }
    print_stats("opus_get_version_string", &times);

    let mut times = Vec::new();
    for _ in 0..10_000 {
        let start = Instant::now();
        let ptr = lease.alloc(1920).unwrap();
        lease.free(ptr).unwrap();
        times.push(start.elapsed().as_micros() as u64);
    }
    print_stats("malloc+free 1920B", &times);
    println!();
}

fn bench_encode_decode(wasm: &[u8]) {
    println!("## Encode / Decode (48 kHz stereo, 20 ms)");

    let ctx = CodecContext::open(wasm.to_vec(), RuntimeConfig::realtime()).unwrap();
    let mut encoder = Encoder::new(&ctx, 48_000, 2, Application::Audio).unwrap();
    let mut decoder = Decoder::new(&ctx, 48_000, 2).unwrap();

    let pcm: Vec<i16> = (0..1920)
        .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
        .collect();
    let mut out = vec![0i16; 1920];

    let mut encode_times = Vec::new();
    let mut decode_times = Vec::new();
    for _ in 0..1_000 {
        let start = Instant::now();
        let packet = encoder.encode_to_vec(&pcm).unwrap();
        encode_times.push(start.elapsed().as_micros() as u64);

        let start = Instant::now();
        decoder.decode(&packet, &mut out).unwrap();
        decode_times.push(start.elapsed().as_micros() as u64);
    }

    print_stats("encode", &encode_times);
    print_stats("decode", &decode_times);

    let pcm: Vec<f32> = pcm.iter().map(|&s| f32::from(s) / 32768.0).collect();
    let mut times = Vec::new();
    for _ in 0..1_000 {
        let start = Instant::now();
        encoder.encode_float_to_vec(&pcm).unwrap();
        times.push(start.elapsed().as_micros() as u64);
    }
    print_stats("encode_float", &times);
    println!();
}

fn bench_with_fuel_metering(wasm: &[u8]) {
    println!("## Fuel Metering Overhead");

    let ctx = CodecContext::open(
        wasm.to_vec(),
        RuntimeConfig::default().pool_size(1).fuel_limit(1_000_000_000),
    )
    .unwrap();
    let mut encoder = Encoder::new(&ctx, 48_000, 2, Application::Audio).unwrap();
    let pcm = vec![0i16; 1920];

    let mut times = Vec::new();
    for _ in 0..1_000 {
        let start = Instant::now();
        encoder.encode_to_vec(&pcm).unwrap();
        times.push(start.elapsed().as_micros() as u64);
    }
    print_stats("encode (metered)", &times);

    let mut lease = ctx.acquire().unwrap();
    let result = lease.call_timed(Entry::EncoderGetSize, &[2]).unwrap();
    println!("  opus_encoder_get_size fuel: {:?}", result.fuel_consumed);
    println!();
}

fn bench_pool_scaling(wasm: &[u8]) {
    println!("## Pool Scaling (8 threads x 500 frames)");

    for pool_size in [1, 2, 4, 8] {
        let ctx =
            CodecContext::open(wasm.to_vec(), RuntimeConfig::default().pool_size(pool_size)).unwrap();

        let start = Instant::now();
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let ctx = ctx.clone();
                thread::spawn(move || {
                    let mut encoder = Encoder::new(&ctx, 48_000, 2, Application::Audio).unwrap();
                    let pcm = vec![0i16; 1920];
                    for _ in 0..500 {
                        encoder.encode_to_vec(&pcm).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        println!("  pool_size={}: {:?}", pool_size, start.elapsed());
    }
    println!();
}

fn print_stats(name: &str, times: &[u64]) {
    if times.is_empty() {
        println!("  {}: no samples", name);
        return;
    }

    let mut sorted = times.to_vec();
    sorted.sort();

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let mean = times.iter().sum::<u64>() as f64 / times.len() as f64;
    let p50 = sorted[sorted.len() / 2];
    let p99 = sorted[(sorted.len() * 99) / 100];

    println!("  {}: n={} min={}us mean={:.1}us p50={}us p99={}us max={}us",
             name, times.len(), min, mean, p50, p99, max);
}
