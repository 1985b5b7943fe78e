//! Whole-pipeline scenarios driven by the synthetic stream.

use isoc_pipeline::analysis::AgcMode;
use isoc_pipeline::capture::{
    Camera, CameraControls, FileConfig, SoftwareControls, SyntheticConfig, SyntheticStream,
};
use isoc_pipeline::{GenericCamera, Pipeline};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 16x16 Bayer images over 27-byte micro-frames: one image every 10 good frames.
fn synthetic(frames_per_transfer: usize) -> SyntheticConfig {
    SyntheticConfig {
        width: 16,
        height: 16,
        bytes_per_frame: 27,
        frames_per_transfer,
        error_rate: 0.0,
        ..Default::default()
    }
}

fn config_for(stream: &SyntheticStream) -> FileConfig {
    let mut config = FileConfig::default();
    config.pipeline.format = stream.format();
    config.pipeline.decode_timeout_ms = 10;
    config.pipeline.image_queue_depth = 16;
    config
}

fn collect(camera: &mut GenericCamera, want: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut got = 0;
    while got < want && Instant::now() < deadline {
        if camera.get_frame(Duration::from_millis(20)).is_some() {
            got += 1;
        }
    }
    got
}

#[test]
fn test_hundred_frames_with_errors() {
    let controls: Arc<dyn CameraControls> = Arc::new(SoftwareControls::new());
    let mut stream = SyntheticStream::new(synthetic(1), 11, Arc::clone(&controls));
    assert_eq!(stream.frames_per_image(), 10);

    let (mut pipeline, mut assembler) = Pipeline::start(
        &config_for(&stream),
        Arc::new(stream.scanner()),
        controls,
        None,
    )
    .unwrap();

    for i in 0..100 {
        if i == 37 || i == 71 {
            stream.force_error();
        }
        assembler.process_batch(&stream.next_batch());
    }
    assert_eq!(stream.stats().frames, 100);
    assert_eq!(stream.stats().error_frames, 2);

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut decoded = Vec::new();
    while decoded.len() < 9 && Instant::now() < deadline {
        if let Some(image) = pipeline.recv_image(Duration::from_millis(20)) {
            decoded.push(image);
        }
    }

    assert!(decoded.len() >= 9, "only {} images decoded", decoded.len());
    let sequences: Vec<u64> = decoded.iter().map(|d| d.sequence).collect();
    assert_eq!(sequences, (1..=9).collect::<Vec<_>>());
    for image in &decoded {
        assert_eq!(image.image.dimensions(), (16, 16));
        assert!(image.average_luminance.is_some());
    }

    let counters = pipeline.counters();
    assert_eq!(counters.frames_received, 100);
    assert_eq!(counters.frames_invalid, 2);
    assert_eq!(counters.chunks_completed, 9);
    assert_eq!(counters.decode_failures, 0);
    assert_eq!(pipeline.take_error(), None);

    drop(assembler);
    pipeline.stop();
    let pool = pipeline.pool_counts();
    assert_eq!(pool.empty + pool.full, 9);
}

#[test]
fn test_threaded_capture_context() {
    let controls: Arc<dyn CameraControls> = Arc::new(SoftwareControls::new());
    let mut stream = SyntheticStream::new(synthetic(5), 5, Arc::clone(&controls));
    let mut camera = GenericCamera::new(
        config_for(&stream),
        Arc::new(stream.scanner()),
        Arc::clone(&controls),
    );
    let mut assembler = camera.start_stream().unwrap();

    let producer = thread::spawn(move || {
        for batch in 0..20 {
            if batch == 7 || batch == 14 {
                stream.force_error();
            }
            assembler.process_batch(&stream.next_batch());
            thread::sleep(Duration::from_millis(1));
        }
        (stream.stats(), assembler)
    });

    let received = collect(&mut camera, 9);
    let (stats, assembler) = producer.join().unwrap();

    assert_eq!(stats.frames, 100);
    assert_eq!(stats.error_frames, 2);
    assert!(received >= 9, "only {received} images received");
    assert!(camera.take_stream_error().is_none());

    drop(assembler);
    camera.stop_stream();
    assert!(!camera.is_streaming());
}

#[test]
fn test_auto_gain_darkens_bright_scene() {
    let controls: Arc<dyn CameraControls> = Arc::new(SoftwareControls::new());
    let mut stream = SyntheticStream::new(
        SyntheticConfig {
            noise: 0,
            ..synthetic(10)
        },
        3,
        Arc::clone(&controls),
    );
    let mut config = config_for(&stream);
    config.agc.mode = AgcMode::Histogram;
    config.agc.target = 60;
    config.agc.delta = 4;
    config.agc.fast_update_ms = 0;
    config.agc.slow_update_ms = 0;
    config.histogram.sample_stride = 1;

    let mut camera = GenericCamera::new(config, Arc::new(stream.scanner()), Arc::clone(&controls));
    let mut assembler = camera.start_stream().unwrap();

    let mut luminance = Vec::new();
    for _ in 0..40 {
        assembler.process_batch(&stream.next_batch());
        if let Some(image) = camera.get_frame(Duration::from_millis(200)) {
            luminance.extend(image.average_luminance);
        }
    }

    assert!(controls.gain() < 0.5, "gain stayed at {}", controls.gain());
    let first = luminance.first().copied().unwrap_or(0);
    let last = luminance.last().copied().unwrap_or(255);
    assert!(last < first, "luminance went from {first} to {last}");

    drop(assembler);
    camera.stop_stream();
}
