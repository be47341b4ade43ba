//! Decoder backend tests against real WAV fixtures
//!
//! Fixtures are generated with hound into a temp directory; the backend
//! must decode them at the output format, map channel layouts, resample
//! across rates, and seek frame-accurately.

use cadenza_player::decode::{DecoderBackend, OutputSpec, SymphoniaBackend};
use cadenza_common::Track;
use std::path::{Path, PathBuf};

const OUT_SPEC: OutputSpec = OutputSpec {
    sample_rate: 44100,
    channels: 2,
};

/// Write a WAV of `frames` frames where every sample of frame `i` is
/// `value(i)`, as 16-bit PCM.
fn write_wav(
    dir: &Path,
    name: &str,
    rate: u32,
    channels: u16,
    frames: usize,
    value: impl Fn(usize) -> i16,
) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..frames {
        for _ in 0..channels {
            writer.write_sample(value(i)).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

fn read_all(stream: &mut dyn cadenza_player::decode::DecodeStream) -> Vec<f32> {
    let mut all = Vec::new();
    loop {
        let block = stream.read_frames(1024).unwrap();
        if block.is_empty() {
            break;
        }
        all.extend_from_slice(&block.samples);
    }
    all
}

#[test]
fn decodes_stereo_wav_at_output_rate() {
    let dir = tempfile::tempdir().unwrap();
    // constant 8192/32768 = 0.25
    let path = write_wav(dir.path(), "tone.wav", 44100, 2, 4410, |_| 8192);
    let track = Track::new(path, 44100, 2);

    let backend = SymphoniaBackend::new(OUT_SPEC);
    let mut stream = backend.open(&track).unwrap();

    assert_eq!(stream.duration_frames(), Some(4410));
    let samples = read_all(stream.as_mut());
    assert_eq!(samples.len(), 4410 * 2);
    for &s in &samples {
        assert!((s - 0.25).abs() < 1e-3, "sample {}", s);
    }
}

#[test]
fn mono_source_is_duplicated_to_stereo() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "mono.wav", 44100, 1, 1000, |_| 8192);
    let track = Track::new(path, 44100, 1);

    let backend = SymphoniaBackend::new(OUT_SPEC);
    let mut stream = backend.open(&track).unwrap();
    let samples = read_all(stream.as_mut());

    assert_eq!(samples.len(), 1000 * 2);
    for frame in samples.chunks_exact(2) {
        assert!((frame[0] - frame[1]).abs() < 1e-6, "channels identical");
        assert!((frame[0] - 0.25).abs() < 1e-3);
    }
}

#[test]
fn resamples_22050_to_44100() {
    let dir = tempfile::tempdir().unwrap();
    let src_frames = 22050; // one second
    let path = write_wav(dir.path(), "low.wav", 22050, 2, src_frames, |_| 8192);
    let track = Track::new(path, 22050, 2);

    let backend = SymphoniaBackend::new(OUT_SPEC);
    let mut stream = backend.open(&track).unwrap();

    assert_eq!(stream.duration_frames(), Some(44100));
    let samples = read_all(stream.as_mut());
    let frames = samples.len() / 2;
    // the flush of the final partial chunk makes the count approximate
    assert!(
        (frames as i64 - 44100).abs() < 2048,
        "got {} frames",
        frames
    );
    // steady-state samples keep the DC level
    let mid = &samples[samples.len() / 4..samples.len() / 2];
    for &s in mid {
        assert!((s - 0.25).abs() < 2e-2, "sample {}", s);
    }
}

#[test]
fn seek_lands_on_the_requested_frame() {
    let dir = tempfile::tempdir().unwrap();
    // first half 0.25, second half -0.25
    let path = write_wav(dir.path(), "halves.wav", 44100, 2, 44100, |i| {
        if i < 22050 {
            8192
        } else {
            -8192
        }
    });
    let track = Track::new(path, 44100, 2);

    let backend = SymphoniaBackend::new(OUT_SPEC);
    let mut stream = backend.open(&track).unwrap();

    stream.seek(22050).unwrap();
    let block = stream.read_frames(256).unwrap();
    assert_eq!(block.frames(2), 256);
    for &s in &block.samples {
        assert!((s + 0.25).abs() < 1e-3, "sample {} after seek", s);
    }

    // seeking back re-reads the first half
    stream.seek(0).unwrap();
    let block = stream.read_frames(256).unwrap();
    for &s in &block.samples {
        assert!((s - 0.25).abs() < 1e-3, "sample {} after rewind", s);
    }
}

#[test]
fn missing_file_is_a_decode_error() {
    let track = Track::new("/nonexistent/file.flac", 44100, 2);
    let backend = SymphoniaBackend::new(OUT_SPEC);
    assert!(backend.open(&track).is_err());
}
