use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use framecast_common::error::{FramecastError, FramecastResult};
use framecast_render_engine::frame::fnv1a_64;
use framecast_render_engine::{
    scene_renderer_factory, CancelToken, ExportSupervisor, FailureReason, FrameRenderer,
    InMemorySink, JobStatus, RenderedFrame, RendererFactory, SceneRenderer,
};
use framecast_scene_model::{ExportConfig, Layer, LayerKind, Scene};

fn load_fixture_scene() -> Scene {
    framecast_common::logging::init_test_logging();
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("fixtures")
        .join("sample.scene.json");
    Scene::load(path).expect("fixture scene should load")
}

fn small_config(threads: usize) -> ExportConfig {
    ExportConfig {
        width: 96,
        height: 54,
        fps: 30,
        length_secs: 2.0,
        threads,
        quality: 50,
        output_path: PathBuf::from("unused.mp4"),
        encoder_path: PathBuf::from("ffmpeg"),
        lookahead: None,
    }
}

fn checksums(scene: &Scene, threads: usize) -> Vec<u64> {
    let sink = InMemorySink::new();
    let capture = sink.capture();
    let report = ExportSupervisor::new(small_config(threads), scene.clone())
        .with_sink_opener(sink.into_opener())
        .run()
        .expect("config is valid");
    assert_eq!(report.status, JobStatus::Succeeded);
    capture.frames().iter().map(|f| f.checksum).collect()
}

/// Wraps another renderer and sleeps before each frame.
struct Delayed {
    inner: Box<dyn FrameRenderer>,
    delay: Box<dyn Fn(u64) -> Duration + Send>,
}

impl FrameRenderer for Delayed {
    fn render(&mut self, index: u64, config: &ExportConfig) -> FramecastResult<RenderedFrame> {
        std::thread::sleep((self.delay)(index));
        self.inner.render(index, config)
    }

    fn name(&self) -> &str {
        "delayed"
    }
}

fn delayed_factory(scene: Scene, delay: fn(u64) -> Duration) -> RendererFactory {
    Arc::new(move || {
        Box::new(Delayed {
            inner: Box::new(SceneRenderer::new(scene.clone())),
            delay: Box::new(delay),
        }) as Box<dyn FrameRenderer>
    })
}

#[test]
fn fixture_scene_exports_every_frame_in_order() {
    let sink = InMemorySink::new();
    let capture = sink.capture();
    let report = ExportSupervisor::new(small_config(4), load_fixture_scene())
        .with_sink_opener(sink.into_opener())
        .run()
        .unwrap();

    assert!(report.succeeded(), "unexpected status {:?}", report.status);
    assert_eq!(report.total_frames, 60);
    assert_eq!(report.frames_completed, 60);
    assert_eq!(capture.indices(), (0..60).collect::<Vec<_>>());
    assert!(capture.is_closed());
    assert_eq!(
        report.workers.iter().map(|w| w.frames_rendered).sum::<u64>(),
        60
    );
}

#[test]
fn output_is_identical_for_any_thread_count() {
    let scene = load_fixture_scene();
    let single = checksums(&scene, 1);
    let parallel = checksums(&scene, 4);
    assert_eq!(single.len(), 60);
    assert_eq!(single, parallel);

    let config = small_config(1);
    let mut renderer = SceneRenderer::new(scene);
    let direct: Vec<u64> = (0..60)
        .map(|index| renderer.render(index, &config).unwrap().checksum())
        .collect();
    assert_eq!(direct, single);
}

#[test]
fn cancel_during_write_stops_after_current_frame() {
    let cancel = CancelToken::new();
    let hook_cancel = cancel.clone();
    let sink = InMemorySink::new().on_write(move |index| {
        if index == 20 {
            hook_cancel.cancel();
        }
    });
    let capture = sink.capture();

    let report = ExportSupervisor::new(small_config(4), load_fixture_scene())
        .with_cancel_token(cancel)
        .with_sink_opener(sink.into_opener())
        .run()
        .unwrap();

    assert_eq!(report.status, JobStatus::Cancelled);
    assert_eq!(capture.indices(), (0..=20).collect::<Vec<_>>());
    assert_eq!(report.frames_completed, 21);
    assert!(capture.was_aborted());
    assert!(!capture.is_closed());
}

#[test]
fn cancel_from_another_thread_is_prompt() {
    let config = ExportConfig {
        length_secs: 10.0,
        threads: 2,
        ..small_config(2)
    };
    let factory = delayed_factory(load_fixture_scene(), |_| Duration::from_millis(20));
    let sink = InMemorySink::new();
    let capture = sink.capture();

    let handle = ExportSupervisor::with_renderer(config, factory)
        .with_sink_opener(sink.into_opener())
        .start()
        .unwrap();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(handle.status(), JobStatus::Running);

    let cancelled_at = Instant::now();
    assert!(handle.cancel());
    let report = handle.wait().unwrap();

    assert_eq!(report.status, JobStatus::Cancelled);
    assert!(report.frames_completed < 300);
    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    let indices = capture.indices();
    assert!(indices.iter().copied().eq(0..indices.len() as u64));
}

#[test]
fn undefined_palette_fails_job_with_render_error() {
    let mut desc = load_fixture_scene().description().clone();
    desc.layers.push(Layer {
        kind: LayerKind::Pulse { period_secs: 0.5 },
        palette: "does-not-exist".to_string(),
        opacity: 128,
        start_secs: 1.0,
        end_secs: None,
    });
    let sink = InMemorySink::new();
    let capture = sink.capture();

    let report = ExportSupervisor::new(small_config(4), Scene::new(desc))
        .with_sink_opener(sink.into_opener())
        .run()
        .unwrap();

    match &report.status {
        JobStatus::Failed {
            reason: FailureReason::Render { frame, message },
        } => {
            assert!(*frame >= 30, "frame {frame} should not fail");
            assert!(message.contains("does-not-exist"));
        }
        other => panic!("expected render failure, got {other:?}"),
    }
    let indices = capture.indices();
    assert!(indices.len() <= 30);
    assert!(indices.iter().copied().eq(0..indices.len() as u64));
    assert!(capture.was_aborted());
}

struct FailAt {
    inner: SceneRenderer,
    frame: u64,
}

impl FrameRenderer for FailAt {
    fn render(&mut self, index: u64, config: &ExportConfig) -> FramecastResult<RenderedFrame> {
        if index == self.frame {
            return Err(FramecastError::render(index, "injected failure"));
        }
        self.inner.render(index, config)
    }

    fn name(&self) -> &str {
        "fail-at"
    }
}

#[test]
fn single_frame_failure_is_fatal() {
    let scene = load_fixture_scene();
    let factory: RendererFactory = Arc::new(move || {
        Box::new(FailAt {
            inner: SceneRenderer::new(scene.clone()),
            frame: 17,
        }) as Box<dyn FrameRenderer>
    });
    let sink = InMemorySink::new();
    let capture = sink.capture();

    let report = ExportSupervisor::with_renderer(small_config(3), factory)
        .with_sink_opener(sink.into_opener())
        .run()
        .unwrap();

    assert!(matches!(
        report.status,
        JobStatus::Failed {
            reason: FailureReason::Render { frame: 17, .. }
        }
    ));
    assert!(report.frames_completed <= 17);
    assert!(capture.indices().iter().all(|&i| i < 17));
}

#[test]
fn encoder_failure_stops_pipeline() {
    let sink = InMemorySink::new().failing_at(10);
    let capture = sink.capture();

    let report = ExportSupervisor::new(small_config(4), load_fixture_scene())
        .with_sink_opener(sink.into_opener())
        .run()
        .unwrap();

    assert!(matches!(
        report.status,
        JobStatus::Failed {
            reason: FailureReason::Encoder {
                exit_code: Some(1),
                ..
            }
        }
    ));
    assert_eq!(capture.indices(), (0..10).collect::<Vec<_>>());
    assert_eq!(report.frames_completed, 10);
}

#[test]
fn random_completion_order_respects_window() {
    fn jitter(index: u64) -> Duration {
        let hash = fnv1a_64(&index.to_le_bytes());
        Duration::from_micros(hash % 4_000)
    }

    let config = small_config(8);
    let window = config.lookahead_window();
    let sink = InMemorySink::new();
    let capture = sink.capture();

    let report = ExportSupervisor::with_renderer(config, delayed_factory(load_fixture_scene(), jitter))
        .with_sink_opener(sink.into_opener())
        .run()
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(capture.indices(), (0..60).collect::<Vec<_>>());
    assert!(report.peak_buffered_frames <= window);
    assert_eq!(report.lookahead_window, window);
}

#[test]
fn slow_encoder_applies_backpressure() {
    let config = ExportConfig {
        lookahead: Some(4),
        ..small_config(4)
    };
    let sink = InMemorySink::new().with_write_delay(Duration::from_millis(3));
    let capture = sink.capture();

    let report = ExportSupervisor::new(config, load_fixture_scene())
        .with_sink_opener(sink.into_opener())
        .run()
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(capture.len(), 60);
    assert!(report.peak_buffered_frames <= 4);
}

#[test]
fn invalid_config_never_opens_sink() {
    let opened = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&opened);

    let err = ExportSupervisor::new(small_config(0), load_fixture_scene())
        .with_sink_opener(Box::new(move |_, _| {
            flag.store(true, Ordering::SeqCst);
            Err(FramecastError::internal("should not be called"))
        }))
        .run()
        .unwrap_err();

    assert!(matches!(err, FramecastError::Config { .. }));
    assert!(!opened.load(Ordering::SeqCst));
}

#[test]
fn panicking_renderer_fails_with_internal_error() {
    struct Panics;

    impl FrameRenderer for Panics {
        fn render(&mut self, index: u64, _config: &ExportConfig) -> FramecastResult<RenderedFrame> {
            if index == 5 {
                panic!("renderer bug");
            }
            Ok(RenderedFrame::new(index, vec![0; 96 * 54 * 3]))
        }

        fn name(&self) -> &str {
            "panics"
        }
    }

    let report = ExportSupervisor::with_renderer(
        small_config(2),
        Arc::new(|| Box::new(Panics) as Box<dyn FrameRenderer>),
    )
    .with_sink_opener(InMemorySink::new().into_opener())
    .run()
    .unwrap();

    assert!(matches!(
        report.status,
        JobStatus::Failed {
            reason: FailureReason::Internal { .. }
        }
    ));
}

#[test]
fn shared_factory_builds_independent_renderers() {
    let factory = scene_renderer_factory(load_fixture_scene());
    let config = small_config(1);
    let mut a = factory();
    let mut b = factory();
    assert_eq!(
        a.render(12, &config).unwrap().checksum(),
        b.render(12, &config).unwrap().checksum()
    );
}

#[cfg(unix)]
#[test]
fn raw_frames_reach_encoder_process_in_order() {
    use framecast_render_engine::{FrameSink, SinkConfig, SubprocessSink};
    use std::process::Command;

    let dir = tempfile::tempdir().unwrap();
    let raw_path = dir.path().join("frames.rgb");
    let config = small_config(4);
    let frame_len = config.frame_len();
    let capture_path = raw_path.clone();

    let report = ExportSupervisor::new(config.clone(), load_fixture_scene())
        .with_sink_opener(Box::new(move |sink_config: &SinkConfig, cancel: &CancelToken| {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg("cat > \"$1\"").arg("sh").arg(&capture_path);
            let sink = SubprocessSink::spawn(cmd, sink_config.frame_len, cancel.clone())?;
            Ok(Box::new(sink) as Box<dyn FrameSink>)
        }))
        .run()
        .unwrap();

    assert!(report.succeeded(), "unexpected status {:?}", report.status);
    let bytes = std::fs::read(&raw_path).unwrap();
    assert_eq!(bytes.len(), 60 * frame_len);

    let mut renderer = SceneRenderer::new(load_fixture_scene());
    for index in [0u64, 29, 59] {
        let expected = renderer.render(index, &config).unwrap();
        let start = index as usize * frame_len;
        assert_eq!(&bytes[start..start + frame_len], expected.pixels());
    }
}

/// Write an executable stand-in encoder. The output path is its last argument.
#[cfg(unix)]
fn encoder_script(dir: &std::path::Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-encoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\nfor out; do :; done\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
fn encoder_config(dir: &std::path::Path, encoder: PathBuf, width: u32, height: u32) -> ExportConfig {
    ExportConfig {
        width,
        height,
        fps: 30,
        length_secs: 2.0,
        threads: 4,
        quality: 50,
        output_path: dir.join("clip.mp4"),
        encoder_path: encoder,
        lookahead: None,
    }
}

#[cfg(unix)]
#[test]
fn encoder_exit_failure_removes_output() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = encoder_script(dir.path(), "cat > \"$out\"\nexit 3");
    let config = encoder_config(dir.path(), encoder, 96, 54);
    let output = config.output_path.clone();

    let report = ExportSupervisor::new(config, load_fixture_scene())
        .run()
        .unwrap();

    assert!(
        matches!(
            report.status,
            JobStatus::Failed {
                reason: FailureReason::Encoder {
                    exit_code: Some(3),
                    ..
                }
            }
        ),
        "unexpected status {:?}",
        report.status
    );
    assert_eq!(report.frames_completed, 60);
    assert!(!output.exists());
}

#[cfg(unix)]
#[test]
fn encoder_exiting_mid_stream_removes_output() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = encoder_script(dir.path(), "echo partial > \"$out\"\nexit 2");
    let config = encoder_config(dir.path(), encoder, 512, 512);
    let output = config.output_path.clone();

    let report = ExportSupervisor::new(config, load_fixture_scene())
        .run()
        .unwrap();

    assert!(
        matches!(
            report.status,
            JobStatus::Failed {
                reason: FailureReason::Encoder {
                    exit_code: Some(2),
                    ..
                }
            }
        ),
        "unexpected status {:?}",
        report.status
    );
    assert!(report.frames_completed < 60);
    assert!(!output.exists());
}

#[cfg(unix)]
#[test]
fn cancel_at_frame_twenty_reaps_encoder_and_removes_output() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("encoder.pid");
    let encoder = encoder_script(
        dir.path(),
        &format!("echo $$ > \"{}\"\nexec cat > \"$out\"", pid_path.display()),
    );
    let config = encoder_config(dir.path(), encoder, 320, 240);
    let output = config.output_path.clone();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let report = ExportSupervisor::new(config, load_fixture_scene())
        .with_cancel_token(cancel)
        .with_progress_interval(Duration::ZERO)
        .on_progress(move |p| {
            if p.frames_completed >= 20 {
                trigger.cancel();
            }
        })
        .run()
        .unwrap();

    assert_eq!(report.status, JobStatus::Cancelled);
    assert!(report.frames_completed >= 20 && report.frames_completed < 60);
    assert!(!output.exists());

    let pid = std::fs::read_to_string(&pid_path).unwrap();
    let alive = std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {}", pid.trim()))
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(!alive.success(), "encoder {} was not reaped", pid.trim());
}
