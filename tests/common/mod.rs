//! In-memory cameras, analyzers and presenter for driving the orchestrator.
#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Luma};
use lenscheck::camera::{CameraDevice, SensorHandle};
use lenscheck::common::{LensCheckError, Result, TimingConfig};
use lenscheck::core::{
    CameraRole, CaptureOrchestrator, CaptureSettings, ClassificationResult, ImageClassifier,
    OrchestratorHandle, OrchestratorOptions, OrchestratorState, PersistKind, ResultPresenter,
    SpoofDetector, SpoofVerdict,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Shared record of what both cameras did.
#[derive(Default)]
pub struct Rig {
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    opens: Mutex<Vec<CameraRole>>,
}

impl Rig {
    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn opens_of(&self, role: CameraRole) -> usize {
        self.opens.lock().unwrap().iter().filter(|r| **r == role).count()
    }
}

pub struct ScriptedCamera {
    role: CameraRole,
    rig: Arc<Rig>,
    open: bool,
    pub fail_open: bool,
    pub fail_grab: bool,
}

impl ScriptedCamera {
    pub fn new(role: CameraRole, rig: &Arc<Rig>) -> Self {
        Self { role, rig: Arc::clone(rig), open: false, fail_open: false, fail_grab: false }
    }
}

impl CameraDevice for ScriptedCamera {
    fn name(&self) -> String {
        format!("scripted-{}", self.role)
    }

    fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        if self.fail_open {
            return Err(LensCheckError::Camera("no device".into()));
        }
        self.open = true;
        let now = self.rig.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.rig.max_open.fetch_max(now, Ordering::SeqCst);
        self.rig.opens.lock().unwrap().push(self.role);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.rig.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn grab(&mut self, _settings: &CaptureSettings) -> Result<DynamicImage> {
        if self.fail_grab {
            return Err(LensCheckError::Camera("sensor returned no frame".into()));
        }
        Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 12, Luma([128]))))
    }
}

/// Blocks an analyzer until the test releases it or drops the gate handle.
pub struct Gate {
    rx: Mutex<mpsc::Receiver<()>>,
}

impl Gate {
    pub fn new() -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx: Mutex::new(rx) })
    }

    fn wait(&self) {
        // Err means the test is over; either way stop blocking
        let _ = self.rx.lock().unwrap().recv();
    }
}

pub enum ClassifierScript {
    Reply(&'static str, f32),
    Fail,
}

pub struct MockClassifier {
    pub script: ClassifierScript,
    pub gate: Option<Gate>,
}

impl MockClassifier {
    pub fn replying(label: &'static str, confidence: f32) -> Self {
        Self { script: ClassifierScript::Reply(label, confidence), gate: None }
    }
}

impl ImageClassifier for MockClassifier {
    fn classify(&self, _image: &DynamicImage) -> Result<ClassificationResult> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        match self.script {
            ClassifierScript::Reply(label, confidence) => Ok(ClassificationResult::new(label, confidence)),
            ClassifierScript::Fail => Err(LensCheckError::Model("inference failed".into())),
        }
    }
}

pub struct MockSpoof {
    pub lines: bool,
    pub gate: Option<Gate>,
    pub delay: Duration,
}

impl MockSpoof {
    pub fn clean() -> Self {
        Self { lines: false, gate: None, delay: Duration::ZERO }
    }

    pub fn lines() -> Self {
        Self { lines: true, gate: None, delay: Duration::ZERO }
    }
}

impl SpoofDetector for MockSpoof {
    fn analyze(&self, image: &DynamicImage) -> Result<SpoofVerdict> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        std::thread::sleep(self.delay);
        Ok(SpoofVerdict {
            lines_detected: self.lines,
            annotated_image: Some(DynamicImage::ImageRgb8(image.to_rgb8())),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shown {
    SpoofRejected,
    Classification(String, f32),
    NoClassification,
    Error(String),
    Persisted(PersistKind),
}

#[derive(Clone, Default)]
pub struct RecordingPresenter {
    pub events: Arc<Mutex<Vec<Shown>>>,
}

impl RecordingPresenter {
    pub fn events(&self) -> Vec<Shown> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Shown) {
        self.events.lock().unwrap().push(event);
    }
}

impl ResultPresenter for RecordingPresenter {
    fn show_spoof_rejected(&mut self) {
        self.push(Shown::SpoofRejected);
    }

    fn show_classification(&mut self, label: &str, confidence: f32) {
        self.push(Shown::Classification(label.to_string(), confidence));
    }

    fn show_no_classification(&mut self) {
        self.push(Shown::NoClassification);
    }

    fn show_error(&mut self, reason: &str) {
        self.push(Shown::Error(reason.to_string()));
    }

    fn persist(&mut self, _image: &DynamicImage, kind: PersistKind) {
        self.push(Shown::Persisted(kind));
    }
}

pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        settle_delay_ms: 10,
        switch_timeout_ms: 500,
        classification_grace_ms: 300,
        cycle_timeout_ms: 2000,
    }
}

/// A spawned orchestrator plus everything a test wants to inspect.
pub struct Harness {
    pub handle: OrchestratorHandle,
    pub task: JoinHandle<()>,
    pub primary: SensorHandle,
    pub auxiliary: SensorHandle,
    pub rig: Arc<Rig>,
    pub presenter: RecordingPresenter,
}

pub struct HarnessBuilder {
    pub classifier: MockClassifier,
    pub spoof: MockSpoof,
    pub timing: TimingConfig,
    pub primary_fails: bool,
    pub auxiliary_fails_open: bool,
}

impl HarnessBuilder {
    pub fn new(classifier: MockClassifier, spoof: MockSpoof) -> Self {
        Self {
            classifier,
            spoof,
            timing: fast_timing(),
            primary_fails: false,
            auxiliary_fails_open: false,
        }
    }

    pub async fn spawn(self) -> Harness {
        let rig = Arc::new(Rig::default());
        let mut primary_camera = ScriptedCamera::new(CameraRole::Primary, &rig);
        primary_camera.fail_grab = self.primary_fails;

        let mut auxiliary_camera = ScriptedCamera::new(CameraRole::Auxiliary, &rig);
        auxiliary_camera.fail_open = self.auxiliary_fails_open;

        let primary = SensorHandle::new(CameraRole::Primary, Box::new(primary_camera));
        let auxiliary = SensorHandle::new(CameraRole::Auxiliary, Box::new(auxiliary_camera));
        let presenter = RecordingPresenter::default();

        let orchestrator = CaptureOrchestrator::new(
            primary.clone(),
            auxiliary.clone(),
            Arc::new(self.classifier),
            Arc::new(self.spoof),
            Box::new(presenter.clone()),
            OrchestratorOptions { timing: self.timing, ..OrchestratorOptions::default() },
        );
        let (handle, task) = orchestrator.spawn();

        // Startup preview
        primary
            .wait_for(lenscheck::core::SessionState::Running, Some(Duration::from_secs(2)))
            .await
            .unwrap();

        Harness { handle, task, primary, auxiliary, rig, presenter }
    }
}

impl Harness {
    pub async fn wait_for_state(&self, pred: impl Fn(&OrchestratorState) -> bool) {
        let mut rx = self.handle.watch_state();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if pred(&rx.borrow_and_update()) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("state never reached");
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}
