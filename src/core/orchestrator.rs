//! Two-sensor capture cycle, driven by a single control task.
//!
//! ```text
//! Idle -> PrimaryCapturing -> PrimaryAnalyzing -> SwitchingSensor -> AuxCapturing
//!      -> AuxAnalyzing -> RestoringPrimary -> Fusing -> Presenting -> Idle
//! ```

use crate::camera::SensorHandle;
use crate::common::{Config, LensCheckError, Result, TimingConfig};
use crate::core::classifier::ImageClassifier;
use crate::core::fusion::fuse;
use crate::core::presenter::{PersistKind, ResultPresenter};
use crate::core::spoof::SpoofDetector;
use crate::core::types::{
    AnalysisStage, CameraRole, CaptureSettings, CapturedFrame, ClassificationResult,
    OrchestratorState, SpoofVerdict, Verdict,
};
use image::DynamicImage;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub timing: TimingConfig,
    pub capture: CaptureSettings,
    pub persist_accepted: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            capture: CaptureSettings::default(),
            persist_accepted: true,
        }
    }
}

impl From<&Config> for OrchestratorOptions {
    fn from(config: &Config) -> Self {
        Self {
            timing: config.timing.clone(),
            capture: CaptureSettings::default(),
            persist_accepted: config.storage.persist_accepted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed { verdict: Verdict },
    Failed { stage: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcome: CycleOutcome,
    pub elapsed_ms: u64,
}

impl CycleReport {
    pub fn verdict(&self) -> Option<&Verdict> {
        match &self.outcome {
            CycleOutcome::Completed { verdict } => Some(verdict),
            CycleOutcome::Failed { .. } => None,
        }
    }
}

enum Command {
    Trigger {
        accepted: oneshot::Sender<Result<u64>>,
        done: Option<oneshot::Sender<CycleReport>>,
    },
    Preview {
        reply: oneshot::Sender<Result<Option<DynamicImage>>>,
    },
    Cancel,
    Shutdown,
}

/// Cloneable front end to a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<OrchestratorState>,
    transitions: broadcast::Sender<OrchestratorState>,
}

impl OrchestratorHandle {
    /// Start a cycle. Rejected with `TriggerRejected` while one is in flight.
    pub async fn trigger(&self) -> Result<u64> {
        self.send_trigger(None).await
    }

    /// Start a cycle and wait for its report.
    pub async fn capture(&self) -> Result<CycleReport> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send_trigger(Some(done_tx)).await?;
        done_rx.await.map_err(|_| LensCheckError::OrchestratorStopped)
    }

    async fn send_trigger(&self, done: Option<oneshot::Sender<CycleReport>>) -> Result<u64> {
        let (accepted_tx, accepted_rx) = oneshot::channel();
        self.commands
            .send(Command::Trigger { accepted: accepted_tx, done })
            .await
            .map_err(|_| LensCheckError::OrchestratorStopped)?;
        accepted_rx.await.map_err(|_| LensCheckError::OrchestratorStopped)?
    }

    /// One primary frame for live preview, grabbed by the control task.
    /// `None` while a cycle is in flight.
    pub async fn preview_frame(&self) -> Result<Option<DynamicImage>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Preview { reply: reply_tx })
            .await
            .map_err(|_| LensCheckError::OrchestratorStopped)?;
        reply_rx.await.map_err(|_| LensCheckError::OrchestratorStopped)?
    }

    /// Abort the in-flight cycle at its next transition. No-op when idle.
    pub async fn cancel(&self) -> Result<()> {
        self.commands
            .send(Command::Cancel)
            .await
            .map_err(|_| LensCheckError::OrchestratorStopped)
    }

    /// Cancel any in-flight cycle, stop both sensors and end the control task.
    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| LensCheckError::OrchestratorStopped)
    }

    pub fn state(&self) -> OrchestratorState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.clone()
    }

    /// Every transition, in order. Slow receivers may lag.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorState> {
        self.transitions.subscribe()
    }
}

/// Per-cycle analysis results, owned by the cycle that produced them.
struct FusedCycle {
    verdict: Verdict,
    primary_image: Option<DynamicImage>,
    spoof: SpoofVerdict,
}

type ClassificationJob = JoinHandle<(Result<ClassificationResult>, CapturedFrame)>;

pub struct CaptureOrchestrator {
    primary: SensorHandle,
    auxiliary: SensorHandle,
    classifier: Arc<dyn ImageClassifier>,
    spoof: Arc<dyn SpoofDetector>,
    presenter: Box<dyn ResultPresenter>,
    options: OrchestratorOptions,
    state: watch::Sender<OrchestratorState>,
    transitions: broadcast::Sender<OrchestratorState>,
    next_cycle: u64,
}

impl CaptureOrchestrator {
    pub fn new(
        primary: SensorHandle,
        auxiliary: SensorHandle,
        classifier: Arc<dyn ImageClassifier>,
        spoof: Arc<dyn SpoofDetector>,
        presenter: Box<dyn ResultPresenter>,
        options: OrchestratorOptions,
    ) -> Self {
        debug_assert_eq!(primary.role(), CameraRole::Primary);
        debug_assert_eq!(auxiliary.role(), CameraRole::Auxiliary);

        let (state, _) = watch::channel(OrchestratorState::Idle);
        let (transitions, _) = broadcast::channel(64);
        Self {
            primary,
            auxiliary,
            classifier,
            spoof,
            presenter,
            options,
            state,
            transitions,
            next_cycle: 0,
        }
    }

    /// Move the orchestrator onto its own task.
    pub fn spawn(self) -> (OrchestratorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let handle = OrchestratorHandle {
            commands: commands_tx,
            state: self.state.subscribe(),
            transitions: self.transitions.clone(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        // Live preview runs between cycles
        if let Err(e) = self.primary.start().await {
            tracing::warn!("Primary preview unavailable at startup: {}", e);
        }

        while let Some(command) = commands.recv().await {
            match command {
                Command::Trigger { accepted, done } => {
                    self.next_cycle += 1;
                    let cycle = self.next_cycle;
                    let _ = accepted.send(Ok(cycle));

                    let (cancel_tx, cancel_rx) = watch::channel(false);
                    let mut shutdown = false;
                    let mut commands_open = true;

                    let report = {
                        let run = self.run_cycle(cycle, cancel_rx);
                        tokio::pin!(run);
                        loop {
                            tokio::select! {
                                report = &mut run => break report,
                                command = commands.recv(), if commands_open => match command {
                                    Some(Command::Trigger { accepted, .. }) => {
                                        tracing::warn!(cycle, "Trigger rejected: cycle in flight");
                                        let _ = accepted.send(Err(LensCheckError::TriggerRejected(cycle)));
                                    }
                                    Some(Command::Preview { reply }) => {
                                        let _ = reply.send(Ok(None));
                                    }
                                    Some(Command::Cancel) => {
                                        tracing::info!(cycle, "Cancel requested");
                                        cancel_tx.send_replace(true);
                                    }
                                    Some(Command::Shutdown) | None => {
                                        commands_open = false;
                                        shutdown = true;
                                        cancel_tx.send_replace(true);
                                    }
                                },
                            }
                        }
                    };

                    if let Some(done) = done {
                        let _ = done.send(report);
                    }
                    if shutdown {
                        break;
                    }
                }
                Command::Preview { reply } => {
                    // Retries the startup preview if that failed
                    let frame = match self.primary.start().await {
                        Ok(()) => self.primary.capture_one(&self.options.capture).await,
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(frame.map(|f| Some(f.image)));
                }
                Command::Cancel => tracing::debug!("Cancel ignored: no cycle in flight"),
                Command::Shutdown => break,
            }
        }

        if let Err(e) = self.auxiliary.stop().await {
            tracing::warn!("Failed to stop auxiliary sensor: {}", e);
        }
        if let Err(e) = self.primary.stop().await {
            tracing::warn!("Failed to stop primary sensor: {}", e);
        }
        tracing::info!("Orchestrator stopped");
    }

    fn transition(&self, next: OrchestratorState) {
        tracing::info!(cycle = ?next.cycle(), state = next.name(), "Transition");
        self.state.send_replace(next.clone());
        // No subscribers is fine
        let _ = self.transitions.send(next);
    }

    fn current_stage(&self) -> &'static str {
        self.state.borrow().name()
    }

    async fn run_cycle(&mut self, cycle: u64, mut cancel: watch::Receiver<bool>) -> CycleReport {
        let started = Instant::now();
        let limit = self.options.timing.cycle_timeout();

        let result = match tokio::time::timeout(limit, self.drive_cycle(cycle, &mut cancel)).await {
            Ok(result) => result,
            Err(_) => Err(LensCheckError::CycleTimedOut(limit.as_millis() as u64)),
        };

        let outcome = match result {
            Ok(fused) => {
                self.transition(OrchestratorState::Presenting { cycle });
                self.present(&fused);
                tracing::info!(cycle, verdict = %fused.verdict, "Cycle complete");
                CycleOutcome::Completed { verdict: fused.verdict }
            }
            Err(e) => {
                let stage = self.current_stage().to_string();
                let reason = e.to_string();
                tracing::error!(cycle, %stage, "Cycle failed: {}", reason);
                self.transition(OrchestratorState::Failed {
                    cycle,
                    stage: stage.clone(),
                    reason: reason.clone(),
                });
                self.presenter.show_error(&reason);
                self.recover().await;
                CycleOutcome::Failed { stage, reason }
            }
        };

        self.transition(OrchestratorState::Idle);
        CycleReport {
            cycle,
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn drive_cycle(&mut self, cycle: u64, cancel: &mut watch::Receiver<bool>) -> Result<FusedCycle> {
        let timing = self.options.timing.clone();
        let settings = self.options.capture.clone();

        self.transition(OrchestratorState::PrimaryCapturing { cycle });
        self.primary.start().await?;
        let requested_at = Instant::now();
        let primary_frame = self.primary.capture_one(&settings).await?;
        check_cancel(cancel)?;

        self.transition(OrchestratorState::PrimaryAnalyzing { cycle });
        let classification = spawn_classification(Arc::clone(&self.classifier), primary_frame);

        // Floor for exposure settle, measured from the capture request
        until_cancelled(cancel, tokio::time::sleep_until(requested_at + timing.settle_delay())).await?;

        self.transition(OrchestratorState::SwitchingSensor { cycle });
        self.hand_off(CameraRole::Auxiliary).await?;
        check_cancel(cancel)?;

        self.transition(OrchestratorState::AuxCapturing { cycle });
        let aux_frame = self.auxiliary.capture_one(&settings).await?;
        check_cancel(cancel)?;

        self.transition(OrchestratorState::AuxAnalyzing { cycle });
        let spoof = {
            let detector = Arc::clone(&self.spoof);
            tokio::task::spawn_blocking(move || detector.analyze(&aux_frame.image))
        };

        // Preview comes back whether or not the detector has replied
        self.transition(OrchestratorState::RestoringPrimary { cycle });
        self.hand_off(CameraRole::Primary).await?;
        check_cancel(cancel)?;

        let spoof = until_cancelled(cancel, spoof)
            .await?
            .map_err(|e| LensCheckError::analysis_failed(AnalysisStage::SpoofDetection, e.to_string()))?
            .map_err(|e| LensCheckError::analysis_failed(AnalysisStage::SpoofDetection, e.to_string()))?;

        self.transition(OrchestratorState::Fusing { cycle });
        let (classification, primary_image) = if spoof.lines_detected {
            // Dominated; whatever the classifier says is discarded
            tracing::debug!(cycle, "Lines detected, classification ignored");
            (None, None)
        } else {
            self.join_classification(cycle, classification, cancel).await?
        };

        Ok(FusedCycle {
            verdict: fuse(classification, &spoof),
            primary_image,
            spoof,
        })
    }

    /// Wait up to the grace period for the classifier. A classifier still
    /// running at that point yields `None`.
    async fn join_classification(
        &self,
        cycle: u64,
        job: ClassificationJob,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(Option<ClassificationResult>, Option<DynamicImage>)> {
        let grace = self.options.timing.classification_grace();
        match until_cancelled(cancel, tokio::time::timeout(grace, job)).await? {
            Ok(Ok((Ok(result), frame))) => {
                tracing::debug!(cycle, label = %result.label, confidence = result.confidence, "Classification joined");
                Ok((Some(result), Some(frame.image)))
            }
            Ok(Ok((Err(e), _))) => Err(LensCheckError::analysis_failed(AnalysisStage::Classification, e.to_string())),
            Ok(Err(e)) => Err(LensCheckError::analysis_failed(AnalysisStage::Classification, e.to_string())),
            Err(_) => {
                tracing::warn!(cycle, grace_ms = grace.as_millis() as u64, "Classifier has not replied");
                Ok((None, None))
            }
        }
    }

    /// Stop the other sensor, confirm it is idle, then start `to` and confirm
    /// it is running. Each step is bounded by the switch timeout.
    async fn hand_off(&self, to: CameraRole) -> Result<()> {
        let limit = self.options.timing.switch_timeout();
        let (from, to) = match to {
            CameraRole::Auxiliary => (&self.primary, &self.auxiliary),
            CameraRole::Primary => (&self.auxiliary, &self.primary),
        };

        tokio::time::timeout(limit, from.stop())
            .await
            .map_err(|_| {
                LensCheckError::sensor_unavailable(
                    from.role(),
                    format!("did not stop within {} ms", limit.as_millis()),
                )
            })??;

        tokio::time::timeout(limit, to.start())
            .await
            .map_err(|_| {
                LensCheckError::sensor_unavailable(
                    to.role(),
                    format!("did not start within {} ms", limit.as_millis()),
                )
            })??;

        tracing::debug!(from = %from.role(), to = %to.role(), "Hand-off complete");
        Ok(())
    }

    /// Best effort return to live preview after a failed cycle. The primary is
    /// only restarted once the auxiliary is confirmed idle.
    async fn recover(&self) {
        if let Err(e) = self.hand_off(CameraRole::Primary).await {
            tracing::warn!("Could not restore primary preview: {}", e);
        }
    }

    fn present(&mut self, fused: &FusedCycle) {
        match &fused.verdict {
            Verdict::RejectSpoof => {
                if let Some(image) = &fused.spoof.annotated_image {
                    self.presenter.persist(image, PersistKind::SpoofEvidence);
                }
                self.presenter.show_spoof_rejected();
            }
            Verdict::Accept { label, confidence } => {
                if self.options.persist_accepted {
                    if let Some(image) = &fused.primary_image {
                        self.presenter.persist(image, PersistKind::Accepted);
                    }
                }
                self.presenter.show_classification(label, *confidence);
            }
            Verdict::NoClassification => self.presenter.show_no_classification(),
        }
    }
}

fn spawn_classification(classifier: Arc<dyn ImageClassifier>, frame: CapturedFrame) -> ClassificationJob {
    tokio::task::spawn_blocking(move || {
        let result = classifier.classify(&frame.image);
        (result, frame)
    })
}

fn check_cancel(cancel: &watch::Receiver<bool>) -> Result<()> {
    if *cancel.borrow() {
        return Err(LensCheckError::Cancelled);
    }
    Ok(())
}

async fn until_cancelled<F: Future>(cancel: &mut watch::Receiver<bool>, fut: F) -> Result<F::Output> {
    check_cancel(cancel)?;
    tokio::select! {
        output = fut => Ok(output),
        _ = cancelled(cancel) => Err(LensCheckError::Cancelled),
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender gone: nobody can cancel any more
            std::future::pending::<()>().await;
        }
    }
}
