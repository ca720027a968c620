use crate::camera::CameraDevice;
use crate::common::{LensCheckError, Result};
use crate::core::types::{CameraRole, CaptureSettings, CapturedFrame, SessionState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// One camera plus its session state. Clones share both.
#[derive(Clone)]
pub struct SensorHandle {
    role: CameraRole,
    device: Arc<Mutex<Box<dyn CameraDevice>>>,
    state: Arc<watch::Sender<SessionState>>,
    // Bumped by every stop; an open that started before the bump is undone
    stops: Arc<AtomicU64>,
}

impl SensorHandle {
    pub fn new(role: CameraRole, device: Box<dyn CameraDevice>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            role,
            device: Arc::new(Mutex::new(device)),
            state: Arc::new(state),
            stops: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn role(&self) -> CameraRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Idle -> Running. Resolves once the device reports open; no-op when
    /// already running.
    pub async fn start(&self) -> Result<()> {
        match self.state() {
            SessionState::Running => return Ok(()),
            SessionState::Stopping => self.wait_for(SessionState::Idle, None).await?,
            SessionState::Idle => {}
        }

        let role = self.role;
        let device = Arc::clone(&self.device);
        let state = Arc::clone(&self.state);
        let stops = Arc::clone(&self.stops);
        let generation = stops.load(Ordering::SeqCst);

        tokio::task::spawn_blocking(move || -> Result<_> {
            let mut device = device
                .lock()
                .map_err(|_| LensCheckError::sensor_unavailable(role, "device lock poisoned"))?;
            device
                .open()
                .map_err(|e| LensCheckError::sensor_unavailable(role, e.to_string()))?;
            if stops.load(Ordering::SeqCst) != generation {
                if let Err(e) = device.close() {
                    tracing::warn!(%role, "Error while closing device: {}", e);
                }
                return Err(LensCheckError::sensor_unavailable(role, "stopped while opening"));
            }
            // Set from the blocking side so a caller that gave up waiting still
            // sees the real device state.
            state.send_replace(SessionState::Running);
            tracing::debug!(%role, device = %device.name(), "Session running");
            Ok(())
        })
        .await
        .map_err(|e| LensCheckError::sensor_unavailable(role, format!("start task failed: {}", e)))?
    }

    /// Running -> Stopping -> Idle. Resolves once the device has been closed.
    /// A start still pending when this is called never reaches `Running`.
    pub async fn stop(&self) -> Result<()> {
        let role = self.role;
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.state.send_if_modified(|s| {
            if *s == SessionState::Running {
                *s = SessionState::Stopping;
                return true;
            }
            false
        });
        let device = Arc::clone(&self.device);
        let state = Arc::clone(&self.state);

        tokio::task::spawn_blocking(move || -> Result<_> {
            let result = match device.lock() {
                Ok(mut device) if device.is_open() => device.close(),
                Ok(_) => Ok(()),
                Err(_) => Err(LensCheckError::Camera("device lock poisoned".into())),
            };
            if let Err(e) = &result {
                tracing::warn!(%role, "Error while closing device: {}", e);
            }
            // The device is released either way
            state.send_if_modified(|s| {
                if *s == SessionState::Idle {
                    return false;
                }
                *s = SessionState::Idle;
                true
            });
            tracing::debug!(%role, "Session idle");
            result
        })
        .await
        .map_err(|e| LensCheckError::Camera(format!("{} stop task failed: {}", role, e)))?
    }

    /// Wait until the session reaches `target`, optionally bounded.
    pub async fn wait_for(&self, target: SessionState, timeout: Option<Duration>) -> Result<()> {
        let mut rx = self.subscribe();
        let wait = async move {
            loop {
                if *rx.borrow_and_update() == target {
                    return Ok(());
                }
                if rx.changed().await.is_err() {
                    return Err(LensCheckError::sensor_unavailable(self.role, "session state closed"));
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                LensCheckError::sensor_unavailable(
                    self.role,
                    format!("did not reach {} within {} ms", target, limit.as_millis()),
                )
            })?,
            None => wait.await,
        }
    }

    /// Take exactly one frame from a running session.
    pub async fn capture_one(&self, settings: &CaptureSettings) -> Result<CapturedFrame> {
        let role = self.role;
        let current = self.state();
        if current != SessionState::Running {
            return Err(LensCheckError::capture_failed(
                role,
                format!("session is not running (state: {})", current),
            ));
        }

        let device = Arc::clone(&self.device);
        let settings = settings.clone();

        tokio::task::spawn_blocking(move || -> Result<_> {
            let mut device = device
                .lock()
                .map_err(|_| LensCheckError::capture_failed(role, "device lock poisoned"))?;
            let image = device
                .grab(&settings)
                .map_err(|e| LensCheckError::capture_failed(role, e.to_string()))?;
            Ok(CapturedFrame::new(role, image))
        })
        .await
        .map_err(|e| LensCheckError::capture_failed(role, format!("capture task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage};

    struct FakeCamera {
        open: bool,
        fail_open: bool,
    }

    impl CameraDevice for FakeCamera {
        fn name(&self) -> String {
            "fake".into()
        }

        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(LensCheckError::Camera("no such device".into()));
            }
            self.open = true;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn grab(&mut self, _settings: &CaptureSettings) -> Result<DynamicImage> {
            Ok(DynamicImage::ImageLuma8(GrayImage::new(4, 4)))
        }
    }

    fn sensor(fail_open: bool) -> SensorHandle {
        SensorHandle::new(CameraRole::Auxiliary, Box::new(FakeCamera { open: false, fail_open }))
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let sensor = sensor(false);
        assert_eq!(sensor.state(), SessionState::Idle);

        sensor.start().await.unwrap();
        assert_eq!(sensor.state(), SessionState::Running);
        // Second start is a no-op
        sensor.start().await.unwrap();

        let frame = sensor.capture_one(&CaptureSettings::default()).await.unwrap();
        assert_eq!(frame.role, CameraRole::Auxiliary);

        sensor.stop().await.unwrap();
        assert_eq!(sensor.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn capture_requires_running_session() {
        let sensor = sensor(false);
        let err = sensor.capture_one(&CaptureSettings::default()).await.unwrap_err();
        assert!(matches!(err, LensCheckError::CaptureFailed { role: CameraRole::Auxiliary, .. }));
    }

    #[tokio::test]
    async fn open_failure_is_sensor_unavailable() {
        let sensor = sensor(true);
        let err = sensor.start().await.unwrap_err();
        assert!(matches!(err, LensCheckError::SensorUnavailable { .. }));
        assert_eq!(sensor.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let sensor = sensor(false);
        let err = sensor
            .wait_for(SessionState::Running, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not reach running"));
    }

    #[tokio::test]
    async fn stop_during_pending_start_leaves_device_closed() {
        let sensor = sensor(false);

        // Hold the device so both blocking tasks queue up behind it
        let guard = sensor.device.lock().unwrap();
        let pending = {
            let sensor = sensor.clone();
            tokio::spawn(async move { sensor.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stopping = {
            let sensor = sensor.clone();
            tokio::spawn(async move { sensor.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        stopping.await.unwrap().unwrap();
        let started = pending.await.unwrap();

        assert!(started.is_err());
        assert_eq!(sensor.state(), SessionState::Idle);
        assert!(!sensor.device.lock().unwrap().is_open());
    }
}
