use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::broker::Publisher;
use crate::message::TelemetryMessage;
use crate::sensors::SensorGenerator;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Running,
    Stopped,
}

impl DeviceState {
    fn from_u8(value: u8) -> Self {
        match value {
            IDLE => DeviceState::Idle,
            RUNNING => DeviceState::Running,
            _ => DeviceState::Stopped,
        }
    }
}

/// A single simulated device: owns its generator and runs a
/// generate-transmit-sleep loop until stopped. Runners share nothing with
/// each other beyond the broker client.
pub struct VirtualDevice<P> {
    device_id: String,
    generator: Box<dyn SensorGenerator>,
    broker: Arc<P>,
    state: Arc<AtomicU8>,
}

/// Detached view of a running device, used to observe its state and request
/// a cooperative stop. The stop takes effect at the next loop iteration;
/// an in-flight publish or sleep is not interrupted.
pub struct DeviceHandle {
    device_id: String,
    state: Arc<AtomicU8>,
}

impl DeviceHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn stop(&self) {
        self.state.store(STOPPED, Ordering::SeqCst);
    }
}

impl<P: Publisher> VirtualDevice<P> {
    pub fn new(device_id: impl Into<String>, generator: Box<dyn SensorGenerator>, broker: Arc<P>) -> Self {
        Self {
            device_id: device_id.into(),
            generator,
            broker,
            state: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle {
            device_id: self.device_id.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Run the device loop at the given interval. A failed publish is logged
    /// and retried on the next tick; losing one sample is acceptable, losing
    /// the device stream is not.
    pub async fn run(mut self, interval: Duration) {
        if self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(device_id = %self.device_id, "device is not idle, refusing to start");
            return;
        }
        info!(device_id = %self.device_id, "virtual device started");

        while self.state.load(Ordering::SeqCst) == RUNNING {
            let reading = self.generator.generate_data();
            let message = TelemetryMessage::new(&self.device_id, reading);
            if !self.broker.publish(&message).await {
                warn!(device_id = %self.device_id, "telemetry publish failed, retrying next tick");
            }
            tokio::time::sleep(interval).await;
        }

        self.state.store(STOPPED, Ordering::SeqCst);
        info!(device_id = %self.device_id, "virtual device stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorDataGenerator;
    use std::future::{ready, Future};
    use std::sync::atomic::AtomicUsize;

    struct StubPublisher {
        attempts: AtomicUsize,
        accept: bool,
    }

    impl StubPublisher {
        fn new(accept: bool) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                accept,
            }
        }
    }

    impl Publisher for StubPublisher {
        fn publish(&self, _message: &TelemetryMessage) -> impl Future<Output = bool> + Send {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            ready(self.accept)
        }
    }

    #[tokio::test]
    async fn runner_publishes_until_stopped() {
        let publisher = Arc::new(StubPublisher::new(true));
        let device = VirtualDevice::new(
            "VIRTUAL_900",
            Box::new(SensorDataGenerator::new()),
            Arc::clone(&publisher),
        );
        let handle = device.handle();
        assert_eq!(handle.state(), DeviceState::Idle);

        let task = tokio::spawn(device.run(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.state(), DeviceState::Running);
        assert!(publisher.attempts.load(Ordering::SeqCst) >= 1);

        handle.stop();
        task.await.unwrap();
        assert_eq!(handle.state(), DeviceState::Stopped);
    }

    #[tokio::test]
    async fn publish_failure_does_not_stop_the_runner() {
        let publisher = Arc::new(StubPublisher::new(false));
        let device = VirtualDevice::new(
            "VIRTUAL_901",
            Box::new(SensorDataGenerator::new()),
            Arc::clone(&publisher),
        );
        let handle = device.handle();

        let task = tokio::spawn(device.run(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(handle.state(), DeviceState::Running);
        assert!(publisher.attempts.load(Ordering::SeqCst) >= 2);

        handle.stop();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stopped_device_refuses_to_restart() {
        let publisher = Arc::new(StubPublisher::new(true));
        let device = VirtualDevice::new(
            "VIRTUAL_902",
            Box::new(SensorDataGenerator::new()),
            publisher,
        );
        let handle = device.handle();
        handle.stop();

        device.run(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), DeviceState::Stopped);
    }
}
