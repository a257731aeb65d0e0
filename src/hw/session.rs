use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bon::Builder;
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::model::{ConnectionState, DeviceIdentity};
use super::transport::{DeviceFilter, Transport, TransportEvent};
use crate::error::{SessionError, TransportError};
use crate::measurement::{HeartRateMeasurement, MeasurementDecodeError, MeasurementDecoder};
use crate::protocol::{self, GattId};

/// Service and characteristic the controller resolves after connecting.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GattProfile {
    service: GattId,
    characteristic: GattId,
}

impl GattProfile {
    /// The Heart Rate service and its measurement characteristic.
    pub const HEART_RATE: Self = Self {
        service: GattId::HeartRateService,
        characteristic: GattId::HeartRateMeasurement,
    };

    #[must_use]
    pub fn service(self) -> GattId {
        self.service
    }

    #[must_use]
    pub fn characteristic(self) -> GattId {
        self.characteristic
    }

    fn service_uuid(self) -> Uuid {
        protocol::gatt_metadata(self.service).uuid()
    }

    fn characteristic_uuid(self) -> Uuid {
        protocol::gatt_metadata(self.characteristic).uuid()
    }
}

impl Default for GattProfile {
    fn default() -> Self {
        Self::HEART_RATE
    }
}

/// Settings for a session controller.
#[derive(Debug, Clone, Default, Builder)]
pub struct SessionConfig {
    #[builder(default)]
    profile: GattProfile,
    /// Only offer devices whose advertised local name starts with this prefix.
    #[builder(into)]
    name_prefix: Option<String>,
}

impl SessionConfig {
    /// Returns the GATT profile resolved after connecting.
    #[must_use]
    pub fn profile(&self) -> GattProfile {
        self.profile
    }

    /// Returns the discovery filter derived from this configuration.
    #[must_use]
    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter::new(self.profile.service_uuid(), self.name_prefix.clone())
    }
}

/// Events the controller emits to its UI collaborator.
#[derive(Debug)]
pub enum SessionEvent {
    /// GATT connect succeeded for the chosen device.
    DeviceConnected(DeviceIdentity),
    /// A notification decoded into a reading.
    ReadingReceived(HeartRateMeasurement),
    /// A notification failed to decode; the session stays active.
    ReadingRejected {
        payload: Vec<u8>,
        error: MeasurementDecodeError,
    },
    /// A previously announced connection was released.
    DeviceDisconnected,
    /// Discovery, connect or subscribe failed and the session returned to idle.
    SessionFailed(TransportError),
}

/// Controller-owned state of the single device session.
#[derive(Debug)]
pub(crate) struct DeviceSession<D> {
    state: ConnectionState,
    device: Option<D>,
    generation: u64,
    cancel: CancellationToken,
    announced: bool,
}

impl<D> Default for DeviceSession<D> {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            device: None,
            generation: 0,
            cancel: CancellationToken::new(),
            announced: false,
        }
    }
}

/// Drives one device session through discover, connect, subscribe and listen.
///
/// Only one session exists at a time. [`SessionController::start`] is rejected
/// unless the session is idle; [`SessionController::stop`] may be called from
/// any state and cancels whichever platform operation is pending.
///
/// ```
/// # async fn demo() -> anyhow::Result<()> {
/// let fake = hrm::FakeArgs::builder()
///     .scan("hci0|AA:BB:CC|Polar H10|-50|180d")?
///     .notifications("0048")?
///     .build();
/// let (controller, mut events) =
///     hrm::SessionController::new(hrm::fake_transport(fake), hrm::SessionConfig::default());
/// controller.start()?;
/// while let Some(event) = events.recv().await {
///     if let hrm::SessionEvent::DeviceDisconnected = event {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionController<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for SessionController<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> SessionController<T> {
    /// Creates an idle controller and the receiver for its events.
    #[must_use]
    pub fn new(
        transport: T,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Idle);
        let shared = Shared {
            transport,
            config,
            session: Mutex::new(DeviceSession::default()),
            state_tx,
            events,
        };

        (
            Self {
                shared: Arc::new(shared),
            },
            events_rx,
        )
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock_session().state
    }

    /// Returns a receiver observing every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Begins a new session: discover, connect, subscribe, then listen.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyStarted`] unless the session is idle.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut session = self.shared.lock_session();
        if !session.state.is_idle() {
            warn!(state = %session.state, "rejecting start while a session is in progress");
            return Err(SessionError::AlreadyStarted {
                state: session.state,
            });
        }

        session.generation += 1;
        session.cancel = CancellationToken::new();
        session.device = None;
        session.announced = false;
        let generation = session.generation;
        let cancel = session.cancel.clone();
        self.shared
            .set_state(&mut session, ConnectionState::Discovering);
        drop(session);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(shared.drive(generation, cancel));
        Ok(())
    }

    /// Ends the session from any state.
    ///
    /// During discovery the session returns to idle immediately. Once a
    /// device has been chosen the session moves to `Disconnecting` and
    /// reaches idle after the platform disconnect completes. No reading is
    /// emitted after this returns.
    pub fn stop(&self) {
        let mut session = self.shared.lock_session();
        match session.state {
            ConnectionState::Idle | ConnectionState::Disconnecting => {
                debug!(state = %session.state, "ignoring stop; nothing to tear down");
            }
            state => {
                session.cancel.cancel();
                if session.device.is_none() {
                    self.shared.set_state(&mut session, ConnectionState::Idle);
                    info!(%state, "session stopped before a device was chosen");
                } else {
                    self.shared
                        .set_state(&mut session, ConnectionState::Disconnecting);
                    info!(%state, "session stopping");
                }
            }
        }
    }

    /// Resolves once the session is idle.
    pub async fn wait_until_idle(&self) {
        let mut state_rx = self.watch_state();
        if state_rx.wait_for(|state| state.is_idle()).await.is_err() {
            trace!("state channel closed while waiting for idle");
        }
    }
}

struct Shared<T: Transport> {
    transport: T,
    config: SessionConfig,
    session: Mutex<DeviceSession<T::Device>>,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

enum Outcome {
    Stopped,
    PeerDisconnected,
}

impl<T: Transport> Shared<T> {
    fn lock_session(&self) -> MutexGuard<'_, DeviceSession<T::Device>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, session: &mut DeviceSession<T::Device>, state: ConnectionState) {
        trace!(from = %session.state, to = %state, "session state transition");
        session.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("session event receiver dropped");
        }
    }

    /// Moves `from` to `to` unless the session was stopped or replaced meanwhile.
    fn advance(&self, generation: u64, from: ConnectionState, to: ConnectionState) -> bool {
        let mut session = self.lock_session();
        if session.generation != generation || session.state != from {
            return false;
        }
        self.set_state(&mut session, to);
        true
    }

    fn adopt_device(&self, generation: u64, device: &T::Device) -> bool {
        let mut session = self.lock_session();
        if session.generation != generation || session.state != ConnectionState::Discovering {
            return false;
        }
        session.device = Some(device.clone());
        self.set_state(&mut session, ConnectionState::Connecting);
        true
    }

    fn announce_connected(&self, generation: u64, identity: DeviceIdentity) -> bool {
        let mut session = self.lock_session();
        if session.generation != generation || session.state != ConnectionState::Connecting {
            return false;
        }
        session.announced = true;
        self.set_state(&mut session, ConnectionState::Subscribing);
        info!(device_id = identity.device_id(), "connected to heart-rate sensor");
        self.emit(SessionEvent::DeviceConnected(identity));
        true
    }

    fn forward_notification(&self, generation: u64, payload: Vec<u8>) {
        let decoded = MeasurementDecoder::decode(&payload);

        let session = self.lock_session();
        if session.generation != generation || session.state != ConnectionState::Active {
            trace!("dropping notification for a session that is no longer active");
            return;
        }
        match decoded {
            Ok(reading) => {
                debug!(heart_rate_bpm = reading.heart_rate_bpm(), "reading received");
                self.emit(SessionEvent::ReadingReceived(reading));
            }
            Err(error) => {
                warn!(%error, payload_len = payload.len(), "skipping undecodable notification");
                self.emit(SessionEvent::ReadingRejected { payload, error });
            }
        }
    }

    #[instrument(skip(self, cancel), level = "info")]
    async fn drive(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let mut device = None;
        let result = self.run_session(generation, &cancel, &mut device).await;
        self.finish(generation, device, result).await;
    }

    async fn run_session(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        device_slot: &mut Option<T::Device>,
    ) -> Result<Outcome, TransportError> {
        let profile = self.config.profile();
        let filter = self.config.device_filter();
        debug!(%filter, "requesting device");
        let Some(device) = until_cancelled(cancel, self.transport.request_device(&filter)).await?
        else {
            return Ok(Outcome::Stopped);
        };
        *device_slot = Some(device.clone());
        if !self.adopt_device(generation, &device) {
            return Ok(Outcome::Stopped);
        }

        if until_cancelled(cancel, self.transport.connect_gatt(&device))
            .await?
            .is_none()
        {
            return Ok(Outcome::Stopped);
        }
        let identity = self.transport.device_identity(&device);
        if !self.announce_connected(generation, identity) {
            return Ok(Outcome::Stopped);
        }

        let Some(service) = until_cancelled(
            cancel,
            self.transport.get_service(&device, profile.service_uuid()),
        )
        .await?
        else {
            return Ok(Outcome::Stopped);
        };
        let Some(characteristic) = until_cancelled(
            cancel,
            self.transport
                .get_characteristic(&service, profile.characteristic_uuid()),
        )
        .await?
        else {
            return Ok(Outcome::Stopped);
        };
        let Some(mut notifications) =
            until_cancelled(cancel, self.transport.subscribe(&device, &characteristic)).await?
        else {
            return Ok(Outcome::Stopped);
        };
        if !self.advance(
            generation,
            ConnectionState::Subscribing,
            ConnectionState::Active,
        ) {
            return Ok(Outcome::Stopped);
        }
        info!(characteristic = %profile.characteristic(), "notifications started");

        let outcome = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Outcome::Stopped,
                maybe_event = notifications.next() => match maybe_event {
                    Some(TransportEvent::Notification(payload)) => {
                        self.forward_notification(generation, payload);
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        break Outcome::PeerDisconnected;
                    }
                },
            }
        };
        Ok(outcome)
    }

    async fn finish(
        &self,
        generation: u64,
        device: Option<T::Device>,
        result: Result<Outcome, TransportError>,
    ) {
        let peer_disconnected = matches!(result, Ok(Outcome::PeerDisconnected));
        if let Some(device) = &device
            && !peer_disconnected
            && let Err(error) = self.transport.disconnect(device).await
        {
            debug!(?error, "failed to disconnect cleanly");
        }

        let mut session = self.lock_session();
        if session.generation != generation || session.state.is_idle() {
            debug!("session already released");
            return;
        }

        session.device = None;
        self.set_state(&mut session, ConnectionState::Idle);
        match result {
            Ok(Outcome::Stopped) => info!("session stopped"),
            Ok(Outcome::PeerDisconnected) => info!("device disconnected"),
            Err(error) => {
                warn!(%error, "session failed");
                self.emit(SessionEvent::SessionFailed(error));
            }
        }
        if std::mem::take(&mut session.announced) {
            self.emit(SessionEvent::DeviceDisconnected);
        }
    }
}

/// Awaits `operation` unless `cancel` fires first, in which case the
/// operation is dropped and `None` is returned.
async fn until_cancelled<F, V>(
    cancel: &CancellationToken,
    operation: F,
) -> Result<Option<V>, TransportError>
where
    F: Future<Output = Result<V, TransportError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(None),
        result = operation => result.map(Some),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_config_filters_on_heart_rate_service() {
        let filter = SessionConfig::default().device_filter();
        assert_eq!(
            "0000180d-0000-1000-8000-00805f9b34fb",
            filter.service().to_string()
        );
        assert_eq!(None, filter.name_prefix());
    }

    #[test]
    fn builder_sets_name_prefix() {
        let config = SessionConfig::builder().name_prefix("Polar").build();
        assert_eq!(Some("Polar"), config.device_filter().name_prefix());
        assert_eq!(GattProfile::HEART_RATE, config.profile());
    }
}
