use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use hrm::{
    ConnectionState, FailurePoint, FakeArgs, FakeTransport, MeasurementDecodeError,
    MeasurementField, SessionConfig, SessionController, SessionError, SessionEvent,
    TransportError,
};

const POLAR: &str = "hci0|AA:BB:CC|Polar H10|-50|180d";

type Controller = SessionController<FakeTransport>;

fn controller(fake: FakeArgs) -> (Controller, UnboundedReceiver<SessionEvent>, FakeTransport) {
    controller_with_config(fake, SessionConfig::default())
}

fn controller_with_config(
    fake: FakeArgs,
    config: SessionConfig,
) -> (Controller, UnboundedReceiver<SessionEvent>, FakeTransport) {
    let transport = hrm::fake_transport(fake);
    let (controller, events) = SessionController::new(transport.clone(), config);
    (controller, events, transport)
}

async fn next_event(events: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("an event should arrive")
        .expect("the event channel should stay open")
}

#[tokio::test(start_paused = true)]
async fn session_streams_readings_until_peer_disconnects() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .notifications("0048,16486400C800")?
        .build();
    let (controller, mut events, transport) = controller(fake);

    controller.start()?;

    assert_matches!(
        next_event(&mut events).await,
        SessionEvent::DeviceConnected(device) if device.local_name() == Some("Polar H10")
    );
    assert_matches!(
        next_event(&mut events).await,
        SessionEvent::ReadingReceived(reading)
            if reading.heart_rate_bpm() == 72 && reading.sensor_contact().is_none()
    );
    let SessionEvent::ReadingReceived(reading) = next_event(&mut events).await else {
        panic!("expected a second reading");
    };
    assert_eq!(&[100, 200][..], reading.rr_intervals());
    assert_matches!(next_event(&mut events).await, SessionEvent::DeviceDisconnected);

    assert_eq!(ConnectionState::Idle, controller.state());
    assert_eq!(0, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_after_peer_disconnect_is_a_no_op() -> anyhow::Result<()> {
    let fake = FakeArgs::builder().scan(POLAR)?.notifications("0048")?.build();
    let (controller, mut events, transport) = controller(fake);

    controller.start()?;
    while !matches!(next_event(&mut events).await, SessionEvent::DeviceDisconnected) {}

    controller.stop();
    controller.wait_until_idle().await;

    assert_eq!(ConnectionState::Idle, controller.state());
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(0, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_while_discovering_returns_to_idle_without_events() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .discovery_delay(Duration::from_secs(10))
        .build();
    let (controller, mut events, transport) = controller(fake);

    controller.start()?;
    tokio::task::yield_now().await;
    assert_eq!(ConnectionState::Discovering, controller.state());

    controller.stop();
    assert_eq!(ConnectionState::Idle, controller.state());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ConnectionState::Idle, controller.state());
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(0, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_while_active_disconnects_once_and_silences_readings() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .notifications("0048,004A,004C")?
        .notification_interval(Duration::from_secs(1))
        .stay_connected(true)
        .build();
    let (controller, mut events, transport) = controller(fake);

    controller.start()?;
    assert_matches!(next_event(&mut events).await, SessionEvent::DeviceConnected(_));
    assert_matches!(next_event(&mut events).await, SessionEvent::ReadingReceived(_));
    assert_eq!(ConnectionState::Active, controller.state());

    controller.stop();
    assert_eq!(ConnectionState::Disconnecting, controller.state());
    controller.wait_until_idle().await;

    assert_matches!(next_event(&mut events).await, SessionEvent::DeviceDisconnected);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(1, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn truncated_notification_is_rejected_and_session_stays_active() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .notifications("01,0048")?
        .stay_connected(true)
        .build();
    let (controller, mut events, transport) = controller(fake);

    controller.start()?;
    assert_matches!(next_event(&mut events).await, SessionEvent::DeviceConnected(_));
    let SessionEvent::ReadingRejected { payload, error } = next_event(&mut events).await else {
        panic!("expected the flags-only value to be rejected");
    };
    assert_eq!(vec![0x01], payload);
    assert_eq!(
        MeasurementDecodeError::Truncated {
            field: MeasurementField::HeartRate,
            needed: 2,
            available: 0,
        },
        error
    );
    assert_matches!(
        next_event(&mut events).await,
        SessionEvent::ReadingReceived(reading) if reading.heart_rate_bpm() == 72
    );
    assert_eq!(ConnectionState::Active, controller.state());

    controller.stop();
    controller.wait_until_idle().await;
    assert_eq!(1, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failure_after_connect_reports_error_then_disconnect() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .fail_at(FailurePoint::Subscribe)
        .build();
    let (controller, mut events, transport) = controller(fake);

    controller.start()?;

    assert_matches!(next_event(&mut events).await, SessionEvent::DeviceConnected(_));
    assert_matches!(
        next_event(&mut events).await,
        SessionEvent::SessionFailed(TransportError::InjectedFailure {
            step: FailurePoint::Subscribe
        })
    );
    assert_matches!(next_event(&mut events).await, SessionEvent::DeviceDisconnected);
    assert_eq!(ConnectionState::Idle, controller.state());
    assert_eq!(1, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failure_before_connect_is_not_paired_with_disconnect() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .fail_at(FailurePoint::Connect)
        .build();
    let (controller, mut events, transport) = controller(fake);

    controller.start()?;

    assert_matches!(
        next_event(&mut events).await,
        SessionEvent::SessionFailed(TransportError::InjectedFailure {
            step: FailurePoint::Connect
        })
    );
    controller.wait_until_idle().await;
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(1, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn discovery_without_a_match_fails() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan("hci0|AA:BB:CC|Polar H10|-50|180d;hci0|DD:EE:FF|Speaker|-60|-")?
        .build();
    let config = SessionConfig::builder().name_prefix("Wahoo").build();
    let (controller, mut events, transport) = controller_with_config(fake, config);

    controller.start()?;

    assert_matches!(
        next_event(&mut events).await,
        SessionEvent::SessionFailed(TransportError::NoMatchingFixtureDevice { .. })
    );
    assert_eq!(0, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn name_prefix_selects_the_matching_sensor() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan("hci0|AA:BB:CC|Polar H10|-50|180d;hci1|11:22:33|Wahoo TICKR|-70|180d")?
        .build();
    let config = SessionConfig::builder().name_prefix("Wahoo").build();
    let (controller, mut events, _transport) = controller_with_config(fake, config);

    controller.start()?;

    assert_matches!(
        next_event(&mut events).await,
        SessionEvent::DeviceConnected(device) if device.device_id() == "11:22:33"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn start_is_rejected_while_a_session_is_in_progress() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .discovery_delay(Duration::from_secs(5))
        .build();
    let (controller, _events, _transport) = controller(fake);

    controller.start()?;

    assert_eq!(
        Err(SessionError::AlreadyStarted {
            state: ConnectionState::Discovering
        }),
        controller.start()
    );
    controller.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn controller_can_start_again_after_returning_to_idle() -> anyhow::Result<()> {
    let fake = FakeArgs::builder().scan(POLAR)?.notifications("0048")?.build();
    let (controller, mut events, _transport) = controller(fake);

    for _ in 0..2 {
        controller.start()?;
        assert_matches!(next_event(&mut events).await, SessionEvent::DeviceConnected(_));
        assert_matches!(next_event(&mut events).await, SessionEvent::ReadingReceived(_));
        assert_matches!(next_event(&mut events).await, SessionEvent::DeviceDisconnected);
        controller.wait_until_idle().await;
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_while_connecting_disconnects_without_announcing() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .connect_delay(Duration::from_secs(10))
        .build();
    let (controller, mut events, transport) = controller(fake);
    let mut states = controller.watch_state();

    controller.start()?;
    states
        .wait_for(|state| *state == ConnectionState::Connecting)
        .await?;

    controller.stop();
    assert_eq!(ConnectionState::Disconnecting, controller.state());
    controller.wait_until_idle().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ConnectionState::Idle, controller.state());
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(1, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_while_subscribing_pairs_connect_with_one_disconnect() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .subscribe_delay(Duration::from_secs(10))
        .stay_connected(true)
        .build();
    let (controller, mut events, transport) = controller(fake);
    let mut states = controller.watch_state();

    controller.start()?;
    states
        .wait_for(|state| *state == ConnectionState::Subscribing)
        .await?;

    controller.stop();
    assert_eq!(ConnectionState::Disconnecting, controller.state());
    controller.wait_until_idle().await;

    assert_matches!(next_event(&mut events).await, SessionEvent::DeviceConnected(_));
    assert_matches!(next_event(&mut events).await, SessionEvent::DeviceDisconnected);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(1, transport.disconnect_calls());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn state_watch_observes_each_connect_step() -> anyhow::Result<()> {
    let step = Duration::from_secs(1);
    let fake = FakeArgs::builder()
        .scan(POLAR)?
        .notifications("0048")?
        .discovery_delay(step)
        .connect_delay(step)
        .subscribe_delay(step)
        .stay_connected(true)
        .build();
    let (controller, _events, _transport) = controller(fake);
    let mut states = controller.watch_state();

    controller.start()?;
    let mut observed = Vec::new();
    while observed.last() != Some(&ConnectionState::Active) {
        states.changed().await?;
        observed.push(*states.borrow_and_update());
    }

    assert_eq!(
        vec![
            ConnectionState::Discovering,
            ConnectionState::Connecting,
            ConnectionState::Subscribing,
            ConnectionState::Active,
        ],
        observed
    );
    controller.stop();
    controller.wait_until_idle().await;
    assert_eq!(ConnectionState::Idle, *states.borrow());
    Ok(())
}
