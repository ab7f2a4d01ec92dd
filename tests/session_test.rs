mod common;

use std::time::Duration;

use common::{
    drain, emg_payload, fake, fake_with, services_without, settle, wait_until, Op, PERIPHERAL_ID,
};
use myo_rs::device::Myo;
use myo_rs::error::{MyoError, TransportError};
use myo_rs::protocol::{COMMAND_CHARACTERISTIC, EMG_CHARACTERISTICS, IMU_CHARACTERISTIC};
use myo_rs::registry::Channel;
use myo_rs::session::{SessionState, Timeouts};
use myo_rs::types::{
    ClassifierMode, EmgMode, ImuMode, MyoEvent, StreamModes, VibrationType,
};

fn emg_and_imu() -> StreamModes {
    StreamModes {
        emg: EmgMode::Emg,
        imu: ImuMode::Data,
        classifier: ClassifierMode::Disabled,
        battery: false,
    }
}

// ── connect ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_discovers_and_announces() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    let mut rx = myo.events();

    myo.connect().await.unwrap();

    assert_eq!(myo.state(), SessionState::Ready);
    assert_eq!(handle.ops(), vec![Op::Connect, Op::Discover, Op::Events]);
    assert_eq!(drain(&mut rx), vec![MyoEvent::Connected(PERIPHERAL_ID.into())]);
    assert!(myo.has_channel(Channel::MotionEvent));
}

#[tokio::test]
async fn second_connect_is_refused_without_touching_transport() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    myo.connect().await.unwrap();
    handle.clear_ops();

    let err = myo.connect().await.unwrap_err();
    assert_eq!(err, MyoError::AlreadyConnected(SessionState::Ready));

    myo.arm(emg_and_imu()).await.unwrap();
    handle.clear_ops();
    let err = myo.connect().await.unwrap_err();
    assert_eq!(err, MyoError::AlreadyConnected(SessionState::Streaming));
    assert!(handle.ops().is_empty());
}

#[tokio::test]
async fn incompatible_device_is_released() {
    let (transport, handle) = fake_with(services_without(&[Channel::ImuData, Channel::EmgData2]));
    let myo = Myo::new(transport);

    let err = myo.connect().await.unwrap_err();

    assert_eq!(
        err,
        MyoError::DeviceIncompatible {
            missing: vec![Channel::EmgData2, Channel::ImuData]
        }
    );
    assert_eq!(myo.state(), SessionState::Disconnected);
    assert_eq!(handle.ops().last(), Some(&Op::Disconnect));
}

#[tokio::test]
async fn missing_optional_channels_are_tolerated() {
    let (transport, _handle) = fake_with(services_without(&[
        Channel::MotionEvent,
        Channel::EmgProcessed,
    ]));
    let myo = Myo::new(transport);

    myo.connect().await.unwrap();
    assert!(!myo.has_channel(Channel::MotionEvent));
    assert!(myo.has_channel(Channel::ImuData));
}

#[tokio::test]
async fn connect_failure_then_retry() {
    let (transport, handle) = fake();
    handle.script().connect_error = Some(TransportError::Backend("out of range".into()));
    let myo = Myo::new(transport);

    let err = myo.connect().await.unwrap_err();
    assert_eq!(
        err,
        MyoError::Connect(TransportError::Backend("out of range".into()))
    );
    assert_eq!(myo.state(), SessionState::Disconnected);

    handle.script().connect_error = None;
    myo.connect().await.unwrap();
    assert_eq!(myo.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_leaves_disconnected() {
    let (transport, handle) = fake();
    handle.script().connect_delay = Some(Duration::from_secs(60));
    let myo = Myo::with_timeouts(
        transport,
        Timeouts {
            connect: Duration::from_secs(1),
            ..Timeouts::default()
        },
    );

    let err = myo.connect().await.unwrap_err();
    assert_eq!(
        err,
        MyoError::Timeout {
            operation: "connect",
            after: Duration::from_secs(1)
        }
    );
    assert_eq!(myo.state(), SessionState::Disconnected);
    assert_eq!(handle.ops().last(), Some(&Op::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn dropped_connect_rolls_back() {
    let (transport, handle) = fake();
    handle.script().connect_delay = Some(Duration::from_secs(60));
    let myo = Myo::new(transport);

    let cancelled = tokio::time::timeout(Duration::from_millis(100), myo.connect()).await;
    assert!(cancelled.is_err());
    assert_eq!(myo.state(), SessionState::Disconnected);

    // Retry at once: the release of the abandoned link must land first.
    handle.script().connect_delay = None;
    myo.connect().await.unwrap();
    settle().await;

    assert_eq!(myo.state(), SessionState::Ready);
    assert_eq!(
        handle.ops(),
        vec![
            Op::Connect,
            Op::Disconnect,
            Op::Connect,
            Op::Discover,
            Op::Events
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_connect_wins() {
    let (transport, handle) = fake();
    handle.script().connect_delay = Some(Duration::from_secs(2));
    let myo = Myo::new(transport);
    let mut rx = myo.events();

    let (connected, disconnected) = tokio::join!(myo.connect(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let result = myo.disconnect().await;
        (result, myo.state())
    });

    assert_eq!(disconnected, (Ok(()), SessionState::Disconnected));
    assert_eq!(
        connected,
        Err(MyoError::Connect(TransportError::NotConnected))
    );
    assert_eq!(myo.state(), SessionState::Disconnected);
    assert_eq!(
        handle.ops(),
        vec![Op::Connect, Op::Disconnect, Op::Disconnect]
    );
    assert!(drain(&mut rx).is_empty());

    handle.script().connect_delay = None;
    myo.connect().await.unwrap();
    assert_eq!(myo.state(), SessionState::Ready);
}

// ── arm / disarm ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn arm_outside_ready_never_subscribes() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);

    let err = myo.arm(StreamModes::all()).await.unwrap_err();
    assert_eq!(
        err,
        MyoError::InvalidState {
            operation: "arm",
            state: SessionState::Disconnected
        }
    );
    assert!(handle.ops().is_empty());

    myo.connect().await.unwrap();
    myo.arm(emg_and_imu()).await.unwrap();
    handle.clear_ops();

    let err = myo.arm(emg_and_imu()).await.unwrap_err();
    assert_eq!(
        err,
        MyoError::InvalidState {
            operation: "arm",
            state: SessionState::Streaming
        }
    );
    assert!(handle.ops().is_empty());
}

#[tokio::test]
async fn subscriptions_complete_before_mode_is_enabled() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    myo.connect().await.unwrap();
    handle.clear_ops();

    myo.arm(emg_and_imu()).await.unwrap();

    let mut expected: Vec<Op> = EMG_CHARACTERISTICS.iter().map(|u| Op::Subscribe(*u)).collect();
    expected.push(Op::Subscribe(IMU_CHARACTERISTIC));
    expected.push(Op::Write(COMMAND_CHARACTERISTIC, vec![0x01, 0x03, 0x02, 0x01, 0x00]));
    assert_eq!(handle.ops(), expected);
    assert_eq!(myo.state(), SessionState::Streaming);
    assert_eq!(myo.modes(), emg_and_imu());
}

#[tokio::test]
async fn failed_subscribe_releases_earlier_ones() {
    let (transport, handle) = fake();
    handle.script().subscribe_error = Some((
        IMU_CHARACTERISTIC,
        TransportError::Backend("CCCD write rejected".into()),
    ));
    let myo = Myo::new(transport);
    myo.connect().await.unwrap();
    handle.clear_ops();

    let err = myo.arm(emg_and_imu()).await.unwrap_err();

    assert_eq!(
        err,
        MyoError::Transport(TransportError::Backend("CCCD write rejected".into()))
    );
    assert_eq!(myo.state(), SessionState::Ready);
    assert!(handle.writes().is_empty());
    let mut released = EMG_CHARACTERISTICS.to_vec();
    released.push(IMU_CHARACTERISTIC);
    assert_eq!(handle.unsubscribed(), released);
}

#[tokio::test]
async fn failed_enable_write_releases_subscriptions() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    myo.connect().await.unwrap();
    handle.script().write_error = Some(TransportError::Backend("write rejected".into()));

    let err = myo.arm(emg_and_imu()).await.unwrap_err();

    assert!(matches!(err, MyoError::WriteFailed(_)), "{err:?}");
    assert_eq!(myo.state(), SessionState::Ready);
    assert_eq!(handle.unsubscribed().len(), 5);
}

#[tokio::test]
async fn arm_needing_absent_channel_fails_up_front() {
    let (transport, handle) = fake_with(services_without(&[Channel::MotionEvent]));
    let myo = Myo::new(transport);
    myo.connect().await.unwrap();
    handle.clear_ops();

    let err = myo
        .arm(StreamModes {
            imu: ImuMode::Events,
            ..StreamModes::default()
        })
        .await
        .unwrap_err();

    assert_eq!(err, MyoError::ChannelUnavailable(Channel::MotionEvent));
    assert!(handle.ops().is_empty());
    assert_eq!(myo.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn dropped_arm_releases_issued_subscriptions() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    myo.connect().await.unwrap();
    handle.script().subscribe_delay = Some(Duration::from_secs(60));

    let cancelled = tokio::time::timeout(Duration::from_millis(100), myo.arm(emg_and_imu())).await;
    assert!(cancelled.is_err());
    assert_eq!(myo.state(), SessionState::Ready);

    wait_until(|| handle.unsubscribed() == vec![EMG_CHARACTERISTICS[0]]).await;
    assert!(handle.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rearm_after_dropped_arm_keeps_every_subscription() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    myo.connect().await.unwrap();
    handle.clear_ops();
    handle.script().subscribe_delay = Some(Duration::from_secs(60));

    let cancelled = tokio::time::timeout(Duration::from_millis(100), myo.arm(emg_and_imu())).await;
    assert!(cancelled.is_err());
    handle.script().subscribe_delay = None;

    myo.arm(emg_and_imu()).await.unwrap();
    settle().await;

    let mut expected = vec![
        Op::Subscribe(EMG_CHARACTERISTICS[0]),
        Op::Unsubscribe(EMG_CHARACTERISTICS[0]),
    ];
    expected.extend(EMG_CHARACTERISTICS.iter().map(|u| Op::Subscribe(*u)));
    expected.push(Op::Subscribe(IMU_CHARACTERISTIC));
    expected.push(Op::Write(COMMAND_CHARACTERISTIC, vec![0x01, 0x03, 0x02, 0x01, 0x00]));
    assert_eq!(handle.ops(), expected);
    assert_eq!(myo.state(), SessionState::Streaming);
}

#[tokio::test]
async fn disarm_unsubscribes_then_disables() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    myo.connect().await.unwrap();
    myo.arm(emg_and_imu()).await.unwrap();
    handle.clear_ops();

    myo.disarm().await.unwrap();

    let ops = handle.ops();
    assert_eq!(ops.len(), 6);
    assert!(ops[..5].iter().all(|op| matches!(op, Op::Unsubscribe(_))));
    assert_eq!(
        ops[5],
        Op::Write(COMMAND_CHARACTERISTIC, vec![0x01, 0x03, 0x00, 0x00, 0x00])
    );
    assert_eq!(myo.state(), SessionState::Ready);
    assert_eq!(myo.modes(), StreamModes::default());

    let err = myo.disarm().await.unwrap_err();
    assert!(matches!(err, MyoError::InvalidState { .. }));
}

// ── Streaming and teardown ────────────────────────────────────────────────────

#[tokio::test]
async fn notifications_flow_only_while_armed() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    let mut rx = myo.events();
    myo.connect().await.unwrap();
    drain(&mut rx);

    handle.notify(Channel::EmgData0, &emg_payload(1, 2));
    settle().await;
    assert!(drain(&mut rx).is_empty());

    myo.arm(emg_and_imu()).await.unwrap();
    handle.notify(Channel::EmgData0, &emg_payload(3, 4));
    settle().await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    let MyoEvent::Emg { channel, sample } = &events[0] else {
        panic!("expected EMG, got {:?}", events[0]);
    };
    assert_eq!(*channel, Channel::EmgData0);
    assert_eq!(sample.sequence, 0);
    assert_eq!(sample.values, [3; 8]);
}

#[tokio::test]
async fn link_loss_while_streaming_ends_session() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    let mut rx = myo.events();
    myo.connect().await.unwrap();
    myo.arm(emg_and_imu()).await.unwrap();
    drain(&mut rx);

    handle.drop_link();
    wait_until(|| myo.state() == SessionState::Disconnected).await;

    handle.notify(Channel::EmgData0, &emg_payload(5, 6));
    settle().await;
    assert_eq!(drain(&mut rx), vec![MyoEvent::Disconnected]);

    let err = myo.vibrate(VibrationType::Short).await.unwrap_err();
    assert!(matches!(err, MyoError::InvalidState { .. }));

    // A fresh session starts clean.
    myo.connect().await.unwrap();
    assert_eq!(myo.state(), SessionState::Ready);
}

#[tokio::test]
async fn link_loss_during_write_faults() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    let mut rx = myo.events();
    myo.connect().await.unwrap();
    drain(&mut rx);

    let gate = handle.hold_writes();
    let pending = myo.vibrate(VibrationType::Long);
    tokio::pin!(pending);

    let outcome = tokio::select! {
        result = &mut pending => Some(result),
        _ = async {
            wait_until(|| handle.writes().len() == 1).await;
            handle.drop_link();
            wait_until(|| myo.state() == SessionState::Faulted).await;
            handle.script().write_error = Some(TransportError::NotConnected);
            gate.notify_one();
            std::future::pending::<()>().await;
        } => None,
    };

    let err = outcome.expect("write finished").unwrap_err();
    assert!(matches!(err, MyoError::Faulted(_)), "{err:?}");
    assert_eq!(myo.state(), SessionState::Faulted);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], MyoEvent::Faulted(_)));

    handle.script().write_gate = None;
    handle.script().write_error = None;
    myo.connect().await.unwrap();
    assert_eq!(myo.state(), SessionState::Ready);
}

#[tokio::test]
async fn disconnect_while_streaming_disarms_first() {
    let (transport, handle) = fake();
    let myo = Myo::new(transport);
    let mut rx = myo.events();
    myo.connect().await.unwrap();
    myo.arm(emg_and_imu()).await.unwrap();
    drain(&mut rx);
    handle.clear_ops();

    myo.disconnect().await.unwrap();

    let ops = handle.ops();
    assert_eq!(handle.unsubscribed().len(), 5);
    assert_eq!(handle.writes(), vec![vec![0x01, 0x03, 0x00, 0x00, 0x00]]);
    assert_eq!(ops.last(), Some(&Op::Disconnect));
    assert_eq!(myo.state(), SessionState::Disconnected);
    assert_eq!(drain(&mut rx), vec![MyoEvent::Disconnected]);

    // Idempotent.
    myo.disconnect().await.unwrap();
    assert!(drain(&mut rx).is_empty());
}
