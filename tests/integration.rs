//! Integration tests for mmdvm-link.
//!
//! A scripted modem sits on the far end of an in-memory duplex stream; the
//! host runs its real reader, writer and scheduler tasks against it.

mod common;

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use common::{drain_events, eventually, mock_modem, start_host};
use mmdvm_link::arbiter::{ArbiterState, HangConfig, SwitchTrigger};
use mmdvm_link::codec::{Ax25Params, ModeParams, ModemLevels};
use mmdvm_link::protocol::{CommandType, DataChannel, FrameKind, Mode, NakCode};
use mmdvm_link::session::{CommandOutcome, DataOutcome};
use mmdvm_link::status::LinkEvent;
use mmdvm_link::{Host, LinkError};

/// Handshake order and wire layout.
#[tokio::test(start_paused = true)]
async fn test_initialization_sequence() {
    let (transport, modem) = mock_modem();
    let host = Host::builder()
        .forward(Mode::Dmr)
        .forward(Mode::Ysf)
        .levels(ModemLevels::default())
        .start(transport)
        .await
        .unwrap();

    let frames = modem.frames();
    let types: Vec<u8> = frames.iter().take(4).map(|f| f.frame_type).collect();
    assert_eq!(types, vec![0x00, 0x02, 0x04, 0x03]);

    let set_config = frames[1].encode().unwrap();
    assert_eq!(&set_config[..4], &[0xE0, 0x00, 0x18, 0x02]);
    // DMR and YSF enabled.
    assert_eq!(set_config[4 + 19], 0x06);

    assert_eq!(frames[2].payload.len(), 11);
    assert_eq!(&frames[3].payload[..], &[0x00]);

    assert_eq!(host.version().protocol, 2);
    assert_eq!(host.version().description, "MMDVM mock 20240101");
    assert_eq!(host.state(), ArbiterState::Idle);
}

/// Per-mode parameters follow set-config, for enabled modes the firmware
/// supports.
#[tokio::test(start_paused = true)]
async fn test_mode_params_pushed_after_config() {
    let (transport, modem) = mock_modem();
    // DMR and YSF only; no AX.25.
    modem.set_capabilities(0x06, 0x00);
    let _host = Host::builder()
        .forward(Mode::Dmr)
        .forward(Mode::Ysf)
        .forward(Mode::Ax25)
        .mode_params(ModeParams::Dmr { colour_code: 3 })
        .mode_params(ModeParams::Ax25(Ax25Params::default()))
        .mode_params(ModeParams::P25 { tx_hang: 5 })
        .start(transport)
        .await
        .unwrap();

    let types: Vec<u8> = modem.frames().iter().take(4).map(|f| f.frame_type).collect();
    assert_eq!(types, vec![0x00, 0x02, 0x05, 0x03]);
    assert_eq!(&modem.frames_of(0x05)[0].payload[..], &[3]);
    assert!(modem.frames_of(0x0B).is_empty());
    assert!(modem.frames_of(0x07).is_empty());
}

/// Without levels configured, set-modem-config is skipped.
#[tokio::test(start_paused = true)]
async fn test_initialization_without_levels() {
    let (_host, modem) = start_host(Host::builder().forward(Mode::P25)).await;

    let types: Vec<u8> = modem.frames().iter().take(3).map(|f| f.frame_type).collect();
    assert_eq!(types, vec![0x00, 0x02, 0x03]);
}

/// The handshake fails cleanly when the modem never answers.
#[tokio::test(start_paused = true)]
async fn test_silent_modem_fails_handshake() {
    let (transport, modem) = mock_modem();
    modem.silence(0x00, usize::MAX);

    let result = Host::builder().forward(Mode::Ysf).start(transport).await;

    assert!(result.is_err());
    assert!(modem.frames_of(0x00).len() > 1, "version query retried");
}

#[tokio::test(start_paused = true)]
async fn test_explicit_switch_routes_rf_to_bridge() {
    let (mut host, modem) = start_host(Host::builder().forward(Mode::Dmr)).await;
    let mut dmr = host.take_endpoint(Mode::Dmr).unwrap();

    host.request_mode(Mode::Dmr).await.unwrap();
    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Dmr });
    assert_eq!(modem.mode(), Mode::Dmr.as_u8());

    modem.send_rf(DataChannel::Dmr2, &[0x55; 33]);
    let frame = dmr.recv().await.unwrap();
    assert_eq!(frame[0], 2);
    assert_eq!(frame.len(), 34);
}

/// Network traffic for an idle link selects the mode and is transmitted
/// once the modem has switched.
#[tokio::test(start_paused = true)]
async fn test_network_traffic_triggers_switch() {
    let (mut host, modem) = start_host(Host::builder().forward(Mode::M17)).await;
    let m17 = host.take_endpoint(Mode::M17).unwrap();

    m17.send(Bytes::from_static(b"m17-stream")).await.unwrap();

    assert!(eventually(|| !modem.frames_of(0x27).is_empty()).await);
    let frames = modem.frames();
    let set_mode = frames
        .iter()
        .position(|f| f.frame_type == 0x03 && f.payload[..] == [Mode::M17.as_u8()])
        .unwrap();
    let data = frames.iter().position(|f| f.frame_type == 0x27).unwrap();
    assert!(set_mode < data);
    assert_eq!(&frames[data].payload[..], b"m17-stream");
    assert_eq!(host.stats().replayed, 1);
}

/// DMR under transmit load, then YSF traffic arrives: the DMR queue is
/// drained before set-mode(YSF), and slot-1 traffic arriving mid-switch never
/// reaches the YSF bridge.
#[tokio::test(start_paused = true)]
async fn test_switch_under_load() {
    let (mut host, modem) =
        start_host(Host::builder().forward(Mode::Dmr).forward(Mode::Ysf)).await;
    let dmr = host.take_endpoint(Mode::Dmr).unwrap();
    let mut ysf = host.take_endpoint(Mode::Ysf).unwrap();

    host.request_mode(Mode::Dmr).await.unwrap();

    for i in 0..16u8 {
        let mut payload = vec![1u8];
        payload.extend_from_slice(&[i; 33]);
        dmr.send(Bytes::from(payload)).await.unwrap();
    }
    assert!(eventually(|| modem.frames_of(0x22).len() >= 2).await);

    modem.send_rf_batch(&[
        (DataChannel::Ysf, b"ysf-voice"),
        (DataChannel::Dmr1, b"late-slot-1"),
    ]);

    assert!(eventually(|| host.state() == ArbiterState::Active { mode: Mode::Ysf }).await);

    let frames = modem.frames();
    let set_ysf = frames
        .iter()
        .position(|f| f.frame_type == 0x03 && f.payload[..] == [Mode::Ysf.as_u8()])
        .unwrap();
    if let Some(last_dmr) = frames.iter().rposition(|f| f.frame_type == 0x22) {
        assert!(last_dmr < set_ysf, "DMR data after set-mode(YSF)");
    }

    let stats = host.stats();
    let dmr_sent = frames.iter().filter(|f| f.frame_type == 0x22).count() as u64;
    assert_eq!(dmr_sent + stats.drain_lost, 16);
    assert_eq!(stats.dropped_outgoing, 1);

    assert_eq!(ysf.recv().await.unwrap(), Bytes::from_static(b"ysf-voice"));
    let extra = tokio::time::timeout(Duration::from_millis(50), ysf.recv()).await;
    assert!(extra.is_err(), "YSF bridge received a second frame");
}

/// A refused set-mode leaves the previous mode in place.
#[tokio::test(start_paused = true)]
async fn test_set_mode_nak_keeps_prior_mode() {
    let (host, modem) =
        start_host(Host::builder().forward(Mode::Dmr).forward(Mode::Ysf)).await;
    let mut events = host.events();
    modem.refuse_mode(Mode::Ysf, NakCode::WrongMode);

    host.request_mode(Mode::Dmr).await.unwrap();
    let result = host.request_mode(Mode::Ysf).await;

    assert!(matches!(
        result,
        Err(LinkError::ModeSwitch {
            target: Mode::Ysf,
            ..
        })
    ));
    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Dmr });
    assert_eq!(host.stats().failed_switches, 1);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        LinkEvent::SwitchFailed {
            target: Mode::Ysf,
            current: Mode::Dmr,
            ..
        }
    )));
    assert!(events.contains(&LinkEvent::CommandRejected {
        command: CommandType::SetMode,
        code: NakCode::WrongMode,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_mode_rejected() {
    let (host, _modem) = start_host(Host::builder().forward(Mode::Dmr)).await;
    let result = host.request_mode(Mode::Nxdn).await;
    assert!(matches!(result, Err(LinkError::ProtocolDisabled(Mode::Nxdn))));
}

/// Both hang timers expire → exactly one return to IDLE.
#[tokio::test(start_paused = true)]
async fn test_hang_timer_returns_to_idle_once() {
    let hang = HangConfig {
        rf: Duration::from_secs(2),
        net: Duration::from_secs(1),
    };
    let (host, modem) = start_host(Host::builder().forward(Mode::Dmr).hang(Mode::Dmr, hang)).await;
    let mut events = host.events();

    host.request_mode(Mode::Dmr).await.unwrap();
    let remaining = host.arbiter().hang_remaining(Instant::now()).unwrap();
    assert!(remaining <= Duration::from_secs(2));
    assert!(remaining > Duration::from_millis(1500));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Dmr });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(host.state(), ArbiterState::Idle);

    tokio::time::sleep(Duration::from_secs(10)).await;

    // Handshake IDLE, DMR, hang IDLE.
    assert_eq!(modem.set_mode_requests(), vec![0x00, 0x02, 0x00]);
    let hang_returns = drain_events(&mut events)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                LinkEvent::ModeChanged {
                    to: Mode::Idle,
                    trigger: SwitchTrigger::HangTimer,
                    ..
                }
            )
        })
        .count();
    assert_eq!(hang_returns, 1);
}

/// RF traffic keeps the mode alive.
#[tokio::test(start_paused = true)]
async fn test_rf_traffic_extends_hang() {
    let hang = HangConfig {
        rf: Duration::from_secs(2),
        net: Duration::from_secs(1),
    };
    let (host, modem) = start_host(Host::builder().forward(Mode::Ysf).hang(Mode::Ysf, hang)).await;

    host.request_mode(Mode::Ysf).await.unwrap();
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        modem.send_rf(DataChannel::Ysf, b"ysf");
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Ysf });
}

/// Fixed mode: entered at startup and never left on a timer.
#[tokio::test(start_paused = true)]
async fn test_fixed_mode_holds() {
    let hang = HangConfig {
        rf: Duration::from_secs(1),
        net: Duration::from_secs(1),
    };
    let (host, modem) = start_host(
        Host::builder()
            .forward(Mode::Dmr)
            .hang(Mode::Dmr, hang)
            .fixed_mode(true),
    )
    .await;

    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Dmr });

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Dmr });
    assert_eq!(modem.set_mode_requests(), vec![0x00, 0x02]);
}

/// Fixed mode suppresses RF and network triggers.
#[tokio::test(start_paused = true)]
async fn test_fixed_mode_suppresses_triggers() {
    let (mut host, modem) = start_host(
        Host::builder()
            .forward(Mode::Dmr)
            .forward(Mode::Ysf)
            .fixed_mode(true),
    )
    .await;
    let ysf = host.take_endpoint(Mode::Ysf).unwrap();

    modem.send_rf(DataChannel::Dmr1, &[0x11; 33]);
    ysf.send(Bytes::from_static(b"ysf")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(host.state(), ArbiterState::Idle);
    assert_eq!(modem.set_mode_requests(), vec![0x00]);
    assert_eq!(host.stats().dropped_inactive, 2);
}

/// Fixed mode with a mode active: traffic for another mode does not move it.
#[tokio::test(start_paused = true)]
async fn test_fixed_mode_holds_active_mode() {
    let (mut host, modem) = start_host(
        Host::builder()
            .forward(Mode::Dmr)
            .forward(Mode::Ysf)
            .fixed_mode(true),
    )
    .await;
    let dmr = host.take_endpoint(Mode::Dmr).unwrap();

    host.request_mode(Mode::Ysf).await.unwrap();

    modem.send_rf(DataChannel::Dmr1, &[0x11; 33]);
    dmr.send(Bytes::from_static(&[1, 0x22])).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Ysf });
    assert_eq!(modem.set_mode_requests(), vec![0x00, 0x03]);
    assert_eq!(host.stats().dropped_inactive, 2);
    assert!(modem.frames_of(0x22).is_empty());
}

/// A second command while one is pending is refused without disturbing it.
#[tokio::test(start_paused = true)]
async fn test_command_busy_exclusivity() {
    let (host, modem) = start_host(Host::builder().forward(Mode::Dmr)).await;
    modem.silence(0x01, 1);

    let session = host.session().clone();
    let first = tokio::spawn(async move { session.send_command(CommandType::GetStatus, &[]).await });
    assert!(eventually(|| host.session().pending_command().is_some()).await);

    let second = host
        .session()
        .send_command(CommandType::SetMode, &[0x02])
        .await;
    assert!(matches!(
        second,
        Err(LinkError::CommandBusy(CommandType::GetStatus))
    ));

    assert_eq!(first.await.unwrap().unwrap(), CommandOutcome::Timeout);
    assert!(modem.frames_of(0x03).len() == 1, "refused command reached the modem");
}

/// Repeated busy NAKs back off exponentially up to the cap.
#[tokio::test(start_paused = true)]
async fn test_busy_backoff_is_capped() {
    let (host, modem) = start_host(
        Host::builder()
            .forward(Mode::Ysf)
            .keepalive_interval(Duration::from_secs(3600)),
    )
    .await;
    modem.busy(DataChannel::Ysf);
    let mut events = host.events();

    let session = host.session();
    let mut delays = Vec::new();
    for _ in 0..8 {
        if let Some(at) = session.accounting().retry_at(DataChannel::Ysf) {
            tokio::time::sleep_until(at).await;
        }
        let outcome = session
            .send_data(DataChannel::Ysf, Bytes::from_static(&[0x00; 10]))
            .await
            .unwrap();
        assert_eq!(outcome, DataOutcome::Accepted);

        loop {
            if let LinkEvent::BufferBusy { channel, retry_ms } = events.recv().await.unwrap() {
                assert_eq!(channel, DataChannel::Ysf);
                delays.push(retry_ms);
                break;
            }
        }
    }

    assert_eq!(delays, vec![25, 50, 100, 200, 400, 800, 800, 800]);
}

/// A busy channel refuses further sends until its retry time.
#[tokio::test(start_paused = true)]
async fn test_busy_channel_gates_transmit() {
    let (host, modem) = start_host(Host::builder().forward(Mode::Ysf)).await;
    modem.busy(DataChannel::Ysf);

    let session = host.session();
    let payload = Bytes::from_static(&[0x00; 10]);
    session.send_data(DataChannel::Ysf, payload.clone()).await.unwrap();
    assert!(eventually(|| session.accounting().retry_at(DataChannel::Ysf).is_some()).await);

    assert_eq!(
        session.send_data(DataChannel::Ysf, payload).await.unwrap(),
        DataOutcome::Rejected(NakCode::Busy)
    );
}

/// A frame the modem answers with `NAK(busy)` is sent again once the channel
/// reopens.
#[tokio::test(start_paused = true)]
async fn test_busy_frame_retransmitted() {
    let (mut host, modem) = start_host(Host::builder().forward(Mode::Ysf)).await;
    let ysf = host.take_endpoint(Mode::Ysf).unwrap();
    host.request_mode(Mode::Ysf).await.unwrap();
    modem.busy_replies(0x24, 1);

    ysf.send(Bytes::from_static(b"ysf-frame")).await.unwrap();

    assert!(eventually(|| modem.frames_of(0x24).len() == 2).await);
    for frame in modem.frames_of(0x24) {
        assert_eq!(&frame.payload[..], b"ysf-frame");
    }
    assert_eq!(host.stats().requeued, 1);
}

/// Busy replies to handshake commands and set-mode are waited out.
#[tokio::test(start_paused = true)]
async fn test_busy_commands_retried() {
    let (transport, modem) = mock_modem();
    modem.busy_replies(0x02, 1);
    let host = Host::builder()
        .forward(Mode::Dmr)
        .start(transport)
        .await
        .unwrap();
    assert_eq!(modem.frames_of(0x02).len(), 2);

    modem.busy_replies(0x03, 2);
    host.request_mode(Mode::Dmr).await.unwrap();

    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Dmr });
    assert_eq!(modem.set_mode_requests(), vec![0x00, 0x02, 0x02, 0x02]);
}

/// Set-mode timeout, status answered, one retry succeeds.
#[tokio::test(start_paused = true)]
async fn test_set_mode_timeout_retried_after_status() {
    let (host, modem) = start_host(Host::builder().forward(Mode::Nxdn)).await;
    modem.silence(0x03, 1);

    host.request_mode(Mode::Nxdn).await.unwrap();

    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Nxdn });
    let tail: Vec<(u8, Vec<u8>)> = modem
        .frames()
        .iter()
        .filter(|f| f.frame_type == 0x03 || f.frame_type == 0x01)
        .map(|f| (f.frame_type, f.payload.to_vec()))
        .skip(1)
        .collect();
    assert_eq!(
        tail,
        vec![(0x03, vec![0x05]), (0x01, vec![]), (0x03, vec![0x05])]
    );
}

/// Set-mode and status both time out: the link is re-initialized and the
/// switch is reported as failed.
#[tokio::test(start_paused = true)]
async fn test_unresponsive_link_reinitialized() {
    let (host, modem) = start_host(Host::builder().forward(Mode::P25)).await;
    let mut events = host.events();
    modem.silence(0x03, 1);
    modem.silence(0x01, 1);

    let result = host.request_mode(Mode::P25).await;

    assert!(matches!(result, Err(LinkError::ModeSwitch { .. })));
    assert_eq!(host.state(), ArbiterState::Idle);
    assert_eq!(host.stats().reinitializations, 1);
    assert_eq!(modem.frames_of(0x00).len(), 2, "version re-queried");

    let events = drain_events(&mut events);
    assert!(events.contains(&LinkEvent::LinkUnresponsive));
    assert!(events.contains(&LinkEvent::Reinitialized));

    // The link is usable again.
    host.request_mode(Mode::P25).await.unwrap();
    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::P25 });
}

/// A failed re-initialization is fatal.
#[tokio::test(start_paused = true)]
async fn test_failed_reinitialization_is_fatal() {
    let (host, modem) = start_host(Host::builder().forward(Mode::P25)).await;
    modem.silence(0x03, 1);
    modem.silence(0x01, 1);
    modem.silence(0x00, usize::MAX);

    let result = host.request_mode(Mode::P25).await;

    assert!(matches!(result, Err(LinkError::LinkUnresponsive)));
    assert!(host.arbiter().is_failed());
    tokio::time::timeout(Duration::from_secs(1), host.wait_for_shutdown())
        .await
        .unwrap();
}

/// Two missed keep-alives re-initialize the link in the background.
#[tokio::test(start_paused = true)]
async fn test_missed_keepalives_reinitialize() {
    let (host, modem) = start_host(Host::builder().forward(Mode::Dmr)).await;
    modem.silence(0x01, 2);

    assert!(eventually(|| host.stats().reinitializations == 1).await);
    assert_eq!(modem.frames_of(0x00).len(), 2);
    assert!(!host.arbiter().is_failed());
}

/// RF traffic arriving while the link re-initializes is not delivered to the
/// mode being left.
#[tokio::test(start_paused = true)]
async fn test_reinitialization_holds_traffic() {
    let (mut host, modem) = start_host(Host::builder().forward(Mode::Dmr)).await;
    let mut dmr = host.take_endpoint(Mode::Dmr).unwrap();
    host.request_mode(Mode::Dmr).await.unwrap();

    modem.silence(0x01, 2);
    modem.silence(0x00, 2);
    assert!(eventually(|| host.state().is_switching()).await);

    modem.send_rf(DataChannel::Dmr1, &[0x11; 33]);
    assert!(eventually(|| host.stats().reinitializations == 1).await);

    assert_eq!(host.state(), ArbiterState::Idle);
    assert!(tokio::time::timeout(Duration::from_millis(100), dmr.recv())
        .await
        .is_err());
    assert_eq!(host.stats().dropped_outgoing, 1);
}

/// Lockout forces IDLE and blocks switching until it clears.
#[tokio::test(start_paused = true)]
async fn test_lockout_forces_idle() {
    let (host, modem) = start_host(Host::builder().forward(Mode::Dmr)).await;
    host.request_mode(Mode::Dmr).await.unwrap();

    modem.set_lockout(true);
    host.session().query_status().await.unwrap();
    assert!(eventually(|| host.state() == ArbiterState::Idle).await);
    assert!(host.arbiter().is_locked_out());

    assert!(host.request_mode(Mode::Dmr).await.is_err());
    modem.send_rf(DataChannel::Dmr1, &[0x11; 33]);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(host.state(), ArbiterState::Idle);

    modem.set_lockout(false);
    host.session().query_status().await.unwrap();
    assert!(eventually(|| !host.arbiter().is_locked_out()).await);
    host.request_mode(Mode::Dmr).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cw_id_while_idle() {
    let (host, modem) = start_host(
        Host::builder()
            .forward(Mode::Ysf)
            .cw_id("n0call", Duration::from_secs(600)),
    )
    .await;
    let mut events = host.events();

    tokio::time::sleep(Duration::from_secs(601)).await;

    let cw = modem.frames_of(0x0E);
    assert_eq!(cw.len(), 1);
    assert_eq!(&cw[0].payload[..], b"N0CALL");
    assert!(drain_events(&mut events).contains(&LinkEvent::CwIdSent {
        callsign: "N0CALL".into()
    }));
}

#[tokio::test(start_paused = true)]
async fn test_paging_independent_of_mode() {
    let (host, modem) = start_host(Host::builder().forward(Mode::Dmr)).await;
    host.request_mode(Mode::Dmr).await.unwrap();

    let outcome = host.send_paging(Bytes::from_static(b"page")).await.unwrap();
    assert_eq!(outcome, DataOutcome::Accepted);

    assert!(eventually(|| !modem.frames_of(0x50).is_empty()).await);
    let page = &modem.frames_of(0x50)[0];
    assert_eq!(page.kind(), FrameKind::Data(DataChannel::Pocsag));
    assert_eq!(host.state(), ArbiterState::Active { mode: Mode::Dmr });
}

#[tokio::test(start_paused = true)]
async fn test_framing_errors_reported() {
    let (host, modem) = start_host(Host::builder().forward(Mode::Dmr)).await;
    let mut events = host.events();

    modem.send_raw(vec![0x11, 0x22, 0xE0, 0x00, 0x00, 0x33]);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, LinkEvent::FramingError { .. })));
    assert!(!host.arbiter().is_failed());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_ends_host() {
    let (host, modem) = start_host(Host::builder().forward(Mode::Dmr)).await;
    let mut events = host.events();

    modem.disconnect();
    tokio::time::timeout(Duration::from_secs(1), host.wait_for_shutdown())
        .await
        .unwrap();

    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, LinkEvent::Disconnected { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_returns_modem_to_idle() {
    let (host, modem) = start_host(Host::builder().forward(Mode::Ysf)).await;
    host.request_mode(Mode::Ysf).await.unwrap();

    host.shutdown().await.unwrap();

    assert_eq!(modem.set_mode_requests().last(), Some(&0x00));
    assert_eq!(modem.mode(), 0x00);
}
