mod common;

use pylonbms_lib::client::PylonBms;
use pylonbms_lib::protocol::{Command, Frame, Variant, CID1_BATTERY, VERSION_SOK};
use pylonbms_lib::transport::TcpConnector;
use pylonbms_lib::Error;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answers every connection with `reply(request)`, one request per connection.
async fn fake_bms<F>(reply: F) -> TcpConnector
where
    F: Fn(&Frame) -> Vec<u8> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut chunk = [0u8; 64];
            while !request.contains(&b'\r') {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(received) => request.extend_from_slice(&chunk[..received]),
                }
            }
            let Ok(frame) = Frame::decode(&request) else {
                continue;
            };
            let _ = stream.write_all(&reply(&frame)).await;
        }
    });
    let mut connector = TcpConnector::new("127.0.0.1", port);
    connector.set_read_timeout(Duration::from_millis(500));
    connector
}

#[tokio::test]
async fn analog_values_of_pack() {
    let connector = fake_bms(|request| {
        assert_eq!(request.command, Command::AnalogValues as u8);
        common::analog_response(request.address, &common::scenario_window())
    })
    .await;
    let bms = PylonBms::new(connector, Variant::Standard);
    let snapshot = bms.get_analog_values(2).await.unwrap();
    assert_eq!(snapshot.cells.len(), 16);
    assert_eq!(snapshot.state_of_charge, 74);
}

#[tokio::test]
async fn ambiguous_analog_values_carry_provisional_snapshot() {
    let connector = fake_bms(|request| {
        let mut window = vec![0xd9];
        window.extend([0xFF; 32]);
        window.extend(common::table(&common::TEMPERATURES));
        window.extend(common::Scalars::default().bytes());
        common::analog_response(request.address, &window)
    })
    .await;
    let bms = PylonBms::new(connector, Variant::Standard);
    match bms.get_analog_values(1).await {
        Err(Error::StructuralAmbiguity(ambiguity)) => {
            assert_eq!(ambiguity.provisional.cells.len(), 16);
            assert_eq!(ambiguity.provisional.cycle_count, 42);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn device_info_falls_back_for_missing_values() {
    let connector = fake_bms(|request| match request.command {
        0x90 => common::response(0x00, vec![0x02]),
        0xC1 => common::response(0x00, b"V1.3\0\0\0".to_vec()),
        _ => common::response(0x04, vec![]),
    })
    .await;
    let bms = PylonBms::new(connector, Variant::Standard);
    let info = bms.get_device_info().await;
    assert_eq!(info.pack_count, 2);
    assert_eq!(info.firmware_version, "V1.3");
    assert_eq!(info.barcode, "STANDARD_BMS");
    assert_eq!(info.manufacturer, "Pylontech");
    assert_eq!(info.variant, Variant::Standard);
}

#[tokio::test]
async fn alarm_info_of_pack() {
    let connector = fake_bms(|_| common::response(0x00, common::alarm_info())).await;
    let bms = PylonBms::new(connector, Variant::Standard);
    let alarms = bms.get_alarm_info(1).await.unwrap().unwrap();
    assert_eq!(alarms.cell_states.len(), 16);
    let summary = alarms.summary();
    assert_eq!(summary.protect, "Normal");
    assert_eq!(summary.system, "Charge_MOS, Discharge_MOS");
}

#[tokio::test]
async fn short_alarm_info_is_unsupported() {
    let connector = fake_bms(|_| common::response(0x00, vec![0x01, 0x00])).await;
    let bms = PylonBms::new(connector, Variant::Standard);
    assert!(bms.get_alarm_info(1).await.unwrap().is_none());
}

#[tokio::test]
async fn error_code_from_other_variant() {
    let connector = fake_bms(|request| {
        Frame::new(VERSION_SOK, request.address, CID1_BATTERY, 0x02, vec![]).unwrap().encode()
    })
    .await;
    let bms = PylonBms::new(connector, Variant::Standard);
    let err = bms.get_pack_count().await.unwrap_err();
    assert!(matches!(
        err,
        Error::VariantMismatch {
            reported: Variant::Sok,
            ..
        }
    ));
}
