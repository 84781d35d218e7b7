use std::io::Cursor;

use nimbus_snapshot::{
    restore_frame, save_frame, DeviceId, DeviceState, SectionId, SnapshotError, SnapshotFrame,
    SNAPSHOT_ENDIANNESS_LITTLE, SNAPSHOT_MAGIC, SNAPSHOT_VERSION_V1,
};

fn sample_frame() -> SnapshotFrame {
    SnapshotFrame {
        cpu: vec![0x10; 32],
        mmu: vec![0x20; 16],
        devices: vec![
            DeviceState {
                id: DeviceId::I8042,
                version: 1,
                flags: 0,
                data: vec![0x02],
            },
            DeviceState {
                id: DeviceId::USB,
                version: 1,
                flags: 0,
                data: vec![0x01, 0x02],
            },
        ],
    }
}

fn push_section(dst: &mut Vec<u8>, id: SectionId, version: u16, flags: u16, payload: &[u8]) {
    dst.extend_from_slice(&id.0.to_le_bytes());
    dst.extend_from_slice(&version.to_le_bytes());
    dst.extend_from_slice(&flags.to_le_bytes());
    dst.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    dst.extend_from_slice(payload);
}

fn minimal_header() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SNAPSHOT_VERSION_V1.to_le_bytes());
    bytes.push(SNAPSHOT_ENDIANNESS_LITTLE);
    bytes.push(0);
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes
}

#[test]
fn frame_roundtrips_with_devices_sorted() {
    let frame = sample_frame();
    let mut cursor = Cursor::new(Vec::new());
    save_frame(&mut cursor, &frame).unwrap();
    let restored = restore_frame(&mut Cursor::new(cursor.into_inner())).unwrap();

    assert_eq!(restored.cpu, frame.cpu);
    assert_eq!(restored.mmu, frame.mmu);

    // Devices come back sorted by (id, version, flags).
    let keys: Vec<_> = restored.devices.iter().map(DeviceState::key).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(restored.devices.len(), 2);
    assert_eq!(restored.devices[0].id, DeviceId::USB);
    assert_eq!(restored.devices[1].id, DeviceId::I8042);
}

#[test]
fn save_rejects_duplicate_device_entries() {
    let mut frame = sample_frame();
    frame.devices.push(frame.devices[0].clone());

    let mut cursor = Cursor::new(Vec::new());
    let err = save_frame(&mut cursor, &frame).unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::Corrupt("duplicate device entry (id/version/flags must be unique)")
    ));
}

#[test]
fn restore_rejects_duplicate_device_entries() {
    let mut bytes = minimal_header();
    push_section(&mut bytes, SectionId::CPU, 1, 0, &[0x10]);

    let dev = DeviceState {
        id: DeviceId::USB,
        version: 1,
        flags: 0,
        data: vec![0xAA],
    };
    let mut devices_payload = 2u32.to_le_bytes().to_vec();
    dev.encode(&mut devices_payload).unwrap();
    dev.encode(&mut devices_payload).unwrap();
    push_section(&mut bytes, SectionId::DEVICES, 1, 0, &devices_payload);

    let err = restore_frame(&mut Cursor::new(bytes)).unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::Corrupt("duplicate device entry (id/version/flags must be unique)")
    ));
}

#[test]
fn restore_rejects_duplicate_sections() {
    for (id, message) in [
        (SectionId::CPU, "duplicate CPU section"),
        (SectionId::MMU, "duplicate MMU section"),
        (SectionId::DEVICES, "duplicate DEVICES section"),
    ] {
        let mut bytes = minimal_header();
        push_section(&mut bytes, SectionId::CPU, 1, 0, &[0x10]);
        let payload: &[u8] = if id == SectionId::DEVICES {
            &[0, 0, 0, 0]
        } else {
            &[0x11]
        };
        if id != SectionId::CPU {
            push_section(&mut bytes, id, 1, 0, payload);
        }
        push_section(&mut bytes, id, 1, 0, payload);

        let err = restore_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert!(
            matches!(err, SnapshotError::Corrupt(m) if m == message),
            "expected {message}, got {err:?}"
        );
    }
}

#[test]
fn restore_rejects_truncated_device_entry() {
    let mut bytes = minimal_header();
    push_section(&mut bytes, SectionId::CPU, 1, 0, &[0x10]);

    // One device entry claiming 1 byte of data with none present.
    let mut devices_payload = 1u32.to_le_bytes().to_vec();
    devices_payload.extend_from_slice(&DeviceId::USB.0.to_le_bytes());
    devices_payload.extend_from_slice(&1u16.to_le_bytes());
    devices_payload.extend_from_slice(&0u16.to_le_bytes());
    devices_payload.extend_from_slice(&1u64.to_le_bytes());
    push_section(&mut bytes, SectionId::DEVICES, 1, 0, &devices_payload);

    let err = restore_frame(&mut Cursor::new(bytes)).unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::Corrupt("device entry truncated")
    ));
}

#[test]
fn restore_rejects_excessive_device_count() {
    let mut bytes = minimal_header();
    push_section(&mut bytes, SectionId::CPU, 1, 0, &[0x10]);
    push_section(
        &mut bytes,
        SectionId::DEVICES,
        1,
        0,
        &u32::MAX.to_le_bytes(),
    );

    let err = restore_frame(&mut Cursor::new(bytes)).unwrap_err();
    assert!(matches!(err, SnapshotError::Corrupt("too many devices")));
}

#[test]
fn restore_rejects_bad_header() {
    let mut bad_magic = minimal_header();
    bad_magic[0] = b'X';
    assert!(matches!(
        restore_frame(&mut Cursor::new(bad_magic)).unwrap_err(),
        SnapshotError::Corrupt("bad snapshot magic")
    ));

    let mut bad_version = minimal_header();
    bad_version[4..8].copy_from_slice(&9u32.to_le_bytes());
    assert!(matches!(
        restore_frame(&mut Cursor::new(bad_version)).unwrap_err(),
        SnapshotError::Corrupt("unsupported snapshot version")
    ));

    assert!(matches!(
        restore_frame(&mut Cursor::new(b"NSNP".to_vec())).unwrap_err(),
        SnapshotError::Io(_)
    ));
}

#[test]
fn restore_requires_cpu_section() {
    let bytes = minimal_header();
    let err = restore_frame(&mut Cursor::new(bytes)).unwrap_err();
    assert!(matches!(err, SnapshotError::Corrupt("missing CPU section")));
}

#[test]
fn restore_skips_unknown_sections() {
    let mut bytes = minimal_header();
    push_section(&mut bytes, SectionId::CPU, 1, 0, &[0x10]);
    push_section(&mut bytes, SectionId(0xDEAD), 1, 0, &[1, 2, 3]);

    let frame = restore_frame(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(frame.cpu, vec![0x10]);
}

#[test]
fn restore_rejects_truncated_unknown_section_payload() {
    let mut bytes = minimal_header();
    push_section(&mut bytes, SectionId::CPU, 1, 0, &[0x10]);
    bytes.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&10u64.to_le_bytes());
    bytes.push(0xAA); // only 1 byte of payload

    let err = restore_frame(&mut Cursor::new(bytes)).unwrap_err();
    match err {
        SnapshotError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("expected io UnexpectedEof, got {other:?}"),
    }
}
