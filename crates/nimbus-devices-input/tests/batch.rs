use nimbus_devices_input::{decode_batch, encode_batch, BatchError, InputEvent};

#[test]
fn mixed_batch_roundtrip() {
    let events = vec![
        InputEvent::KeyScancode {
            bytes: vec![0x1e],
        },
        InputEvent::KeyScancode {
            bytes: vec![0xe0, 0x48],
        },
        InputEvent::MouseMove { dx: -3, dy: 120 },
        InputEvent::MouseWheel { delta: -1 },
        InputEvent::MouseButtons { mask: 0b0_0101 },
    ];

    let bytes = encode_batch(&events).unwrap();
    assert_eq!(decode_batch(&bytes).unwrap(), events);
}

#[test]
fn empty_batch_is_just_the_header() {
    let bytes = encode_batch(&[]).unwrap();
    assert_eq!(bytes.len(), 8);
    assert_eq!(decode_batch(&bytes).unwrap(), Vec::<InputEvent>::new());
}

#[test]
fn records_are_fixed_width() {
    let one = encode_batch(&[InputEvent::MouseWheel { delta: 1 }]).unwrap();
    let six = encode_batch(&[InputEvent::KeyScancode {
        bytes: vec![0xe1, 0x1d, 0x45, 0xe1, 0x9d, 0xc5],
    }])
    .unwrap();
    assert_eq!(one.len(), six.len());
}

#[test]
fn rejects_bad_header() {
    let good = encode_batch(&[InputEvent::MouseWheel { delta: 1 }]).unwrap();

    let mut bad_magic = good.clone();
    bad_magic[0] = b'X';
    assert_eq!(decode_batch(&bad_magic).unwrap_err(), BatchError::BadMagic);

    let mut bad_version = good.clone();
    bad_version[4..6].copy_from_slice(&9u16.to_le_bytes());
    assert_eq!(
        decode_batch(&bad_version).unwrap_err(),
        BatchError::UnsupportedVersion(9)
    );

    // Count promising more records than are present.
    let mut short = good.clone();
    short[6..8].copy_from_slice(&2u16.to_le_bytes());
    assert_eq!(decode_batch(&short).unwrap_err(), BatchError::Truncated);

    assert_eq!(decode_batch(&good[..4]).unwrap_err(), BatchError::Truncated);
}

#[test]
fn rejects_out_of_range_events() {
    assert_eq!(
        encode_batch(&[InputEvent::KeyScancode { bytes: vec![] }]).unwrap_err(),
        BatchError::InvalidEvent("scancode length out of range")
    );
    assert_eq!(
        encode_batch(&[InputEvent::KeyScancode {
            bytes: vec![0; 7]
        }])
        .unwrap_err(),
        BatchError::InvalidEvent("scancode length out of range")
    );
    assert_eq!(
        encode_batch(&[InputEvent::MouseButtons { mask: 0x20 }]).unwrap_err(),
        BatchError::InvalidEvent("button mask out of range")
    );

    // Decode-side validation of a hand-corrupted record.
    let mut bytes = encode_batch(&[InputEvent::MouseButtons { mask: 0x1F }]).unwrap();
    bytes[9] = 0xFF;
    assert_eq!(
        decode_batch(&bytes).unwrap_err(),
        BatchError::InvalidEvent("button mask out of range")
    );

    let mut bytes = encode_batch(&[InputEvent::MouseWheel { delta: 0 }]).unwrap();
    bytes[8] = 0x77;
    assert_eq!(
        decode_batch(&bytes).unwrap_err(),
        BatchError::InvalidEvent("unknown event type")
    );
}
