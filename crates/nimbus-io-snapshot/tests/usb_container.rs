use nimbus_io_snapshot::io::state::SnapshotError;
use nimbus_io_snapshot::io::usb::container::{
    UsbContainer, TAG_EHCI, TAG_UHCI, TAG_XHCI, USB_CONTAINER_MAGIC,
    USB_CONTAINER_VERSION_MAJOR, USB_CONTAINER_VERSION_MINOR,
};

fn header() -> Vec<u8> {
    let mut bytes = USB_CONTAINER_MAGIC.to_vec();
    bytes.extend_from_slice(&USB_CONTAINER_VERSION_MAJOR.to_le_bytes());
    bytes.extend_from_slice(&USB_CONTAINER_VERSION_MINOR.to_le_bytes());
    bytes
}

#[test]
fn roundtrips_every_controller_combination() {
    let uhci = vec![0x01, 0x02];
    let ehci = vec![0x03];
    let xhci = vec![0x04, 0x05, 0x06];

    for mask in 0u8..8 {
        let container = UsbContainer {
            uhci: (mask & 1 != 0).then(|| uhci.clone()),
            ehci: (mask & 2 != 0).then(|| ehci.clone()),
            xhci: (mask & 4 != 0).then(|| xhci.clone()),
        };
        let bytes = container.encode();
        assert!(UsbContainer::is_container(&bytes));
        let decoded = UsbContainer::decode(&bytes).unwrap();
        assert_eq!(decoded, container, "mask {mask}");
    }
}

#[test]
fn empty_container_is_just_the_header() {
    let bytes = UsbContainer::default().encode();
    assert_eq!(bytes, header());
    assert!(UsbContainer::decode(&bytes).unwrap().is_empty());
}

#[test]
fn records_are_emitted_in_tag_order() {
    let container = UsbContainer {
        uhci: Some(vec![0xAA]),
        ehci: None,
        xhci: Some(vec![0xBB]),
    };
    let bytes = container.encode();
    assert_eq!(
        u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
        TAG_UHCI
    );
    // UHCI record is 6 + 1 bytes; the next tag must be xHCI.
    assert_eq!(
        u16::from_le_bytes(bytes[15..17].try_into().unwrap()),
        TAG_XHCI
    );
}

#[test]
fn decode_rejects_truncated_record() {
    // Header + one stray byte: not even a record header.
    let mut bytes = header();
    bytes.push(0xFF);
    assert_eq!(
        UsbContainer::decode(&bytes).unwrap_err(),
        SnapshotError::UnexpectedEof
    );

    // Record length pointing past the end of the blob.
    let mut bytes = header();
    bytes.extend_from_slice(&TAG_UHCI.to_le_bytes());
    bytes.extend_from_slice(&8u32.to_le_bytes());
    bytes.extend_from_slice(&[1, 2, 3]);
    assert_eq!(
        UsbContainer::decode(&bytes).unwrap_err(),
        SnapshotError::UnexpectedEof
    );
}

#[test]
fn decode_rejects_duplicate_controller_records() {
    let mut bytes = header();
    for _ in 0..2 {
        bytes.extend_from_slice(&TAG_EHCI.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(0x11);
    }
    assert_eq!(
        UsbContainer::decode(&bytes).unwrap_err(),
        SnapshotError::Corrupt("duplicate usb container record")
    );
}

#[test]
fn decode_rejects_bad_magic_and_major_version() {
    assert_eq!(
        UsbContainer::decode(b"BUSB\x01\x00\x00\x00").unwrap_err(),
        SnapshotError::BadMagic
    );

    let mut bytes = USB_CONTAINER_MAGIC.to_vec();
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    assert_eq!(
        UsbContainer::decode(&bytes).unwrap_err(),
        SnapshotError::UnsupportedVersion(2)
    );
}

#[test]
fn decode_skips_unknown_controller_tags() {
    let mut bytes = header();
    bytes.extend_from_slice(&9u16.to_le_bytes());
    bytes.extend_from_slice(&2u32.to_le_bytes());
    bytes.extend_from_slice(&[0xDE, 0xAD]);
    bytes.extend_from_slice(&TAG_UHCI.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.push(0x77);

    let decoded = UsbContainer::decode(&bytes).unwrap();
    assert_eq!(decoded.uhci, Some(vec![0x77]));
    assert_eq!(decoded.ehci, None);
    assert_eq!(decoded.xhci, None);
}
