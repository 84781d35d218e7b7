use nimbus_io_snapshot::io::state::codec::{Decoder, Encoder};
use nimbus_io_snapshot::io::state::SnapshotError;

#[test]
fn decoder_vec_bytes_does_not_preallocate_on_large_count() {
    // `Decoder::vec_bytes` reads a u32 element count, followed by `count`
    // (len + bytes) entries. The count is untrusted: a corrupted blob must
    // produce a normal decode error, not a pathological allocation.
    let buf = u32::MAX.to_le_bytes();
    let mut d = Decoder::new(&buf);
    let err = d.vec_bytes().unwrap_err();
    assert_eq!(err, SnapshotError::UnexpectedEof);
}

#[test]
fn scalar_roundtrip() {
    let mut e = Encoder::new();
    e.u8(0x12)
        .bool(true)
        .u16(0x3456)
        .u32(0x789A_BCDE)
        .u64(0x1122_3344_5566_7788)
        .i16(-5)
        .i32(-70_000)
        .bytes(&[1, 2, 3])
        .string("hello")
        .vec_bytes(&[vec![9], vec![]]);
    let buf = e.finish();

    let mut d = Decoder::new(&buf);
    assert_eq!(d.u8().unwrap(), 0x12);
    assert!(d.bool().unwrap());
    assert_eq!(d.u16().unwrap(), 0x3456);
    assert_eq!(d.u32().unwrap(), 0x789A_BCDE);
    assert_eq!(d.u64().unwrap(), 0x1122_3344_5566_7788);
    assert_eq!(d.i16().unwrap(), -5);
    assert_eq!(d.i32().unwrap(), -70_000);
    assert_eq!(d.bytes().unwrap(), vec![1, 2, 3]);
    assert_eq!(d.string().unwrap(), "hello");
    assert_eq!(d.vec_bytes().unwrap(), vec![vec![9], vec![]]);
    d.finish().unwrap();
}

#[test]
fn decoder_rejects_bad_bool_and_trailing_bytes() {
    let mut d = Decoder::new(&[2]);
    assert_eq!(
        d.bool().unwrap_err(),
        SnapshotError::InvalidFieldEncoding("bool out of range")
    );

    let d = Decoder::new(&[0]);
    assert_eq!(
        d.finish().unwrap_err(),
        SnapshotError::InvalidFieldEncoding("trailing bytes")
    );
}

#[test]
fn decoder_rejects_truncated_reads() {
    let mut d = Decoder::new(&[1, 2, 3]);
    assert_eq!(d.u32().unwrap_err(), SnapshotError::UnexpectedEof);

    // Length prefix larger than the remaining buffer.
    let mut buf = 100u32.to_le_bytes().to_vec();
    buf.push(0xAA);
    let mut d = Decoder::new(&buf);
    assert_eq!(d.bytes().unwrap_err(), SnapshotError::UnexpectedEof);
}

#[test]
fn decoder_rejects_invalid_utf8_strings() {
    let mut buf = 1u32.to_le_bytes().to_vec();
    buf.push(0xFF);
    let mut d = Decoder::new(&buf);
    assert_eq!(
        d.string().unwrap_err(),
        SnapshotError::InvalidFieldEncoding("invalid utf-8")
    );
}
