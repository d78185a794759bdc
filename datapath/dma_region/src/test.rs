extern crate std;

use super::*;

#[test]
fn reserve_is_zeroed_and_aligned() {
    let region = HeapDma.reserve_aligned(4096, 128, None).unwrap();
    assert_eq!(region.size_in_bytes(), 4096);
    assert_eq!(region.start_address().value() % 128, 0);
    let bytes = region.as_slice::<u8>(0, 4096).unwrap();
    assert!(bytes.iter().all(|b| *b == 0));
}

#[test]
fn reserve_rejects_bad_parameters() {
    assert_eq!(
        HeapDma.reserve_aligned(64, 3, None).err(),
        Some(AllocError::InvalidAlignment)
    );
    assert_eq!(
        HeapDma.reserve_aligned(0, 64, None).err(),
        Some(AllocError::InvalidSize)
    );
}

#[test]
fn typed_views_are_bounds_checked() {
    let mut region = HeapDma.reserve_aligned(64, 64, None).unwrap();
    assert!(region.as_slice::<u64>(0, 8).is_ok());
    assert_eq!(region.as_slice::<u64>(0, 9).err(), Some(ViewError::OutOfBounds));
    assert_eq!(region.as_slice::<u64>(4, 1).err(), Some(ViewError::Misaligned));
    assert_eq!(
        region.as_type_mut::<[u8; 65]>(0).err(),
        Some(ViewError::OutOfBounds)
    );
}

#[test]
fn byte_views_cover_the_requested_length() {
    let mut region = HeapDma.reserve_aligned(32, 32, None).unwrap();
    region.bytes_mut(32)[31] = 0x5A;
    assert_eq!(region.bytes(32)[31], 0x5A);
    assert_eq!(region.bytes(10).len(), 10);
    assert!(MappedRegion::empty().bytes(0).is_empty());
}

#[test]
fn views_read_back_written_values() {
    let mut region = HeapDma.reserve_aligned(32, 32, None).unwrap();
    {
        let words = region.as_slice_mut::<u32>(0, 8).unwrap();
        words[3] = 0xDEAD_BEEF;
    }
    assert_eq!(region.as_slice::<u32>(0, 8).unwrap()[3], 0xDEAD_BEEF);
}

#[test]
fn empty_region_has_no_views() {
    let region = MappedRegion::empty();
    assert_eq!(region.size_in_bytes(), 0);
    assert!(region.as_slice::<u8>(0, 1).is_err());
}
