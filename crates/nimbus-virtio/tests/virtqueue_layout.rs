use nimbus_virtio::queue::{compute_layout, LayoutError, MAX_QUEUE_SIZE};
use proptest::prelude::*;

proptest! {
    #[test]
    fn layout_invariants_hold_for_all_inputs(
        queue_size in 1u16..=MAX_QUEUE_SIZE,
        event_idx in proptest::bool::ANY,
        align_shift in 2u32..=16,
    ) {
        let ring_alignment = 1usize << align_shift;
        let layout = compute_layout(queue_size, event_idx, ring_alignment).unwrap();

        let entries = queue_size as usize;
        let event_words = if event_idx { 2 } else { 0 };

        // Region sizes match the virtio ring formulas.
        prop_assert_eq!(layout.desc_size, entries * 16);
        prop_assert_eq!(layout.avail_size, 4 + entries * 2 + event_words);
        prop_assert_eq!(layout.used_size, 4 + entries * 8 + event_words);

        // Alignment of each region start.
        prop_assert_eq!(layout.desc_off % 16, 0);
        prop_assert_eq!(layout.avail_off % 2, 0);
        prop_assert_eq!(layout.used_off % ring_alignment, 0);

        // Non-overlap and exact total.
        prop_assert!(layout.desc_off + layout.desc_size <= layout.avail_off);
        prop_assert!(layout.avail_off + layout.avail_size <= layout.used_off);
        prop_assert_eq!(layout.used_off + layout.used_size, layout.total);
    }

    #[test]
    fn non_power_of_two_alignments_are_rejected(
        queue_size in 1u16..=MAX_QUEUE_SIZE,
        ring_alignment in 4usize..=65536,
    ) {
        prop_assume!(!ring_alignment.is_power_of_two());
        prop_assert_eq!(
            compute_layout(queue_size, false, ring_alignment).unwrap_err(),
            LayoutError::InvalidAlignment(ring_alignment)
        );
    }

    #[test]
    fn oversized_queues_are_rejected(queue_size in (MAX_QUEUE_SIZE + 1)..=u16::MAX) {
        prop_assert_eq!(
            compute_layout(queue_size, false, 16).unwrap_err(),
            LayoutError::InvalidQueueSize(queue_size)
        );
    }
}
