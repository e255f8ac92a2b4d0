// Request Pool Tests
#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use crate::driver::{CoherentRegion, DmaOps};
    use crate::tests::sim::HeapDma;
    use crate::twa::packet::CommandPacket;
    use crate::twa::request::*;
    use crate::twa::*;

    fn backings(dma: &HeapDma) -> (CoherentRegion, CoherentRegion) {
        let packets = dma
            .alloc_coherent(MAX_REQUESTS * core::mem::size_of::<CommandPacket>())
            .unwrap();
        let buffers = dma.alloc_coherent(MAX_REQUESTS * SECTOR_SIZE).unwrap();
        (packets, buffers)
    }

    #[test]
    fn test_bitmap_operations() {
        let bitmap = Bitmap::empty();
        assert!(bitmap.is_empty());
        assert_eq!(bitmap.find_first_set(0), None);

        bitmap.set(5);
        bitmap.set(130);
        assert_eq!(bitmap.count(), 2);
        assert_eq!(bitmap.find_first_set(0), Some(5));
        assert_eq!(bitmap.find_first_set(6), Some(130));
        assert_eq!(bitmap.find_first_set(131), None);

        assert!(bitmap.test_and_clear(5));
        assert!(!bitmap.test_and_clear(5));
        assert!(!bitmap.test(5));
        assert!(bitmap.test(130));

        let full = Bitmap::full();
        assert!(full.is_full());
        assert_eq!(full.count(), MAX_REQUESTS);
    }

    #[test]
    fn test_slot_addresses() {
        let dma = HeapDma::new();
        let (packets, buffers) = backings(&dma);
        let pool = RequestPool::new(&packets, &buffers);

        assert_eq!(pool.packet_dma(0), packets.dma_addr());
        assert_eq!(
            pool.packet_dma(3),
            packets.dma_addr() + 3 * core::mem::size_of::<CommandPacket>() as u64
        );
        assert_eq!(pool.buffer_dma(2), buffers.dma_addr() + 2 * SECTOR_SIZE as u64);

        drop(pool);
        dma.free_coherent(packets);
        dma.free_coherent(buffers);
    }

    #[test]
    fn test_reserve_and_release() {
        let dma = HeapDma::new();
        let (packets, buffers) = backings(&dma);
        let pool = RequestPool::new(&packets, &buffers);

        assert!(pool.all_free());
        let id = pool.reserve(None);
        assert_eq!(pool.state(id), RequestState::Started);
        assert!(!pool.is_free(id));
        assert_eq!(pool.free_count(), MAX_REQUESTS - 1);

        let other = pool.reserve(None);
        assert_ne!(id, other);

        pool.release(id);
        pool.release(other);
        assert!(pool.all_free());
        assert_eq!(pool.state(id), RequestState::Free);

        drop(pool);
        dma.free_coherent(packets);
        dma.free_coherent(buffers);
    }

    #[test]
    fn test_state_transitions_are_compare_and_set() {
        let dma = HeapDma::new();
        let (packets, buffers) = backings(&dma);
        let pool = RequestPool::new(&packets, &buffers);

        let id = pool.reserve(None);
        assert!(pool.compare_and_set(id, RequestState::Started, RequestState::Posted).is_ok());
        // A racing reset took the slot first; the completion path must lose.
        assert!(pool.compare_and_set(id, RequestState::Posted, RequestState::Aborted).is_ok());
        assert_eq!(
            pool.compare_and_set(id, RequestState::Posted, RequestState::Completed),
            Err(RequestState::Aborted)
        );
        pool.release(id);

        drop(pool);
        dma.free_coherent(packets);
        dma.free_coherent(buffers);
    }

    #[test]
    fn test_distinguished_slots_cleared_on_release() {
        let dma = HeapDma::new();
        let (packets, buffers) = backings(&dma);
        let pool = RequestPool::new(&packets, &buffers);

        let aen = pool.reserve(None);
        let ioctl = pool.reserve(None);
        pool.set_aen_request(aen);
        pool.set_ioctl_request(ioctl);
        assert_eq!(pool.aen_request(), Some(aen));
        assert_eq!(pool.ioctl_request(), Some(ioctl));

        pool.release(aen);
        assert_eq!(pool.aen_request(), None);
        assert_eq!(pool.ioctl_request(), Some(ioctl));
        pool.release(ioctl);
        assert_eq!(pool.ioctl_request(), None);

        drop(pool);
        dma.free_coherent(packets);
        dma.free_coherent(buffers);
    }

    #[test]
    fn test_pending_is_oldest_first() {
        let dma = HeapDma::new();
        let (packets, buffers) = backings(&dma);
        let pool = RequestPool::new(&packets, &buffers);

        pool.mark_pending(40);
        pool.mark_pending(7);
        pool.mark_pending(200);
        assert_eq!(pool.first_pending(), Some(7));
        pool.unmark_pending(7);
        assert_eq!(pool.first_pending(), Some(40));
        assert!(pool.is_pending(200));

        drop(pool);
        dma.free_coherent(packets);
        dma.free_coherent(buffers);
    }

    #[test]
    fn test_concurrent_reservations_are_exclusive() {
        let dma = HeapDma::new();
        let (packets, buffers) = backings(&dma);
        let pool = RequestPool::new(&packets, &buffers);

        let ids: Vec<usize> = thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..32).map(|_| pool.reserve(None)).collect::<Vec<_>>()))
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        let unique: HashSet<usize> = ids.iter().copied().collect();
        assert_eq!(unique.len(), MAX_REQUESTS);
        assert_eq!(pool.free_count(), 0);
        assert!(ids.iter().all(|&id| pool.state(id) == RequestState::Started));

        thread::scope(|s| {
            for chunk in ids.chunks(64) {
                let pool = &pool;
                s.spawn(move || chunk.iter().for_each(|&id| pool.release(id)));
            }
        });
        assert!(pool.all_free());

        drop(pool);
        dma.free_coherent(packets);
        dma.free_coherent(buffers);
    }
}
