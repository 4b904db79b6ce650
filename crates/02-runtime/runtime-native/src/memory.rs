//! Process memory context: one backing buffer, one [`Region`] over it and
//! a recycling stack for the process's slab size class.

use std::io;

use memmap2::{MmapMut, MmapOptions};
use transport::{Region, Slab, SlabPush, SlabStack, TransportResult};

use crate::BusConfig;

/// Anonymous private mapping used as the process backing buffer.
pub struct BackingBuffer {
    map: MmapMut,
}

impl BackingBuffer {
    /// Maps `len` zeroed bytes.
    pub fn anonymous(len: usize) -> io::Result<Self> {
        let map = MmapOptions::new().len(len).map_anon()?;
        log::debug!("mapped {len} byte backing buffer");
        Ok(Self { map })
    }

    /// Size of the mapping.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True for a zero-length mapping.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Mutable view handed to a [`Region`].
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }
}

/// Region plus the slab recycling stack of a single size class.
#[derive(Debug)]
pub struct ProcessMemory<'buf> {
    region: Region<'buf>,
    stack: SlabStack,
    size_class: usize,
}

impl<'buf> ProcessMemory<'buf> {
    /// Builds the region over `buffer` and reserves the recycling stack.
    pub fn new(buffer: &'buf mut [u8], size_class: usize, stack_capacity: usize) -> TransportResult<Self> {
        let mut region = Region::new(buffer);
        let stack = SlabStack::new(&mut region, stack_capacity)?;
        log::info!(
            "process memory ready: {} bytes, size class {size_class}, stack capacity {stack_capacity}",
            region.len()
        );
        Ok(Self {
            region,
            stack,
            size_class,
        })
    }

    /// Uses the sizes from `config`.
    pub fn from_config(buffer: &'buf mut [u8], config: &BusConfig) -> TransportResult<Self> {
        Self::new(buffer, config.slab_payload_bytes, config.slab_stack_capacity)
    }

    /// Payload size of every slab handed out.
    pub fn size_class(&self) -> usize {
        self.size_class
    }

    /// Backing region, for slab payload access.
    pub fn region(&self) -> &Region<'buf> {
        &self.region
    }

    /// Mutable backing region.
    pub fn region_mut(&mut self) -> &mut Region<'buf> {
        &mut self.region
    }

    /// Recycled slabs currently parked.
    pub fn parked(&self) -> usize {
        self.stack.len()
    }

    /// Takes a recycled slab or carves a new one, stamped with `id`.
    pub fn acquire(&mut self, id: u64) -> TransportResult<Slab> {
        self.stack.acquire(&mut self.region, self.size_class, id)
    }

    /// Parks `slab` for reuse. A full stack hands the slab back.
    pub fn release(&mut self, slab: Slab) -> SlabPush {
        self.stack.release(&mut self.region, slab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::{TransportError, SLAB_HEADER_SIZE, SLAB_STACK_ENTRY_SIZE};

    #[test]
    fn backing_buffer_is_zeroed() {
        let mut backing = BackingBuffer::anonymous(4096).unwrap();
        assert_eq!(backing.len(), 4096);
        assert!(backing.as_mut_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn acquire_release_recycles_slabs() {
        let mut backing = BackingBuffer::anonymous(4096).unwrap();
        let mut memory = ProcessMemory::new(backing.as_mut_slice(), 256, 2).unwrap();
        assert!(memory.region().offset() >= 2 * SLAB_STACK_ENTRY_SIZE);

        let mut slab = memory.acquire(1).unwrap();
        let span = slab.alloc(memory.region_mut(), 100).unwrap();
        memory.region_mut().bytes_mut(span).fill(0x5A);
        let offset_after_first = memory.region().offset();

        assert!(matches!(memory.release(slab), SlabPush::Ok));
        assert_eq!(memory.parked(), 1);

        let again = memory.acquire(7).unwrap();
        assert_eq!(again.id(), 7);
        assert_eq!(again.used(), 0);
        assert_eq!(memory.region().offset(), offset_after_first, "no new carve");
        assert_eq!(memory.parked(), 0);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut buffer = vec![0u8; 2 * SLAB_STACK_ENTRY_SIZE + 2 * (SLAB_HEADER_SIZE + 64)];
        let mut memory = ProcessMemory::new(&mut buffer, 64, 2).unwrap();
        let mut held = Vec::new();
        let err = loop {
            match memory.acquire(held.len() as u64) {
                Ok(slab) => held.push(slab),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, TransportError::RegionExhausted { .. }));
        assert!(!held.is_empty());
    }

    #[test]
    fn config_sizes_are_used() {
        let config = BusConfig {
            slab_payload_bytes: 128,
            slab_stack_capacity: 4,
            ..BusConfig::default()
        };
        let mut buffer = vec![0u8; 2048];
        let mut memory = ProcessMemory::from_config(&mut buffer, &config).unwrap();
        assert_eq!(memory.size_class(), 128);
        assert_eq!(memory.acquire(3).unwrap().payload_size(), 128);
    }

    #[test]
    fn smallest_valid_region_fits_stack_and_slab() {
        // 2 entries, then a 16-aligned slab: 64 + 20-byte header + 64 payload.
        let mut config = BusConfig {
            region_bytes: 148,
            slab_payload_bytes: 64,
            slab_stack_capacity: 2,
            ..BusConfig::default()
        };
        config.validate().unwrap();

        let mut backing = BackingBuffer::anonymous(config.region_bytes).unwrap();
        let mut memory = ProcessMemory::from_config(backing.as_mut_slice(), &config).unwrap();
        let slab = memory.acquire(1).unwrap();
        assert_eq!(slab.payload_size(), 64);
        assert_eq!(memory.region().remaining(), 0);

        config.region_bytes -= 1;
        assert!(config.validate().is_err());
    }
}
