//! Split instruction/data cache
//!
//! Two instances of the same structure sit between the core and
//! physical memory: a read-only instruction cache and a data cache.
//! Each is 256 bytes, two-way set-associative with 16-byte blocks
//! (8 sets). Replacement is least-recently-used, tracked with a
//! per-way age where 0 is the most recently used way and 1 the
//! other. Stores are write-through with no write-allocate; loads
//! allocate on miss. Every access produces a structured event for
//! the trace stream and bumps the hit or miss counter.

use crate::memory::{self, AccessFault, Memory, Wordsize};

/// Total capacity in bytes
pub const CACHE_BYTES: u32 = 256;

/// Block (line) size in bytes
pub const BLOCK_BYTES: u32 = 16;

/// Ways per set
pub const NUM_WAYS: usize = 2;

/// Number of sets
pub const NUM_SETS: u32 = CACHE_BYTES / (BLOCK_BYTES * NUM_WAYS as u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheKind {
    Instruction,
    Data,
}

#[derive(Debug, Copy, Clone)]
struct Line {
    valid: bool,
    tag: u32,
    age: u8,
    data: [u8; BLOCK_BYTES as usize],
}

impl Default for Line {
    fn default() -> Self {
        Self {
            valid: false,
            tag: 0,
            age: 0,
            data: [0; BLOCK_BYTES as usize],
        }
    }
}

/// One access as seen on the trace stream: the event label, the
/// address, and a snapshot of the selected set (both ways' valid,
/// age and tag fields). Misses snapshot the set before any refill;
/// hits snapshot it after the age update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub label: &'static str,
    pub address: u32,
    pub index: u32,
    pub valid: [bool; NUM_WAYS],
    pub age: [u8; NUM_WAYS],
    pub tag: [u32; NUM_WAYS],
}

/// Split an address into (tag, index, offset)
fn split_address(addr: u32) -> (u32, u32, u32) {
    let offset = addr & (BLOCK_BYTES - 1);
    let index = (addr >> 4) & (NUM_SETS - 1);
    let tag = addr >> 7;
    (tag, index, offset)
}

#[derive(Debug)]
pub struct Cache {
    kind: CacheKind,
    sets: [[Line; NUM_WAYS]; NUM_SETS as usize],
    hits: u64,
    misses: u64,
}

impl Cache {
    pub fn new(kind: CacheKind) -> Self {
        Self {
            kind,
            sets: Default::default(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Hit ratio over all accesses so far, or None if the cache has
    /// never been accessed
    pub fn hit_rate(&self) -> Option<f64> {
        let accesses = self.hits + self.misses;
        if accesses == 0 {
            None
        } else {
            Some(self.hits as f64 / accesses as f64)
        }
    }

    /// Read size bytes at addr through the cache
    ///
    /// A hit serves the bytes from the matching line and refreshes
    /// its age. A miss refills a victim line (first invalid way,
    /// else the age-1 way) from memory and serves the bytes from the
    /// refilled line. The bounds check covers the full access; a
    /// fault leaves counters and cache state untouched.
    pub fn read(
        &mut self,
        mem: &Memory,
        addr: u32,
        size: Wordsize,
    ) -> Result<(u32, CacheEvent), AccessFault> {
        let width = size.width();
        if !memory::in_range(addr, width) {
            return Err(AccessFault { addr });
        }
        let (tag, index, offset) = split_address(addr);
        if let Some(way) = self.lookup(index, tag) {
            self.hits += 1;
            self.touch(index, way);
            let value = self.line_value(mem, addr, index, way, offset, width);
            let event = self.event(self.read_label(true), addr, index);
            Ok((value, event))
        } else {
            self.misses += 1;
            let event = self.event(self.read_label(false), addr, index);
            let way = self.victim(index);
            self.refill(mem, addr, index, way, tag)?;
            self.touch(index, way);
            let value = self.line_value(mem, addr, index, way, offset, width);
            Ok((value, event))
        }
    }

    /// Write size bytes at addr through the cache (data cache only)
    ///
    /// A hit updates both the line and backing memory; a miss writes
    /// backing memory alone, leaving lines and ages unchanged.
    pub fn write(
        &mut self,
        mem: &mut Memory,
        addr: u32,
        value: u32,
        size: Wordsize,
    ) -> Result<CacheEvent, AccessFault> {
        debug_assert!(self.kind == CacheKind::Data);
        let width = size.width();
        if !memory::in_range(addr, width) {
            return Err(AccessFault { addr });
        }
        let (tag, index, offset) = split_address(addr);
        let event = if let Some(way) = self.lookup(index, tag) {
            self.hits += 1;
            self.touch(index, way);
            let line = &mut self.sets[index as usize][way];
            for n in 0..width {
                // An unaligned access can spill past the block end;
                // the spilled bytes exist only in backing memory
                if offset + n < BLOCK_BYTES {
                    line.data[(offset + n) as usize] = (value >> (8 * n)) as u8;
                }
            }
            self.event(self.write_label(true), addr, index)
        } else {
            self.misses += 1;
            self.event(self.write_label(false), addr, index)
        };
        mem.write(addr, value, size)?;
        Ok(event)
    }

    /// Way in the set holding tag, if any
    fn lookup(&self, index: u32, tag: u32) -> Option<usize> {
        self.sets[index as usize]
            .iter()
            .position(|line| line.valid && line.tag == tag)
    }

    /// Mark way as the most recently used in its set
    fn touch(&mut self, index: u32, way: usize) {
        for (n, line) in self.sets[index as usize].iter_mut().enumerate() {
            line.age = u8::from(n != way);
        }
    }

    /// Way to replace: the first invalid way, else the LRU (age 1)
    fn victim(&self, index: u32) -> usize {
        let set = &self.sets[index as usize];
        set.iter()
            .position(|line| !line.valid)
            .unwrap_or_else(|| {
                set.iter()
                    .position(|line| line.age == 1)
                    .expect("a fully valid set always has an age-1 way")
            })
    }

    /// Fill way with the aligned block containing addr
    fn refill(
        &mut self,
        mem: &Memory,
        addr: u32,
        index: u32,
        way: usize,
        tag: u32,
    ) -> Result<(), AccessFault> {
        let block_addr = addr & !(BLOCK_BYTES - 1);
        let line = &mut self.sets[index as usize][way];
        mem.read_bytes(block_addr, &mut line.data)?;
        line.valid = true;
        line.tag = tag;
        Ok(())
    }

    /// Assemble the little-endian value of an access served by way.
    /// An access that spills past the block end takes the tail from
    /// backing memory; write-through keeps both copies identical.
    fn line_value(
        &self,
        mem: &Memory,
        addr: u32,
        index: u32,
        way: usize,
        offset: u32,
        width: u32,
    ) -> u32 {
        let line = &self.sets[index as usize][way];
        let mut value = 0;
        for n in 0..width {
            let byte = if offset + n < BLOCK_BYTES {
                line.data[(offset + n) as usize]
            } else {
                mem.read(addr + n, Wordsize::Byte)
                    .expect("tail bytes were covered by the bounds check")
                    as u8
            };
            value |= u32::from(byte) << (8 * n);
        }
        value
    }

    fn read_label(&self, hit: bool) -> &'static str {
        match (self.kind, hit) {
            (CacheKind::Instruction, true) => "irh",
            (CacheKind::Instruction, false) => "irm",
            (CacheKind::Data, true) => "drh",
            (CacheKind::Data, false) => "drm",
        }
    }

    fn write_label(&self, hit: bool) -> &'static str {
        if hit {
            "dwh"
        } else {
            "dwm"
        }
    }

    fn event(&self, label: &'static str, addr: u32, index: u32) -> CacheEvent {
        let set = &self.sets[index as usize];
        CacheEvent {
            label,
            address: addr,
            index,
            valid: [set[0].valid, set[1].valid],
            age: [set[0].age, set[1].age],
            tag: [set[0].tag, set[1].tag],
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::memory::MEM_BASE;

    fn filled_memory() -> Memory {
        let mut mem = Memory::default();
        for n in 0..0x200 {
            let addr = MEM_BASE + 4 * n;
            mem.write(addr, 0x1000_0000 + n, Wordsize::Word).unwrap();
        }
        mem
    }

    #[test]
    fn check_first_access_misses_then_hits() {
        let mem = filled_memory();
        let mut cache = Cache::new(CacheKind::Instruction);

        let (value, event) = cache.read(&mem, MEM_BASE, Wordsize::Word).unwrap();
        assert_eq!(value, 0x1000_0000);
        assert_eq!(event.label, "irm");
        assert_eq!(event.index, 0);
        assert_eq!(event.valid, [false, false]);
        assert_eq!((cache.hits(), cache.misses()), (0, 1));

        let (value, event) = cache.read(&mem, MEM_BASE, Wordsize::Word).unwrap();
        assert_eq!(value, 0x1000_0000);
        assert_eq!(event.label, "irh");
        assert_eq!(event.valid, [true, false]);
        assert_eq!(event.age, [0, 1]);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn check_block_neighbours_hit() {
        let mem = filled_memory();
        let mut cache = Cache::new(CacheKind::Data);

        cache.read(&mem, MEM_BASE + 0x10, Wordsize::Word).unwrap();
        // The other three words of the same block are now resident
        for n in 1..4 {
            let (value, event) = cache
                .read(&mem, MEM_BASE + 0x10 + 4 * n, Wordsize::Word)
                .unwrap();
            assert_eq!(value, 0x1000_0004 + n);
            assert_eq!(event.label, "drh");
        }
        assert_eq!((cache.hits(), cache.misses()), (3, 1));
    }

    #[test]
    fn check_narrow_reads_from_line() {
        let mem = filled_memory();
        let mut cache = Cache::new(CacheKind::Data);

        // Word at MEM_BASE is 0x10000000, so byte 3 is 0x10
        cache.read(&mem, MEM_BASE, Wordsize::Word).unwrap();
        let (byte, _) = cache.read(&mem, MEM_BASE + 3, Wordsize::Byte).unwrap();
        assert_eq!(byte, 0x10);
        let (half, _) = cache.read(&mem, MEM_BASE + 2, Wordsize::Halfword).unwrap();
        assert_eq!(half, 0x1000);
    }

    /// Four distinct tags mapping to the same set: the third access
    /// must evict the first-loaded tag, the fourth the second
    #[test]
    fn check_lru_eviction_order() {
        let mem = filled_memory();
        let mut cache = Cache::new(CacheKind::Data);

        // Same index (0), tags differ in addr[31:7]
        let t0 = MEM_BASE;
        let t1 = MEM_BASE + 0x80;
        let t2 = MEM_BASE + 0x100;
        let t3 = MEM_BASE + 0x180;

        cache.read(&mem, t0, Wordsize::Word).unwrap(); // fills way 0
        cache.read(&mem, t1, Wordsize::Word).unwrap(); // fills way 1

        // t2 must evict t0 (the least recently used), not t1
        cache.read(&mem, t2, Wordsize::Word).unwrap();
        let (_, event) = cache.read(&mem, t1, Wordsize::Word).unwrap();
        assert_eq!(event.label, "drh");
        let (_, event) = cache.read(&mem, t0, Wordsize::Word).unwrap();
        assert_eq!(event.label, "drm");

        // Fresh cache for the second half of the scenario
        let mut cache = Cache::new(CacheKind::Data);
        cache.read(&mem, t0, Wordsize::Word).unwrap();
        cache.read(&mem, t1, Wordsize::Word).unwrap();
        cache.read(&mem, t2, Wordsize::Word).unwrap(); // evicts t0
        cache.read(&mem, t3, Wordsize::Word).unwrap(); // evicts t1
        let (_, event) = cache.read(&mem, t2, Wordsize::Word).unwrap();
        assert_eq!(event.label, "drh");
        let (_, event) = cache.read(&mem, t3, Wordsize::Word).unwrap();
        assert_eq!(event.label, "drh");
    }

    #[test]
    fn check_ages_complementary_when_both_valid() {
        let mem = filled_memory();
        let mut cache = Cache::new(CacheKind::Data);
        cache.read(&mem, MEM_BASE, Wordsize::Word).unwrap();
        cache.read(&mem, MEM_BASE + 0x80, Wordsize::Word).unwrap();

        let (_, event) = cache.read(&mem, MEM_BASE, Wordsize::Word).unwrap();
        assert_eq!(event.valid, [true, true]);
        assert_eq!(event.age, [0, 1]);

        let (_, event) = cache.read(&mem, MEM_BASE + 0x80, Wordsize::Word).unwrap();
        assert_eq!(event.age, [1, 0]);
    }

    #[test]
    fn check_write_hit_updates_line_and_memory() {
        let mut mem = filled_memory();
        let mut cache = Cache::new(CacheKind::Data);

        cache.read(&mem, MEM_BASE + 0x20, Wordsize::Word).unwrap();
        let event = cache
            .write(&mut mem, MEM_BASE + 0x20, 0xdead_beef, Wordsize::Word)
            .unwrap();
        assert_eq!(event.label, "dwh");

        // Write-through: backing memory holds the new value
        assert_eq!(mem.read(MEM_BASE + 0x20, Wordsize::Word).unwrap(), 0xdead_beef);
        // And so does the cached line
        let (value, event) = cache.read(&mem, MEM_BASE + 0x20, Wordsize::Word).unwrap();
        assert_eq!(value, 0xdead_beef);
        assert_eq!(event.label, "drh");
    }

    #[test]
    fn check_write_miss_does_not_allocate() {
        let mut mem = filled_memory();
        let mut cache = Cache::new(CacheKind::Data);

        let event = cache
            .write(&mut mem, MEM_BASE + 0x30, 0x55, Wordsize::Byte)
            .unwrap();
        assert_eq!(event.label, "dwm");
        assert_eq!(event.valid, [false, false]);
        assert_eq!((cache.hits(), cache.misses()), (0, 1));

        // Memory was updated even though no line was filled
        assert_eq!(mem.read(MEM_BASE + 0x30, Wordsize::Byte).unwrap(), 0x55);
        let (_, event) = cache.read(&mem, MEM_BASE + 0x30, Wordsize::Byte).unwrap();
        assert_eq!(event.label, "drm");
    }

    #[test]
    fn check_out_of_range_access_faults_without_counting() {
        let mut mem = Memory::default();
        let mut cache = Cache::new(CacheKind::Data);
        let addr = 0x7000_0000;

        assert_eq!(
            cache.read(&mem, addr, Wordsize::Word),
            Err(AccessFault { addr })
        );
        assert_eq!(
            cache.write(&mut mem, addr, 1, Wordsize::Word),
            Err(AccessFault { addr })
        );
        assert_eq!((cache.hits(), cache.misses()), (0, 0));
    }

    #[test]
    fn check_hit_rate() {
        let mem = filled_memory();
        let mut cache = Cache::new(CacheKind::Instruction);
        assert_eq!(cache.hit_rate(), None);

        cache.read(&mem, MEM_BASE, Wordsize::Word).unwrap();
        cache.read(&mem, MEM_BASE + 4, Wordsize::Word).unwrap();
        cache.read(&mem, MEM_BASE + 8, Wordsize::Word).unwrap();
        cache.read(&mem, MEM_BASE + 12, Wordsize::Word).unwrap();
        assert_eq!(cache.hit_rate(), Some(0.75));
    }
}
