// Cluster buffer pool.
// Every device read in the engine lands in a chain of fixed-size buffers
// acquired here, so cluster-sized allocations are recycled instead of churned.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use log::trace;
use relic_core::RelicError;

/// One pooled allocation unit.
struct Segment {
    id: u64,
    data: Box<[u8]>,
}

struct PoolInner {
    /// Released buffers keyed by unit size; `Vec::pop` yields the most
    /// recently freed first.
    free: HashMap<usize, Vec<Segment>>,
    /// Ids currently handed out. A segment is never in both sets.
    in_use: HashSet<u64>,
    next_id: u64,
    fresh_allocations: u64,
}

/// Pool of recyclable fixed-size buffers.
///
/// All bookkeeping sits behind one pool-wide lock, held only across list
/// mutation, never across device I/O.
pub struct BufferPool {
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                free: HashMap::new(),
                in_use: HashSet::new(),
                next_id: 0,
                fresh_allocations: 0,
            }),
        })
    }

    /// Acquire a chain of `unit_count` buffers of `unit_size` bytes each.
    ///
    /// Pooled requests reuse released buffers of the same unit size before
    /// allocating fresh memory. Non-pooled requests always allocate fresh and
    /// must be a single unit; they exist for reads issued before the cluster
    /// size is known.
    pub fn acquire(
        self: &Arc<Self>,
        unit_size: usize,
        unit_count: usize,
        non_pooled: bool,
    ) -> Result<BufferChain, RelicError> {
        if unit_size == 0 || unit_count == 0 {
            return Err(RelicError::InvalidInput(format!(
                "buffer request of {} x {} bytes",
                unit_count, unit_size
            )));
        }
        if non_pooled && unit_count != 1 {
            return Err(RelicError::NotSupported(
                "chained non-pooled buffer request".into(),
            ));
        }

        // The lock covers list mutation only; fresh memory is allocated
        // between the two critical sections.
        let (mut segments, base_id) = {
            let mut inner = self.inner.lock().expect("buffer pool lock poisoned");
            let mut segments = Vec::with_capacity(unit_count);
            if !non_pooled {
                if let Some(free) = inner.free.get_mut(&unit_size) {
                    while segments.len() < unit_count {
                        match free.pop() {
                            Some(seg) => segments.push(seg),
                            None => break,
                        }
                    }
                }
            }
            let missing = (unit_count - segments.len()) as u64;
            let base_id = inner.next_id;
            inner.next_id += missing;
            inner.fresh_allocations += missing;
            (segments, base_id)
        };

        let missing = unit_count - segments.len();
        for n in 0..missing {
            segments.push(Segment {
                id: base_id + n as u64,
                data: vec![0u8; unit_size].into_boxed_slice(),
            });
        }

        {
            let mut inner = self.inner.lock().expect("buffer pool lock poisoned");
            for segment in &segments {
                inner.in_use.insert(segment.id);
            }
        }
        trace!(
            "acquired {} x {} byte buffer(s), pooled={}",
            unit_count,
            unit_size,
            !non_pooled
        );

        Ok(BufferChain {
            pool: Some(Arc::clone(self)),
            unit_size,
            pooled: !non_pooled,
            segments,
        })
    }

    /// Total fresh heap allocations performed so far. A re-acquire of a shape
    /// that was just released must not move this counter.
    pub fn fresh_allocations(&self) -> u64 {
        self.inner.lock().expect("buffer pool lock poisoned").fresh_allocations
    }

    /// Released buffers currently available for `unit_size`.
    pub fn free_count(&self, unit_size: usize) -> usize {
        let inner = self.inner.lock().expect("buffer pool lock poisoned");
        inner.free.get(&unit_size).map_or(0, Vec::len)
    }

    fn reclaim(
        &self,
        segments: Vec<Segment>,
        unit_size: usize,
        pooled: bool,
    ) -> Result<(), RelicError> {
        let mut inner = self.inner.lock().expect("buffer pool lock poisoned");
        for segment in segments {
            if !inner.in_use.remove(&segment.id) {
                return Err(RelicError::InvariantViolation(format!(
                    "buffer {} released while not in use",
                    segment.id
                )));
            }
            if pooled {
                inner.free.entry(unit_size).or_default().push(segment);
            }
            // Non-pooled segments are dropped here.
        }
        Ok(())
    }
}

/// A chain of buffers exclusively owned by its holder.
///
/// Dropping the chain returns every segment to the pool; after an explicit
/// `release` the chain's accessors fail rather than touch recycled memory.
pub struct BufferChain {
    pool: Option<Arc<BufferPool>>,
    unit_size: usize,
    pooled: bool,
    segments: Vec<Segment>,
}

impl BufferChain {
    /// Total bytes the chain can hold.
    pub fn capacity(&self) -> usize {
        self.unit_size * self.segments.len()
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    pub fn unit_count(&self) -> usize {
        self.segments.len()
    }

    /// Mutable view of the remainder of the segment containing `offset`.
    /// Callers loop over this to fill the chain across segment boundaries.
    pub fn chunk_mut(&mut self, offset: usize) -> Result<&mut [u8], RelicError> {
        self.check_live()?;
        if offset >= self.capacity() {
            return Err(RelicError::InvalidInput(format!(
                "offset {} outside chain of {} bytes",
                offset,
                self.capacity()
            )));
        }
        let segment = offset / self.unit_size;
        let within = offset % self.unit_size;
        Ok(&mut self.segments[segment].data[within..])
    }

    /// Copy `dest.len()` bytes out of the chain starting at `offset`.
    pub fn copy_to(&self, offset: usize, dest: &mut [u8]) -> Result<(), RelicError> {
        self.check_live()?;
        let end = offset
            .checked_add(dest.len())
            .filter(|&e| e <= self.capacity())
            .ok_or_else(|| {
                RelicError::InvalidInput(format!(
                    "copy of {} bytes at {} exceeds chain of {} bytes",
                    dest.len(),
                    offset,
                    self.capacity()
                ))
            })?;
        let mut pos = offset;
        let mut written = 0;
        while pos < end {
            let segment = pos / self.unit_size;
            let within = pos % self.unit_size;
            let take = (self.unit_size - within).min(end - pos);
            dest[written..written + take]
                .copy_from_slice(&self.segments[segment].data[within..within + take]);
            pos += take;
            written += take;
        }
        Ok(())
    }

    /// Copy `src` into the chain starting at `offset`.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), RelicError> {
        self.check_live()?;
        let end = offset
            .checked_add(src.len())
            .filter(|&e| e <= self.capacity())
            .ok_or_else(|| {
                RelicError::InvalidInput(format!(
                    "write of {} bytes at {} exceeds chain of {} bytes",
                    src.len(),
                    offset,
                    self.capacity()
                ))
            })?;
        let mut pos = offset;
        let mut consumed = 0;
        while pos < end {
            let segment = pos / self.unit_size;
            let within = pos % self.unit_size;
            let take = (self.unit_size - within).min(end - pos);
            self.segments[segment].data[within..within + take]
                .copy_from_slice(&src[consumed..consumed + take]);
            pos += take;
            consumed += take;
        }
        Ok(())
    }

    /// Contiguous copy of the whole chain.
    pub fn to_vec(&self) -> Result<Vec<u8>, RelicError> {
        let mut out = vec![0u8; self.capacity()];
        self.copy_to(0, &mut out)?;
        Ok(out)
    }

    /// Return every segment to the pool now instead of at drop.
    pub fn release(mut self) -> Result<(), RelicError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), RelicError> {
        match self.pool.take() {
            Some(pool) => pool.reclaim(
                std::mem::take(&mut self.segments),
                self.unit_size,
                self.pooled,
            ),
            None => Ok(()),
        }
    }

    fn check_live(&self) -> Result<(), RelicError> {
        if self.pool.is_none() {
            return Err(RelicError::InvariantViolation(
                "buffer chain used after release".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BufferChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferChain")
            .field("unit_size", &self.unit_size)
            .field("unit_count", &self.segments.len())
            .field("pooled", &self.pooled)
            .finish()
    }
}

impl Drop for BufferChain {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::error!("buffer chain drop: {}", e);
        }
    }
}
