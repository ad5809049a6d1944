//! Shared memory regions and the operand views mapped into them.
//!
//! A [`SharedBuffer`] is one contiguous anonymous mapping. Handles are cheap to clone and carry
//! an [`AccessMode`]; every [`SharedBufferMapping`] keeps its region alive, so a view can never
//! outlive the blob it points into. The region is released when the last handle drops.

use std::fmt;
use std::sync::Arc;

use memmap2::MmapMut;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::graph::{Dimensions, FrozenGraph, OperandType};

/// Access rights carried by a [`SharedBuffer`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

enum RegionStorage {
    Empty,
    Mapped(MmapMut),
}

impl RegionStorage {
    fn as_slice(&self) -> &[u8] {
        match self {
            RegionStorage::Empty => &[],
            RegionStorage::Mapped(map) => &map[..],
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            RegionStorage::Empty => &mut [],
            RegionStorage::Mapped(map) => &mut map[..],
        }
    }
}

struct Region {
    len: usize,
    storage: Mutex<RegionStorage>,
}

/// Handle to a shared, reference-counted memory region.
#[derive(Clone)]
pub struct SharedBuffer {
    region: Arc<Region>,
    access: AccessMode,
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.region.len)
            .field("access", &self.access)
            .finish()
    }
}

impl SharedBuffer {
    /// Allocates a zero-filled region of `len` bytes, refusing anything above `limit`.
    pub fn create(len: usize, limit: usize) -> ServiceResult<Self> {
        if len > limit {
            return Err(ServiceError::ResourceExhausted(format!(
                "shared buffer of {len} bytes exceeds the {limit} byte limit"
            )));
        }
        let storage = if len == 0 {
            RegionStorage::Empty
        } else {
            let map = MmapMut::map_anon(len).map_err(|err| {
                ServiceError::ResourceExhausted(format!(
                    "failed to map {len} bytes of shared memory: {err}"
                ))
            })?;
            RegionStorage::Mapped(map)
        };
        Ok(Self {
            region: Arc::new(Region {
                len,
                storage: Mutex::new(storage),
            }),
            access: AccessMode::ReadWrite,
        })
    }

    pub fn len(&self) -> usize {
        self.region.len
    }

    pub fn is_empty(&self) -> bool {
        self.region.len == 0
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Clones the handle for hand-off. A read-only handle cannot be upgraded.
    pub fn clone_with_access(&self, access: AccessMode) -> ServiceResult<Self> {
        if self.access == AccessMode::ReadOnly && access == AccessMode::ReadWrite {
            return Err(ServiceError::invalid_state(
                "cannot clone a read-only shared buffer as read-write",
            ));
        }
        Ok(Self {
            region: Arc::clone(&self.region),
            access,
        })
    }

    /// Returns `true` when both handles refer to the same region.
    pub fn same_region(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.region, &other.region)
    }

    /// Maps `length` bytes starting at `offset`.
    pub fn map(&self, offset: usize, length: usize) -> ServiceResult<SharedBufferMapping> {
        let end = offset.checked_add(length).ok_or_else(|| {
            ServiceError::bad_data(format!("mapping {offset}+{length} overflows"))
        })?;
        if end > self.region.len {
            return Err(ServiceError::bad_data(format!(
                "mapping {offset}..{end} exceeds shared buffer of {} bytes",
                self.region.len
            )));
        }
        Ok(SharedBufferMapping {
            buffer: self.clone(),
            offset,
            length,
        })
    }

    pub fn map_all(&self) -> SharedBufferMapping {
        SharedBufferMapping {
            buffer: self.clone(),
            offset: 0,
            length: self.region.len,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegionStorage> {
        self.region.storage.lock()
    }
}

/// View of a byte range inside a [`SharedBuffer`].
#[derive(Clone)]
pub struct SharedBufferMapping {
    buffer: SharedBuffer,
    offset: usize,
    length: usize,
}

impl fmt::Debug for SharedBufferMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBufferMapping")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("access", &self.buffer.access)
            .finish()
    }
}

impl SharedBufferMapping {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Runs `f` over the mapped bytes while the region is locked.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.buffer.lock();
        f(&guard.as_slice()[self.offset..self.offset + self.length])
    }

    pub fn read_to_vec(&self) -> Vec<u8> {
        self.with_bytes(<[u8]>::to_vec)
    }

    /// Copies the mapped bytes into `dst`, which must have exactly the mapped length.
    pub fn read_into(&self, dst: &mut [u8]) -> ServiceResult<()> {
        if dst.len() != self.length {
            return Err(ServiceError::bad_data(format!(
                "destination holds {} bytes but the mapping is {} bytes",
                dst.len(),
                self.length
            )));
        }
        self.with_bytes(|bytes| dst.copy_from_slice(bytes));
        Ok(())
    }

    /// Copies `src` into the mapped range; `src` must have exactly the mapped length.
    pub fn write(&self, src: &[u8]) -> ServiceResult<()> {
        if self.buffer.access != AccessMode::ReadWrite {
            return Err(ServiceError::invalid_state(
                "write through a read-only shared buffer mapping",
            ));
        }
        if src.len() != self.length {
            return Err(ServiceError::bad_data(format!(
                "source holds {} bytes but the mapping is {} bytes",
                src.len(),
                self.length
            )));
        }
        let mut guard = self.buffer.lock();
        guard.as_mut_slice()[self.offset..self.offset + self.length].copy_from_slice(src);
        Ok(())
    }
}

/// Offset/length view of one operand payload inside a shared blob.
#[derive(Debug, Clone)]
pub struct OperandInfo {
    pub offset: usize,
    pub length: usize,
    pub mapping: SharedBufferMapping,
}

impl OperandInfo {
    pub fn new(buffer: &SharedBuffer, offset: usize, length: usize) -> ServiceResult<Self> {
        Ok(Self {
            offset,
            length,
            mapping: buffer.map(offset, length)?,
        })
    }
}

/// Published placement of one graph input or output inside the execution region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperandLayout {
    /// Operand index inside the graph.
    pub operand: u32,
    pub operand_type: OperandType,
    pub dimensions: Dimensions,
    pub offset: usize,
    pub length: usize,
}

/// Contiguous placement of all graph inputs followed by all graph outputs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionLayout {
    pub inputs: Vec<OperandLayout>,
    pub outputs: Vec<OperandLayout>,
}

impl ExecutionLayout {
    pub fn for_graph(graph: &FrozenGraph) -> ServiceResult<Self> {
        let mut offset = 0usize;
        let mut place = |indices: &[u32]| -> ServiceResult<Vec<OperandLayout>> {
            let mut placed = Vec::with_capacity(indices.len());
            for &index in indices {
                let operand = graph.operand(index)?;
                let length = operand.required_size();
                placed.push(OperandLayout {
                    operand: index,
                    operand_type: operand.operand_type,
                    dimensions: operand.dimensions.clone(),
                    offset,
                    length,
                });
                offset = offset.checked_add(length).ok_or_else(|| {
                    ServiceError::ResourceExhausted("execution layout size overflows".into())
                })?;
            }
            Ok(placed)
        };
        let inputs = place(&graph.inputs)?;
        let outputs = place(&graph.outputs)?;
        Ok(Self { inputs, outputs })
    }

    pub fn input_total(&self) -> usize {
        self.inputs.iter().map(|l| l.length).sum()
    }

    pub fn total_size(&self) -> usize {
        self.input_total() + self.outputs.iter().map(|l| l.length).sum::<usize>()
    }
}

/// Execution region bound to its published layout.
#[derive(Debug, Clone)]
pub struct ExecutionMemory {
    layout: ExecutionLayout,
    buffer: SharedBuffer,
    inputs: Vec<OperandInfo>,
    outputs: Vec<OperandInfo>,
}

impl ExecutionMemory {
    pub fn new(layout: ExecutionLayout, buffer: SharedBuffer) -> ServiceResult<Self> {
        if buffer.len() != layout.total_size() {
            return Err(ServiceError::bad_data(format!(
                "execution region holds {} bytes but the layout needs {}",
                buffer.len(),
                layout.total_size()
            )));
        }
        let map = |layouts: &[OperandLayout]| -> ServiceResult<Vec<OperandInfo>> {
            layouts
                .iter()
                .map(|l| OperandInfo::new(&buffer, l.offset, l.length))
                .collect()
        };
        let inputs = map(&layout.inputs)?;
        let outputs = map(&layout.outputs)?;
        Ok(Self {
            layout,
            buffer,
            inputs,
            outputs,
        })
    }

    pub fn layout(&self) -> &ExecutionLayout {
        &self.layout
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn inputs(&self) -> &[OperandInfo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OperandInfo] {
        &self.outputs
    }

    /// Lends the backend every input (read-only) and output (mutable) slice of the region at once.
    pub fn with_io<R>(&self, f: impl FnOnce(&[&[u8]], &mut [&mut [u8]]) -> R) -> ServiceResult<R> {
        if self.buffer.access() != AccessMode::ReadWrite {
            return Err(ServiceError::invalid_state(
                "execution region is mapped read-only",
            ));
        }
        let mut guard = self.buffer.lock();
        let (input_region, mut output_region) =
            guard.as_mut_slice().split_at_mut(self.layout.input_total());

        let mut input_region: &[u8] = input_region;
        let mut inputs = Vec::with_capacity(self.layout.inputs.len());
        for layout in &self.layout.inputs {
            let (head, tail) = input_region.split_at(layout.length);
            inputs.push(head);
            input_region = tail;
        }

        let mut outputs = Vec::with_capacity(self.layout.outputs.len());
        for layout in &self.layout.outputs {
            let (head, tail) = std::mem::take(&mut output_region).split_at_mut(layout.length);
            outputs.push(head);
            output_region = tail;
        }

        Ok(f(&inputs, &mut outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_bounds_are_checked() {
        let buffer = SharedBuffer::create(16, 1024).expect("buffer");
        buffer.map(8, 8).expect("in range");
        assert!(matches!(buffer.map(12, 8), Err(ServiceError::BadData(_))));
        assert!(buffer.map(usize::MAX, 2).is_err());
    }

    #[test]
    fn limit_is_enforced() {
        let err = SharedBuffer::create(2048, 1024).expect_err("over limit");
        assert!(matches!(err, ServiceError::ResourceExhausted(_)));
    }

    #[test]
    fn zero_length_buffers_are_usable() {
        let buffer = SharedBuffer::create(0, 0).expect("empty buffer");
        assert!(buffer.is_empty());
        let mapping = buffer.map_all();
        assert!(mapping.read_to_vec().is_empty());
        mapping.write(&[]).expect("empty write");
    }

    #[test]
    fn writes_are_visible_through_other_handles() {
        let buffer = SharedBuffer::create(8, 64).expect("buffer");
        let reader = buffer
            .clone_with_access(AccessMode::ReadOnly)
            .expect("read-only clone");
        buffer.map(4, 4).expect("map").write(&[1, 2, 3, 4]).expect("write");
        assert_eq!(reader.map_all().read_to_vec(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(reader.same_region(&buffer));
    }

    #[test]
    fn read_only_handles_reject_writes_and_upgrades() {
        let buffer = SharedBuffer::create(4, 64).expect("buffer");
        let ro = buffer
            .clone_with_access(AccessMode::ReadOnly)
            .expect("read-only clone");
        assert!(matches!(
            ro.map_all().write(&[0; 4]),
            Err(ServiceError::InvalidState(_))
        ));
        assert!(ro.clone_with_access(AccessMode::ReadWrite).is_err());
    }

    #[test]
    fn mapping_keeps_region_alive() {
        let mapping = {
            let buffer = SharedBuffer::create(4, 64).expect("buffer");
            let mapping = buffer.map(0, 4).expect("map");
            mapping.write(&[9, 8, 7, 6]).expect("write");
            mapping
        };
        assert_eq!(mapping.read_to_vec(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn exact_lengths_are_required() {
        let buffer = SharedBuffer::create(8, 64).expect("buffer");
        let mapping = buffer.map(0, 4).expect("map");
        assert!(mapping.write(&[0; 3]).is_err());
        let mut dst = [0u8; 5];
        assert!(mapping.read_into(&mut dst).is_err());
    }
}
