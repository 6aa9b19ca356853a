use bytemuck::{Pod, Zeroable};

use crate::core::types::LodDescriptor;

/// Indexed indirect draw (matches `VkDrawIndexedIndirectCommand`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectCommand {
    pub index_count: u32,
    /// 1 when the object is drawn this frame, 0 when culled.
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    /// Stable object index; keeps the slot parallel to the instance array.
    pub first_instance: u32,
}

impl DrawIndexedIndirectCommand {
    pub fn visible(slot: u32, lod: &LodDescriptor) -> Self {
        Self {
            index_count: lod.index_count,
            instance_count: 1,
            first_index: lod.first_index,
            vertex_offset: 0,
            first_instance: slot,
        }
    }

    pub fn culled(slot: u32, lod: &LodDescriptor) -> Self {
        Self {
            instance_count: 0,
            ..Self::visible(slot, lod)
        }
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.instance_count != 0
    }
}

/// Byte stride between consecutive commands.
pub const COMMAND_STRIDE: u32 = std::mem::size_of::<DrawIndexedIndirectCommand>() as u32;

/// Fixed-length command arena: one slot per object, indexed by object id.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectCommandBuffer {
    slots: Vec<DrawIndexedIndirectCommand>,
}

impl IndirectCommandBuffer {
    /// Preallocates `object_count` slots, initially drawing the finest LOD.
    pub fn new(object_count: u32, finest: &LodDescriptor) -> Self {
        let slots = (0..object_count)
            .map(|slot| DrawIndexedIndirectCommand::visible(slot, finest))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[DrawIndexedIndirectCommand] {
        &self.slots
    }

    /// Mutable slot access for the kernel. The slice length cannot change.
    pub fn slots_mut(&mut self) -> &mut [DrawIndexedIndirectCommand] {
        &mut self.slots
    }

    pub fn visible_slot_count(&self) -> u32 {
        self.slots.iter().filter(|cmd| cmd.is_visible()).count() as u32
    }

    pub fn byte_size(&self) -> u64 {
        self.slots.len() as u64 * COMMAND_STRIDE as u64
    }

    /// Draw-time resolution of an indirect-count draw: the first
    /// `min(count, max_draw_count)` slots, skipping zero-instance commands.
    pub fn resolve_draws(
        &self,
        count: u32,
        max_draw_count: u32,
    ) -> impl Iterator<Item = (u32, &DrawIndexedIndirectCommand)> + '_ {
        let executed = count.min(max_draw_count).min(self.slots.len() as u32) as usize;
        self.slots[..executed]
            .iter()
            .enumerate()
            .filter(|(_, cmd)| cmd.is_visible())
            .map(|(slot, cmd)| (slot as u32, cmd))
    }
}

/// Draw contract handed to the rendering stage. The executed draw count is
/// read from `count_buffer` at `count_offset` when the draw runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndirectCountCall<B> {
    pub buffer: B,
    pub offset: u64,
    pub stride: u32,
    pub count_buffer: B,
    pub count_offset: u64,
    pub max_draw_count: u32,
}

impl<B> DrawIndirectCountCall<B> {
    #[inline]
    pub fn executed_count(&self, count_value: u32) -> u32 {
        count_value.min(self.max_draw_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_layout_matches_vulkan() {
        assert_eq!(
            std::mem::size_of::<DrawIndexedIndirectCommand>(),
            std::mem::size_of::<ash::vk::DrawIndexedIndirectCommand>()
        );
        assert_eq!(COMMAND_STRIDE, 20);
    }

    #[test]
    fn test_slots_are_parallel_to_objects() {
        let lod = LodDescriptor::new(12, 300, 5.0);
        let buffer = IndirectCommandBuffer::new(8, &lod);
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.byte_size(), 8 * COMMAND_STRIDE as u64);
        for (slot, cmd) in buffer.slots().iter().enumerate() {
            assert_eq!(cmd.first_instance, slot as u32);
            assert_eq!(cmd.first_index, 12);
        }
    }

    #[test]
    fn test_resolve_draws_skips_culled_and_clamps() {
        let lod = LodDescriptor::new(0, 3, 5.0);
        let mut buffer = IndirectCommandBuffer::new(6, &lod);
        buffer.slots_mut()[1] = DrawIndexedIndirectCommand::culled(1, &lod);
        buffer.slots_mut()[4] = DrawIndexedIndirectCommand::culled(4, &lod);

        let drawn: Vec<u32> = buffer.resolve_draws(5, 6).map(|(slot, _)| slot).collect();
        assert_eq!(drawn, vec![0, 2, 3]);

        let drawn: Vec<u32> = buffer.resolve_draws(100, 3).map(|(slot, _)| slot).collect();
        assert_eq!(drawn, vec![0, 2]);
    }
}
