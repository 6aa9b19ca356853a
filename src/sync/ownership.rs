//! Queue-family ownership transfer between the compute and graphics contexts.
//!
//! A resource is only reachable through an [`Owned`] token naming the
//! context that currently owns it. Handing it to the other context is a
//! two-phase operation: [`Owned::release`] records the release half and
//! yields a [`Released`] token; [`Released::acquire`] records the acquire
//! half on the receiving side and yields the new `Owned`. Both halves carry
//! identical family indices and layouts.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use ash::vk;

use crate::indirect::{IndirectCommandBuffer, StatsBlock};
use crate::pyramid::DepthImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextRole {
    Compute,
    Graphics,
}

/// Queue family indices of the two contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
}

impl QueueFamilies {
    pub fn new(graphics: u32, compute: u32) -> Self {
        Self { graphics, compute }
    }

    /// Both contexts on one family.
    pub fn shared(family: u32) -> Self {
        Self::new(family, family)
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.compute
    }

    pub fn family(&self, role: ContextRole) -> u32 {
        match role {
            ContextRole::Compute => self.compute,
            ContextRole::Graphics => self.graphics,
        }
    }
}

/// Marker for a context that can own resources.
pub trait QueueContext: Send + Sync + 'static {
    const ROLE: ContextRole;
}

#[derive(Debug, Clone, Copy)]
pub struct ComputeContext;

#[derive(Debug, Clone, Copy)]
pub struct GraphicsContext;

impl QueueContext for ComputeContext {
    const ROLE: ContextRole = ContextRole::Compute;
}

impl QueueContext for GraphicsContext {
    const ROLE: ContextRole = ContextRole::Graphics;
}

/// The resources handed between contexts each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferTarget {
    IndirectCommands,
    /// The statistics block; its first cells are the indirect count.
    CountBuffer,
    DepthImage,
}

/// How one context uses a transfer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
    pub layout: vk::ImageLayout,
}

impl TransferTarget {
    pub fn usage(self, role: ContextRole) -> ContextUsage {
        match (self, role) {
            (Self::IndirectCommands, ContextRole::Compute) => ContextUsage {
                stage: vk::PipelineStageFlags::COMPUTE_SHADER,
                access: vk::AccessFlags::SHADER_WRITE,
                layout: vk::ImageLayout::UNDEFINED,
            },
            (Self::CountBuffer, ContextRole::Compute) => ContextUsage {
                stage: vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
                access: vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::TRANSFER_WRITE,
                layout: vk::ImageLayout::UNDEFINED,
            },
            (Self::IndirectCommands | Self::CountBuffer, ContextRole::Graphics) => ContextUsage {
                stage: vk::PipelineStageFlags::DRAW_INDIRECT,
                access: vk::AccessFlags::INDIRECT_COMMAND_READ,
                layout: vk::ImageLayout::UNDEFINED,
            },
            (Self::DepthImage, ContextRole::Compute) => ContextUsage {
                stage: vk::PipelineStageFlags::COMPUTE_SHADER,
                access: vk::AccessFlags::SHADER_READ,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
            (Self::DepthImage, ContextRole::Graphics) => ContextUsage {
                stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            },
        }
    }
}

/// Device object a barrier applies to. Host resources carry no handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferHandle {
    Host,
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    Image {
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
    },
}

/// A resource that can change owning context.
pub trait Transferable {
    fn target(&self) -> TransferTarget;

    fn handle(&self) -> TransferHandle {
        TransferHandle::Host
    }
}

impl Transferable for IndirectCommandBuffer {
    fn target(&self) -> TransferTarget {
        TransferTarget::IndirectCommands
    }
}

impl Transferable for StatsBlock {
    fn target(&self) -> TransferTarget {
        TransferTarget::CountBuffer
    }
}

impl Transferable for DepthImage {
    fn target(&self) -> TransferTarget {
        TransferTarget::DepthImage
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferHalf {
    Release,
    Acquire,
    /// Same-family hand-off collapsed into one ordinary barrier.
    Full,
}

/// One half of an ownership transfer, in Vulkan barrier terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferBarrier {
    pub target: TransferTarget,
    pub handle: TransferHandle,
    pub half: TransferHalf,
    pub src_family: u32,
    pub dst_family: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}

impl TransferBarrier {
    fn between(
        half: TransferHalf,
        target: TransferTarget,
        handle: TransferHandle,
        from: ContextRole,
        to: ContextRole,
        families: &QueueFamilies,
    ) -> Self {
        let src = target.usage(from);
        let dst = target.usage(to);
        let (src_family, dst_family) = if families.is_shared() {
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        } else {
            (families.family(from), families.family(to))
        };

        // Each half only names stages of the queue it is recorded on.
        let (src_stage, dst_stage) = match half {
            TransferHalf::Release => (src.stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
            TransferHalf::Acquire => (dst.stage, dst.stage),
            TransferHalf::Full => (src.stage, dst.stage),
        };

        Self {
            target,
            handle,
            half,
            src_family,
            dst_family,
            src_stage,
            dst_stage,
            src_access: match half {
                TransferHalf::Acquire => vk::AccessFlags::empty(),
                _ => src.access,
            },
            dst_access: match half {
                TransferHalf::Release => vk::AccessFlags::empty(),
                _ => dst.access,
            },
            old_layout: src.layout,
            new_layout: dst.layout,
        }
    }

    /// True when both halves describe the same transfer.
    pub fn pairs_with(&self, other: &TransferBarrier) -> bool {
        self.target == other.target
            && self.handle == other.handle
            && self.src_family == other.src_family
            && self.dst_family == other.dst_family
            && self.old_layout == other.old_layout
            && self.new_layout == other.new_layout
            && matches!(
                (self.half, other.half),
                (TransferHalf::Release, TransferHalf::Acquire)
                    | (TransferHalf::Acquire, TransferHalf::Release)
            )
    }

    pub fn is_image(&self) -> bool {
        self.target == TransferTarget::DepthImage
    }
}

/// Barriers recorded together at one point of a context's command stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierBatch {
    barriers: Vec<TransferBarrier>,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, barrier: TransferBarrier) {
        self.barriers.push(barrier);
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferBarrier> {
        self.barriers.iter()
    }

    pub fn clear(&mut self) {
        self.barriers.clear();
    }

    pub fn src_stage_mask(&self) -> vk::PipelineStageFlags {
        self.barriers
            .iter()
            .fold(vk::PipelineStageFlags::empty(), |mask, b| mask | b.src_stage)
    }

    pub fn dst_stage_mask(&self) -> vk::PipelineStageFlags {
        self.barriers
            .iter()
            .fold(vk::PipelineStageFlags::empty(), |mask, b| mask | b.dst_stage)
    }

    pub fn buffer_barriers(&self) -> Vec<vk::BufferMemoryBarrier<'static>> {
        self.barriers
            .iter()
            .filter_map(|b| match b.handle {
                TransferHandle::Buffer {
                    buffer,
                    offset,
                    size,
                } => Some(
                    vk::BufferMemoryBarrier::default()
                        .src_access_mask(b.src_access)
                        .dst_access_mask(b.dst_access)
                        .src_queue_family_index(b.src_family)
                        .dst_queue_family_index(b.dst_family)
                        .buffer(buffer)
                        .offset(offset)
                        .size(size),
                ),
                _ => None,
            })
            .collect()
    }

    pub fn image_barriers(&self) -> Vec<vk::ImageMemoryBarrier<'static>> {
        self.barriers
            .iter()
            .filter_map(|b| match b.handle {
                TransferHandle::Image { image, aspect } => Some(
                    vk::ImageMemoryBarrier::default()
                        .src_access_mask(b.src_access)
                        .dst_access_mask(b.dst_access)
                        .old_layout(b.old_layout)
                        .new_layout(b.new_layout)
                        .src_queue_family_index(b.src_family)
                        .dst_queue_family_index(b.dst_family)
                        .image(image)
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: aspect,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        }),
                ),
                _ => None,
            })
            .collect()
    }
}

/// Exclusive access to `R` held by context `C`.
#[derive(Debug)]
pub struct Owned<R, C: QueueContext> {
    resource: R,
    _context: PhantomData<C>,
}

impl<R, C: QueueContext> Owned<R, C> {
    /// Initial ownership, before any transfer happened.
    pub fn new(resource: R) -> Self {
        Self {
            resource,
            _context: PhantomData,
        }
    }

    pub fn role(&self) -> ContextRole {
        C::ROLE
    }

    /// Gives up the resource for teardown.
    pub fn into_inner(self) -> R {
        self.resource
    }
}

impl<R: Transferable, C: QueueContext> Owned<R, C> {
    /// Records the release half into `batch` and hands the resource towards `D`.
    pub fn release<D: QueueContext>(
        self,
        families: &QueueFamilies,
        batch: &mut BarrierBatch,
    ) -> Released<R, C, D> {
        debug_assert_ne!(C::ROLE, D::ROLE, "release to the owning context");
        let half = if families.is_shared() {
            TransferHalf::Full
        } else {
            TransferHalf::Release
        };
        batch.push(TransferBarrier::between(
            half,
            self.resource.target(),
            self.resource.handle(),
            C::ROLE,
            D::ROLE,
            families,
        ));
        Released {
            resource: self.resource,
            _contexts: PhantomData,
        }
    }
}

impl<R, C: QueueContext> Deref for Owned<R, C> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R, C: QueueContext> DerefMut for Owned<R, C> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.resource
    }
}

/// A resource in flight from `C` to `D`. Unreachable until acquired.
#[must_use = "a released resource must be acquired by the receiving context"]
#[derive(Debug)]
pub struct Released<R, C: QueueContext, D: QueueContext> {
    resource: R,
    _contexts: PhantomData<(C, D)>,
}

impl<R: Transferable, C: QueueContext, D: QueueContext> Released<R, C, D> {
    /// Records the acquire half into `batch`. A same-family transfer has
    /// already been fully expressed by the release.
    pub fn acquire(self, families: &QueueFamilies, batch: &mut BarrierBatch) -> Owned<R, D> {
        if !families.is_shared() {
            batch.push(TransferBarrier::between(
                TransferHalf::Acquire,
                self.resource.target(),
                self.resource.handle(),
                C::ROLE,
                D::ROLE,
                families,
            ));
        }
        Owned::new(self.resource)
    }
}
