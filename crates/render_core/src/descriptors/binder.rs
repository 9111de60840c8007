//! Growable descriptor allocation for one layout
//!
//! Pools are sized to the exact per-set mix of the layout times a fixed set
//! count. When the current pool runs out another one is added; nothing is
//! moved or freed until the binder itself is retired, so set `i` always lives
//! in pool `i / capacity`.

use ash::vk;

use crate::foundation::logging::{DiagnosticEvent, Diagnostics};
use crate::gpu::{GpuDevice, RenderError, RenderResult};
use crate::reflection::{BindingKind, MaterialBinding, ShaderBindingLayout};
use crate::resources::{Deletion, DeletionQueue};

/// Descriptor sets of one layout
#[derive(Debug)]
pub struct DescriptorBinder {
    set: u32,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<MaterialBinding>,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    sets_per_pool: u32,
    pools: Vec<vk::DescriptorPool>,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorBinder {
    /// Create the set layout and the first pool
    pub fn new<D: GpuDevice>(device: &D, layout: &ShaderBindingLayout, sets_per_pool: u32) -> RenderResult<Self> {
        if layout.is_empty() {
            return Err(RenderError::InvalidArgument(format!("set {} has no bindings", layout.set)));
        }
        if sets_per_pool == 0 {
            return Err(RenderError::InvalidArgument("descriptor pools must hold at least one set".to_string()));
        }

        let pool_sizes: Vec<vk::DescriptorPoolSize> = [BindingKind::UniformBuffer, BindingKind::SampledImage]
            .into_iter()
            .filter_map(|kind| {
                let per_set = layout.count(kind);
                (per_set > 0).then(|| vk::DescriptorPoolSize {
                    ty: kind.descriptor_type(),
                    descriptor_count: per_set * sets_per_pool,
                })
            })
            .collect();

        let set_layout = device.create_descriptor_set_layout(&layout.layout_bindings())?;
        let first_pool = match device.create_descriptor_pool(sets_per_pool, &pool_sizes) {
            Ok(pool) => pool,
            Err(e) => {
                device.destroy_descriptor_set_layout(set_layout);
                return Err(e);
            }
        };

        log::debug!(
            "Descriptor binder for set {}: {} bindings, {} sets per pool",
            layout.set, layout.bindings.len(), sets_per_pool
        );
        Ok(Self {
            set: layout.set,
            layout: set_layout,
            bindings: layout.bindings.clone(),
            pool_sizes,
            sets_per_pool,
            pools: vec![first_pool],
            sets: Vec::new(),
        })
    }

    /// Vulkan set layout
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Bindings the sets carry
    pub fn bindings(&self) -> &[MaterialBinding] {
        &self.bindings
    }

    /// Pool sizes used for every pool
    pub fn pool_sizes(&self) -> &[vk::DescriptorPoolSize] {
        &self.pool_sizes
    }

    /// Number of pools owned
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Number of sets allocated
    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    /// Pool index and position within that pool of set `index`
    pub fn locate(&self, index: usize) -> (usize, usize) {
        let capacity = self.sets_per_pool as usize;
        (index / capacity, index % capacity)
    }

    /// Set allocated at `index`
    pub fn set_at(&self, index: usize) -> Option<vk::DescriptorSet> {
        self.sets.get(index).copied()
    }

    /// Allocate a set, growing the pool list when the current pool is full
    pub fn allocate<D: GpuDevice>(&mut self, device: &D, diagnostics: &Diagnostics) -> RenderResult<vk::DescriptorSet> {
        let (pool_index, _) = self.locate(self.sets.len());
        if pool_index >= self.pools.len() {
            self.grow_pool(device, diagnostics)?;
        }

        let pool = self.current_pool()?;
        let set = match device.allocate_descriptor_set(pool, self.layout) {
            Ok(set) => set,
            Err(RenderError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)) => {
                // Capacity accounting disagreed with the driver; start a fresh pool
                self.grow_pool(device, diagnostics)?;
                let pool = self.current_pool()?;
                let set = device.allocate_descriptor_set(pool, self.layout)?;
                // Keep `locate` consistent with the pool that holds the set
                let target = (self.pools.len() - 1) * self.sets_per_pool as usize;
                self.sets.resize(target, vk::DescriptorSet::null());
                set
            }
            Err(e) => return Err(e),
        };

        self.sets.push(set);
        Ok(set)
    }

    /// Add an empty pool
    pub fn grow_pool<D: GpuDevice>(&mut self, device: &D, diagnostics: &Diagnostics) -> RenderResult<()> {
        let pool = device.create_descriptor_pool(self.sets_per_pool, &self.pool_sizes)?;
        self.pools.push(pool);
        diagnostics.record(DiagnosticEvent::DescriptorPoolGrown { pools: self.pools.len() });
        Ok(())
    }

    /// Point a uniform buffer binding at a buffer
    ///
    /// `size` must equal the reflected block size.
    pub fn bind_buffer<D: GpuDevice>(
        &self,
        device: &D,
        set: vk::DescriptorSet,
        slot: u32,
        buffer: vk::Buffer,
        size: u64,
    ) -> RenderResult<()> {
        self.check_owned(set)?;
        let binding = self.binding(slot, BindingKind::UniformBuffer)?;
        if binding.size != size {
            return Err(RenderError::UniformSizeMismatch { slot, expected: binding.size, actual: size });
        }
        device.write_buffer_descriptor(set, slot, buffer, size);
        Ok(())
    }

    /// Point a sampled image binding at a view and sampler
    pub fn bind_image<D: GpuDevice>(
        &self,
        device: &D,
        set: vk::DescriptorSet,
        slot: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> RenderResult<()> {
        self.check_owned(set)?;
        self.binding(slot, BindingKind::SampledImage)?;
        device.write_image_descriptor(set, slot, view, sampler);
        Ok(())
    }

    /// Binding at `slot`, checked against the expected kind
    pub fn binding(&self, slot: u32, kind: BindingKind) -> RenderResult<&MaterialBinding> {
        let binding = self.bindings
            .iter()
            .find(|binding| binding.slot == slot)
            .ok_or(RenderError::UnknownBinding { slot })?;
        if binding.kind != kind {
            return Err(RenderError::BindingKindMismatch { slot, expected: binding.kind.name() });
        }
        Ok(binding)
    }

    /// Hand the pools and layout to a deletion queue
    ///
    /// The binder is empty afterwards and allocates nothing further.
    pub fn retire(&mut self, queue: &mut DeletionQueue) {
        log::trace!("Retiring descriptor binder for set {} ({} pools)", self.set, self.pools.len());
        queue.extend(self.pools.drain(..).map(Deletion::DescriptorPool));
        let layout = std::mem::replace(&mut self.layout, vk::DescriptorSetLayout::null());
        if layout != vk::DescriptorSetLayout::null() {
            queue.push(Deletion::DescriptorSetLayout(layout));
        }
        self.sets.clear();
    }

    fn current_pool(&self) -> RenderResult<vk::DescriptorPool> {
        self.pools.last().copied().ok_or_else(|| RenderError::invalid_operation("descriptor binder has no pool"))
    }

    fn check_owned(&self, set: vk::DescriptorSet) -> RenderResult<()> {
        if set == vk::DescriptorSet::null() || !self.sets.contains(&set) {
            return Err(RenderError::InvalidArgument(format!(
                "descriptor set {:?} was not allocated for set level {}", set, self.set
            )));
        }
        Ok(())
    }
}
