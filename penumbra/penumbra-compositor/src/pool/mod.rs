//! Buffer pool: every offscreen buffer one compositor owns, created lazily and
//! reallocated when its required size or format changes.

use std::collections::HashMap;

use render_api::{BackendError, FilterMode, LightingBackend, PixelFormat, TargetDesc, TargetId};

/// Every buffer the pipeline can own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferId {
    /// Extended-resolution obstacle mask.
    Obstacle,
    /// 2x obstacle buffer used when antialiasing.
    ObstacleUpsample,
    /// Accumulated emitter light at small resolution.
    LightSource,
    /// Ping-pong partner of `LightSource` for blurring.
    LightSourceBlur,
    /// Single emitter colour in per-emitter mode.
    EmitterColor,
    /// Single emitter normal-mapped shading in per-emitter mode.
    EmitterShading,
    Normals,
    AmbientA,
    AmbientB,
    AmbientEmission,
    /// Screen-sized result of the composite program.
    ScreenComposite,
    /// Screen-sized scene colour when the viewer is isolated.
    IsolatedScene,
}

impl BufferId {
    pub const ALL: [BufferId; 12] = [
        BufferId::Obstacle,
        BufferId::ObstacleUpsample,
        BufferId::LightSource,
        BufferId::LightSourceBlur,
        BufferId::EmitterColor,
        BufferId::EmitterShading,
        BufferId::Normals,
        BufferId::AmbientA,
        BufferId::AmbientB,
        BufferId::AmbientEmission,
        BufferId::ScreenComposite,
        BufferId::IsolatedScene,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BufferId::Obstacle => "penumbra_obstacle",
            BufferId::ObstacleUpsample => "penumbra_obstacle_upsample",
            BufferId::LightSource => "penumbra_light_source",
            BufferId::LightSourceBlur => "penumbra_light_source_blur",
            BufferId::EmitterColor => "penumbra_emitter_color",
            BufferId::EmitterShading => "penumbra_emitter_shading",
            BufferId::Normals => "penumbra_normals",
            BufferId::AmbientA => "penumbra_ambient_a",
            BufferId::AmbientB => "penumbra_ambient_b",
            BufferId::AmbientEmission => "penumbra_ambient_emission",
            BufferId::ScreenComposite => "penumbra_screen_composite",
            BufferId::IsolatedScene => "penumbra_isolated_scene",
        }
    }

    /// Light buffers follow the planner's even-size rule; screen buffers match the screen.
    pub fn is_light_buffer(self) -> bool {
        !matches!(self, BufferId::ScreenComposite | BufferId::IsolatedScene)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffscreenBuffer {
    pub target: TargetId,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub filter: FilterMode,
    /// False after allocation or discard until a pass writes the buffer.
    pub contents_valid: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("buffer {id:?}: invalid size {width}x{height}")]
    InvalidSize { id: BufferId, width: u32, height: u32 },

    #[error("buffer {0:?} has not been allocated")]
    Missing(BufferId),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Default)]
pub struct BufferPool {
    buffers: HashMap<BufferId, OffscreenBuffer>,
    reallocations: u64,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `id` exists with the given size and format. Returns true when
    /// the buffer was (re)allocated, which invalidates its contents. A filter
    /// change alone only updates sampling state.
    pub fn ensure(
        &mut self,
        backend: &mut dyn LightingBackend,
        id: BufferId,
        width: u32,
        height: u32,
        format: PixelFormat,
        filter: FilterMode,
    ) -> Result<bool, PoolError> {
        if width == 0 || height == 0 || (id.is_light_buffer() && (width % 2 != 0 || height % 2 != 0)) {
            return Err(PoolError::InvalidSize { id, width, height });
        }
        if let Some(existing) = self.buffers.get_mut(&id) {
            if existing.width == width && existing.height == height && existing.format == format {
                if existing.filter != filter {
                    backend.set_filter_mode(existing.target, filter)?;
                    existing.filter = filter;
                }
                return Ok(false);
            }
        }
        if let Some(old) = self.buffers.remove(&id) {
            log::debug!(
                "{}: reallocating {}x{} -> {}x{}",
                id.label(),
                old.width,
                old.height,
                width,
                height
            );
            backend.destroy_target(old.target);
            self.reallocations += 1;
        }
        let target = backend.create_target(&TargetDesc { label: id.label(), width, height, format, filter })?;
        self.buffers.insert(
            id,
            OffscreenBuffer { target, width, height, format, filter, contents_valid: false },
        );
        Ok(true)
    }

    /// Mark contents stale so the next pass clears instead of blending.
    pub fn discard(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.contents_valid = false;
        }
    }

    pub fn release(&mut self, backend: &mut dyn LightingBackend, id: BufferId) {
        if let Some(buffer) = self.buffers.remove(&id) {
            backend.destroy_target(buffer.target);
        }
    }

    pub fn release_all(&mut self, backend: &mut dyn LightingBackend) {
        for (_, buffer) in self.buffers.drain() {
            backend.destroy_target(buffer.target);
        }
    }

    pub fn get(&self, id: BufferId) -> Option<&OffscreenBuffer> {
        self.buffers.get(&id)
    }

    pub fn target(&self, id: BufferId) -> Result<TargetId, PoolError> {
        self.buffers.get(&id).map(|b| b.target).ok_or(PoolError::Missing(id))
    }

    pub fn is_valid(&self, id: BufferId) -> bool {
        self.buffers.get(&id).is_some_and(|b| b.contents_valid)
    }

    pub fn mark_written(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.contents_valid = true;
        }
    }

    /// Change the filter of an allocated buffer, returning the previous one.
    pub fn set_filter(
        &mut self,
        backend: &mut dyn LightingBackend,
        id: BufferId,
        filter: FilterMode,
    ) -> Result<FilterMode, PoolError> {
        let buffer = self.buffers.get_mut(&id).ok_or(PoolError::Missing(id))?;
        let previous = buffer.filter;
        if previous != filter {
            backend.set_filter_mode(buffer.target, filter)?;
            buffer.filter = filter;
        }
        Ok(previous)
    }

    /// Total number of destroy-then-recreate cycles.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareBackend;

    #[test]
    fn ensure_is_idempotent() {
        let mut backend = SoftwareBackend::new();
        let mut pool = BufferPool::new();
        let created = pool
            .ensure(&mut backend, BufferId::LightSource, 64, 32, PixelFormat::Standard, FilterMode::Bilinear)
            .unwrap();
        assert!(created);
        pool.mark_written(BufferId::LightSource);
        let target = pool.target(BufferId::LightSource).unwrap();
        let again = pool
            .ensure(&mut backend, BufferId::LightSource, 64, 32, PixelFormat::Standard, FilterMode::Bilinear)
            .unwrap();
        assert!(!again);
        assert!(pool.is_valid(BufferId::LightSource));
        assert_eq!(pool.target(BufferId::LightSource).unwrap(), target);
        assert_eq!(pool.reallocations(), 0);
    }

    #[test]
    fn size_or_format_change_reallocates_and_invalidates() {
        let mut backend = SoftwareBackend::new();
        let mut pool = BufferPool::new();
        pool.ensure(&mut backend, BufferId::Obstacle, 64, 64, PixelFormat::Standard, FilterMode::Nearest).unwrap();
        pool.mark_written(BufferId::Obstacle);
        let old = pool.target(BufferId::Obstacle).unwrap();
        assert!(pool.ensure(&mut backend, BufferId::Obstacle, 80, 64, PixelFormat::Standard, FilterMode::Nearest).unwrap());
        assert!(!pool.is_valid(BufferId::Obstacle));
        assert!(!backend.has_target(old));
        assert!(pool.ensure(&mut backend, BufferId::Obstacle, 80, 64, PixelFormat::Hdr, FilterMode::Nearest).unwrap());
        assert_eq!(pool.reallocations(), 2);
        assert_eq!(backend.target_count(), 1);
    }

    #[test]
    fn filter_only_change_keeps_contents() {
        let mut backend = SoftwareBackend::new();
        let mut pool = BufferPool::new();
        pool.ensure(&mut backend, BufferId::Normals, 8, 8, PixelFormat::Standard, FilterMode::Nearest).unwrap();
        pool.mark_written(BufferId::Normals);
        assert!(!pool.ensure(&mut backend, BufferId::Normals, 8, 8, PixelFormat::Standard, FilterMode::Bilinear).unwrap());
        assert!(pool.is_valid(BufferId::Normals));
        let target = pool.target(BufferId::Normals).unwrap();
        assert_eq!(backend.filter_mode(target), Some(FilterMode::Bilinear));
    }

    #[test]
    fn rejects_odd_light_buffers_but_not_screen_buffers() {
        let mut backend = SoftwareBackend::new();
        let mut pool = BufferPool::new();
        assert!(matches!(
            pool.ensure(&mut backend, BufferId::LightSource, 63, 32, PixelFormat::Standard, FilterMode::Bilinear),
            Err(PoolError::InvalidSize { .. })
        ));
        assert!(pool
            .ensure(&mut backend, BufferId::ScreenComposite, 801, 601, PixelFormat::Standard, FilterMode::Bilinear)
            .is_ok());
    }

    #[test]
    fn discard_and_release() {
        let mut backend = SoftwareBackend::new();
        let mut pool = BufferPool::new();
        pool.ensure(&mut backend, BufferId::AmbientA, 8, 8, PixelFormat::Standard, FilterMode::Bilinear).unwrap();
        pool.ensure(&mut backend, BufferId::AmbientB, 8, 8, PixelFormat::Standard, FilterMode::Bilinear).unwrap();
        pool.mark_written(BufferId::AmbientA);
        pool.discard(BufferId::AmbientA);
        assert!(!pool.is_valid(BufferId::AmbientA));
        pool.release(&mut backend, BufferId::AmbientA);
        assert!(matches!(pool.target(BufferId::AmbientA), Err(PoolError::Missing(BufferId::AmbientA))));
        pool.release_all(&mut backend);
        assert!(pool.is_empty());
        assert_eq!(backend.target_count(), 0);
    }
}
