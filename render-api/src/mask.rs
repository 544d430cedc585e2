//! Visibility tags carried by scene objects and used as render masks.

bitflags::bitflags! {
    /// A render call draws every object whose tags intersect the mask.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct VisibilityMask: u32 {
        /// Regular scene content seen by the primary viewer.
        const SCENE = 1 << 0;
        /// Light-blocking geometry.
        const OBSTACLE = 1 << 1;
        /// Emitter light geometry.
        const LIGHT_SOURCE = 1 << 2;
        /// Geometry feeding the ambient integrator.
        const AMBIENT_EMISSION = 1 << 3;
        /// Obstacles whose own material cannot write a blocking value.
        const OPACITY_OVERRIDE = 1 << 4;
        /// Geometry drawn into the normal buffer.
        const NORMAL_MAPPED = 1 << 5;
    }
}
