//! Diagnostics raised when the pipeline downgrades itself instead of failing.

use render_api::ShadingProgram;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Light buffers would be smaller than the minimum size.
    DensityTooCoarse,
    /// Light buffers would be larger than the maximum size.
    DensityTooFine,
    /// The viewer projection cannot be planned for this frame.
    InvalidProjection,
    /// Normal mapping requested with a perspective viewer.
    NormalMappingDisabled,
    /// Isolation requested by a viewer that already writes to a caller target.
    IsolationDisabled,
    /// A feature was switched off because the backend lacks one of its programs.
    ProgramUnavailable(ShadingProgram),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Record a diagnostic and log it, unless the same one is already held.
pub(crate) fn report(diagnostics: &mut Vec<Diagnostic>, kind: DiagnosticKind, message: String) {
    if diagnostics.iter().any(|d| d.kind == kind && d.message == message) {
        return;
    }
    log::warn!("penumbra: {message}");
    diagnostics.push(Diagnostic { kind, message });
}
