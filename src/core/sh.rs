//! Spherical harmonics bookkeeping for the color basis.
//!
//! The population stores color as SH coefficients split into the DC band
//! (`sh0`, view-independent) and the higher bands (`shN`). Only the layout
//! and the DC conversion live here; evaluation belongs to the renderer.

/// Y_0^0 = 0.28209479177387814 (constant)
pub const SH_C0: f32 = 0.282_094_8;

/// Highest SH degree the population layout supports.
pub const MAX_SH_DEGREE: u32 = 3;

/// Number of SH basis functions for a given degree: (d + 1)²
pub fn num_sh_coeffs(degree: u32) -> usize {
    let d = degree as usize + 1;
    d * d
}

/// Number of floats per particle in the `shN` array (all bands above DC, RGB).
pub fn rest_columns(degree: u32) -> usize {
    (num_sh_coeffs(degree) - 1) * 3
}

/// Convert a linear RGB color to the DC SH coefficient.
///
/// The DC coefficient is color / Y_0^0, centered so that a zero coefficient
/// renders mid-gray after the renderer's +0.5 offset.
pub fn rgb_to_sh0(rgb: [f32; 3]) -> [f32; 3] {
    [
        (rgb[0] - 0.5) / SH_C0,
        (rgb[1] - 0.5) / SH_C0,
        (rgb[2] - 0.5) / SH_C0,
    ]
}

/// Inverse of [`rgb_to_sh0`].
pub fn sh0_to_rgb(sh0: [f32; 3]) -> [f32; 3] {
    [
        sh0[0] * SH_C0 + 0.5,
        sh0[1] * SH_C0 + 0.5,
        sh0[2] * SH_C0 + 0.5,
    ]
}
