// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Weighted average of the selection survivors.

/// Combine `(offset, root_distance)` pairs into a system offset and jitter.
///
/// Each survivor is weighted by the reciprocal of its root distance. The
/// jitter is the weighted RMS of each offset against the first entry, which
/// is the system peer. An empty slice yields `(0.0, 0.0)`.
pub fn combine(survivors: &[(f64, f64)]) -> (f64, f64) {
    let Some(&(reference, _)) = survivors.first() else {
        return (0.0, 0.0);
    };
    let mut y = 0.0;
    let mut z = 0.0;
    let mut w = 0.0;
    for &(offset, distance) in survivors {
        let x = 1.0 / distance;
        y += x;
        z += offset * x;
        w += (offset - reference).powi(2) * x;
    }
    (z / y, (w / y).sqrt())
}
