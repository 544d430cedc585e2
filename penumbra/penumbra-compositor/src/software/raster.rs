//! Edge-function triangle rasterizer.

use render_api::view::{mat4_mul, transform_point};
use render_api::ExtractedObject;

fn raw_edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

// Evaluated from a canonical endpoint order so both triangles sharing an
// edge compute bit-identical (negated) values.
fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    if (a[0], a[1]) <= (b[0], b[1]) {
        raw_edge(a, b, p)
    } else {
        -raw_edge(b, a, p)
    }
}

// Tie-break for pixel centres exactly on an edge: of `d` and `-d`, exactly one owns it.
fn owns(from: [f32; 2], to: [f32; 2]) -> bool {
    let d = [to[0] - from[0], to[1] - from[1]];
    d[1] > 0.0 || (d[1] == 0.0 && d[0] > 0.0)
}

fn covered(w: f32, from: [f32; 2], to: [f32; 2]) -> bool {
    w > 0.0 || (w == 0.0 && owns(from, to))
}

/// Rasterize `object` through `view_proj` into a `width` x `height` grid,
/// calling `fragment(x, y, object_uv)` once per covered pixel centre.
pub(crate) fn rasterize(
    object: &ExtractedObject,
    view_proj: &[f32; 16],
    width: u32,
    height: u32,
    mut fragment: impl FnMut(u32, u32, [f32; 2]),
) {
    let mvp = mat4_mul(view_proj, &object.transform);
    let projected: Vec<Option<([f32; 2], [f32; 2])>> = object
        .vertices()
        .into_iter()
        .map(|(p, uv)| {
            let clip = transform_point(&mvp, [p[0], p[1], 0.0]);
            if clip[3] <= 1e-6 {
                return None;
            }
            let ndc = [clip[0] / clip[3], clip[1] / clip[3]];
            Some((
                [(ndc[0] + 1.0) * 0.5 * width as f32, (1.0 - ndc[1]) * 0.5 * height as f32],
                uv,
            ))
        })
        .collect();
    let indices = object.indices();
    for tri in indices.chunks_exact(3) {
        let fetch = |i: u32| projected.get(i as usize).copied().flatten();
        let (Some(a), Some(mut b), Some(mut c)) = (fetch(tri[0]), fetch(tri[1]), fetch(tri[2])) else {
            continue;
        };
        let mut area = edge(a.0, b.0, c.0);
        if area.abs() < 1e-12 {
            continue;
        }
        if area < 0.0 {
            std::mem::swap(&mut b, &mut c);
            area = -area;
        }
        let min_x = a.0[0].min(b.0[0]).min(c.0[0]).floor().max(0.0) as u32;
        let min_y = a.0[1].min(b.0[1]).min(c.0[1]).floor().max(0.0) as u32;
        let max_x = (a.0[0].max(b.0[0]).max(c.0[0]).ceil().max(0.0) as u32).min(width);
        let max_y = (a.0[1].max(b.0[1]).max(c.0[1]).ceil().max(0.0) as u32).min(height);
        for y in min_y..max_y {
            for x in min_x..max_x {
                let p = [x as f32 + 0.5, y as f32 + 0.5];
                let w0 = edge(b.0, c.0, p);
                let w1 = edge(c.0, a.0, p);
                let w2 = edge(a.0, b.0, p);
                if !(covered(w0, b.0, c.0) && covered(w1, c.0, a.0) && covered(w2, a.0, b.0)) {
                    continue;
                }
                let (l0, l1, l2) = (w0 / area, w1 / area, w2 / area);
                let uv = [
                    a.1[0] * l0 + b.1[0] * l1 + c.1[0] * l2,
                    a.1[1] * l0 + b.1[1] * l1 + c.1[1] * l2,
                ];
                fragment(x, y, uv);
            }
        }
    }
}
