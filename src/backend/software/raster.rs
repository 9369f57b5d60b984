//! Triangle setup and scan conversion
//!
//! Conventions match the GPU: clip-space depth runs from 0 to 1, window
//! coordinates have their origin at the top-left corner and pixels are
//! sampled at their centers.

use glam::{Vec2, Vec4};

use crate::backend::types::{CullMode, Viewport};

/// Number of interpolated floats carried from vertex to fragment
pub const VARYINGS: usize = 12;

pub type Varyings = [f32; VARYINGS];

/// Vertex shader output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipVertex {
    pub position: Vec4,
    pub varyings: Varyings,
}

impl ClipVertex {
    fn lerp(&self, other: &ClipVertex, t: f32) -> ClipVertex {
        let mut varyings = [0.0; VARYINGS];
        for (i, v) in varyings.iter_mut().enumerate() {
            *v = self.varyings[i] + (other.varyings[i] - self.varyings[i]) * t;
        }
        ClipVertex {
            position: self.position.lerp(other.position, t),
            varyings,
        }
    }
}

/// A covered pixel, ready for shading
#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub x: u32,
    pub y: u32,
    /// Pixel center in window coordinates
    pub coord: Vec2,
    pub depth: f32,
    pub varyings: Varyings,
}

/// Window-space vertex
#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    position: Vec2,
    depth: f32,
    inv_w: f32,
    varyings: Varyings,
}

/// Rectangle fragments may land in, `max` exclusive
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Bounds {
    /// Intersection of the viewport with a `width` x `height` target
    pub fn new(viewport: &Viewport, width: u32, height: u32) -> Self {
        let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max);
        Self {
            min_x: clamp(viewport.x, width),
            min_y: clamp(viewport.y, height),
            max_x: clamp((viewport.x + viewport.width).ceil(), width),
            max_y: clamp((viewport.y + viewport.height).ceil(), height),
        }
    }
}

/// Clip a triangle against the near plane (`z >= 0`)
pub fn clip_near(triangle: [ClipVertex; 3]) -> Vec<ClipVertex> {
    let inside = |v: &ClipVertex| v.position.z >= 0.0;
    if triangle.iter().all(inside) {
        return triangle.to_vec();
    }

    let mut output = Vec::with_capacity(4);
    for i in 0..3 {
        let current = triangle[i];
        let next = triangle[(i + 1) % 3];
        match (inside(&current), inside(&next)) {
            (true, true) => output.push(next),
            (true, false) => {
                let t = current.position.z / (current.position.z - next.position.z);
                output.push(current.lerp(&next, t));
            }
            (false, true) => {
                let t = current.position.z / (current.position.z - next.position.z);
                output.push(current.lerp(&next, t));
                output.push(next);
            }
            (false, false) => {}
        }
    }
    output
}

fn to_screen(vertex: &ClipVertex, viewport: &Viewport) -> ScreenVertex {
    let inv_w = 1.0 / vertex.position.w;
    let ndc = vertex.position.truncate() * inv_w;
    ScreenVertex {
        position: Vec2::new(
            viewport.x + (ndc.x + 1.0) * 0.5 * viewport.width,
            viewport.y + (1.0 - ndc.y) * 0.5 * viewport.height,
        ),
        depth: ndc.z,
        inv_w,
        varyings: vertex.varyings,
    }
}

/// Edge function of `a -> b` at `p`.
///
/// Endpoints are put in a fixed order before evaluating, so an edge shared by
/// two triangles yields exactly opposite values for both.
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    let swapped = (b.x, b.y) < (a.x, a.y);
    let (a, b) = if swapped { (b, a) } else { (a, b) };
    let value = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if swapped {
        -value
    } else {
        value
    }
}

/// Tie breaking for pixels exactly on an edge: each shared edge belongs to
/// one of its two triangles.
fn owns(a: Vec2, b: Vec2) -> bool {
    let d = b - a;
    d.y > 0.0 || (d.y == 0.0 && d.x > 0.0)
}

fn covers(value: f32, a: Vec2, b: Vec2) -> bool {
    value > 0.0 || (value == 0.0 && owns(a, b))
}

/// Rasterize one clip-space triangle, calling `shade` for every covered pixel
pub fn rasterize_triangle<F>(
    triangle: [ClipVertex; 3],
    viewport: &Viewport,
    bounds: Bounds,
    cull: CullMode,
    mut shade: F,
) where
    F: FnMut(Fragment),
{
    let polygon = clip_near(triangle);
    if polygon.len() < 3 {
        return;
    }
    let screen: Vec<ScreenVertex> = polygon.iter().map(|v| to_screen(v, viewport)).collect();
    for i in 1..screen.len() - 1 {
        scan([screen[0], screen[i], screen[i + 1]], bounds, cull, &mut shade);
    }
}

fn scan<F>(vertices: [ScreenVertex; 3], bounds: Bounds, cull: CullMode, shade: &mut F)
where
    F: FnMut(Fragment),
{
    let [v0, mut v1, mut v2] = vertices;
    let mut area = edge(v0.position, v1.position, v2.position);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    // Counter-clockwise in NDC is clockwise once y points down
    let front_facing = area < 0.0;
    match cull {
        CullMode::Front if front_facing => return,
        CullMode::Back if !front_facing => return,
        _ => {}
    }
    if area < 0.0 {
        std::mem::swap(&mut v1, &mut v2);
        area = -area;
    }
    let (p0, p1, p2) = (v0.position, v1.position, v2.position);

    let min = p0.min(p1).min(p2);
    let max = p0.max(p1).max(p2);
    let x_start = (min.x.floor().max(bounds.min_x as f32)) as u32;
    let y_start = (min.y.floor().max(bounds.min_y as f32)) as u32;
    let x_end = (max.x.ceil().max(0.0) as u32).min(bounds.max_x);
    let y_end = (max.y.ceil().max(0.0) as u32).min(bounds.max_y);

    for y in y_start..y_end {
        for x in x_start..x_end {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let e0 = edge(p1, p2, p);
            let e1 = edge(p2, p0, p);
            let e2 = edge(p0, p1, p);
            if !(covers(e0, p1, p2) && covers(e1, p2, p0) && covers(e2, p0, p1)) {
                continue;
            }

            let (b0, b1, b2) = (e0 / area, e1 / area, e2 / area);
            let depth = b0 * v0.depth + b1 * v1.depth + b2 * v2.depth;

            let (w0, w1, w2) = (b0 * v0.inv_w, b1 * v1.inv_w, b2 * v2.inv_w);
            let sum = w0 + w1 + w2;
            let (w0, w1, w2) = (w0 / sum, w1 / sum, w2 / sum);
            let mut varyings = [0.0; VARYINGS];
            for (i, value) in varyings.iter_mut().enumerate() {
                *value = w0 * v0.varyings[i] + w1 * v1.varyings[i] + w2 * v2.varyings[i];
            }

            shade(Fragment {
                x,
                y,
                coord: p,
                depth,
                varyings,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32, y: f32, z: f32) -> ClipVertex {
        ClipVertex {
            position: Vec4::new(x, y, z, 1.0),
            varyings: [0.0; VARYINGS],
        }
    }

    fn coverage(triangles: &[[ClipVertex; 3]], size: u32) -> Vec<u32> {
        let viewport = Viewport::full(size, size);
        let bounds = Bounds::new(&viewport, size, size);
        let mut hits = vec![0; (size * size) as usize];
        for triangle in triangles {
            rasterize_triangle(*triangle, &viewport, bounds, CullMode::None, |f| {
                hits[(f.y * size + f.x) as usize] += 1;
            });
        }
        hits
    }

    #[test]
    fn test_quad_covers_every_pixel_once() {
        // Triangle strip order of the full-screen quad
        let a = vertex(-1.0, -1.0, 0.0);
        let b = vertex(1.0, -1.0, 0.0);
        let c = vertex(-1.0, 1.0, 0.0);
        let d = vertex(1.0, 1.0, 0.0);
        let hits = coverage(&[[a, b, c], [c, b, d]], 16);
        assert!(hits.iter().all(|h| *h == 1));
    }

    #[test]
    fn test_fan_of_shared_edges_has_no_double_coverage() {
        let center = vertex(0.1, -0.05, 0.5);
        let corners = [
            vertex(-1.0, -1.0, 0.5),
            vertex(1.0, -1.0, 0.5),
            vertex(1.0, 1.0, 0.5),
            vertex(-1.0, 1.0, 0.5),
        ];
        let triangles: Vec<[ClipVertex; 3]> = (0..4)
            .map(|i| [center, corners[i], corners[(i + 1) % 4]])
            .collect();
        let hits = coverage(&triangles, 32);
        assert!(hits.iter().all(|h| *h == 1));
    }

    #[test]
    fn test_top_left_origin() {
        // Triangle in the upper half of NDC lands in the upper rows
        let triangle = [
            vertex(-1.0, 1.0, 0.0),
            vertex(1.0, 1.0, 0.0),
            vertex(-1.0, 0.0, 0.0),
        ];
        let viewport = Viewport::full(8, 8);
        let mut rows = Vec::new();
        rasterize_triangle(
            triangle,
            &viewport,
            Bounds::new(&viewport, 8, 8),
            CullMode::None,
            |f| rows.push(f.y),
        );
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|y| *y < 4));
    }

    #[test]
    fn test_back_face_culling() {
        // Counter-clockwise in NDC
        let front = [
            vertex(-1.0, -1.0, 0.5),
            vertex(1.0, -1.0, 0.5),
            vertex(0.0, 1.0, 0.5),
        ];
        let back = [front[0], front[2], front[1]];
        let viewport = Viewport::full(8, 8);
        let bounds = Bounds::new(&viewport, 8, 8);
        let count = |triangle: [ClipVertex; 3]| {
            let mut n = 0;
            rasterize_triangle(triangle, &viewport, bounds, CullMode::Back, |_| n += 1);
            n
        };
        assert!(count(front) > 0);
        assert_eq!(count(back), 0);
    }

    #[test]
    fn test_triangle_behind_near_plane_is_dropped() {
        let triangle = [
            vertex(-1.0, -1.0, -0.5),
            vertex(1.0, -1.0, -0.5),
            vertex(0.0, 1.0, -0.5),
        ];
        assert!(clip_near(triangle).is_empty());
        assert!(coverage(&[triangle], 8).iter().all(|h| *h == 0));
    }

    #[test]
    fn test_near_clip_splits_into_quad() {
        let triangle = [
            vertex(-1.0, -1.0, -1.0),
            vertex(1.0, -1.0, 1.0),
            vertex(0.0, 1.0, 1.0),
        ];
        let polygon = clip_near(triangle);
        assert_eq!(polygon.len(), 4);
        assert!(polygon.iter().all(|v| v.position.z >= 0.0));
    }

    #[test]
    fn test_perspective_correct_varyings() {
        // Same screen triangle, one vertex pushed away in w; the varying must
        // not interpolate linearly in screen space.
        let mut near = vertex(-1.0, -1.0, 0.5);
        near.varyings[0] = 0.0;
        let mut far = ClipVertex {
            position: Vec4::new(3.0, -3.0, 1.5, 3.0),
            varyings: [0.0; VARYINGS],
        };
        far.varyings[0] = 1.0;
        let mut top = vertex(-1.0, 1.0, 0.5);
        top.varyings[0] = 0.0;

        let viewport = Viewport::full(64, 64);
        let mut sample = None;
        rasterize_triangle(
            [near, far, top],
            &viewport,
            Bounds::new(&viewport, 64, 64),
            CullMode::None,
            |f| {
                if f.x == 31 && f.y == 63 {
                    sample = Some(f.varyings[0]);
                }
            },
        );
        // Halfway across the screen is much closer to the near end in world space
        let value = sample.unwrap();
        assert!(value < 0.4, "got {}", value);
    }
}
