// Point-shell constructions around spheres.
//
// Two constructions are used by the waypoint generator:
// - **Geodesic shells** for static obstacles: a regular icosahedron whose
//   insphere has the requested radius, with each of its 20 faces subdivided
//   into a triangular lattice of frequency `f` and every lattice point
//   projected onto the circumscribing sphere. Frequency 1 is the bare
//   icosahedron (12 points); frequency `f` yields `10 f² + 2` points.
//   Adjacent shell points are separated by roughly `edge / f`, so raising the
//   frequency densifies a large obstacle's shell down to a target spacing.
// - **Cubes** for dynamic approach points and navigable interiors: the 8
//   vertices of a cube inscribed in a sphere of the given radius.
//
// Lattice points shared between faces (icosahedron vertices and edge
// points) are identified by their canonical lattice key, never by float
// comparison, and always computed from the same endpoints so that shared
// points are bit-identical.
//
// See also: `waypoint.rs`, which picks the target spacing and filters the
// resulting points.
//
// **Critical constraint: determinism.** Point order is a pure function of
// face order, lattice order and frequency.

use crate::types::Vec3;
use rustc_hash::FxHashSet;

/// Circumradius / inradius of a regular icosahedron.
pub const ICOSAHEDRON_CIRCUM_PER_IN: f32 = 1.258_408_6;

/// Edge length / circumradius of a regular icosahedron.
pub const ICOSAHEDRON_EDGE_PER_CIRCUM: f32 = 1.051_462_2;

/// Frequency cap for shell subdivision (`10 f² + 2` points).
pub const MAX_FREQUENCY: u32 = 48;

const PHI: f32 = 1.618_034;

/// Unnormalized icosahedron vertices: cyclic permutations of (0, ±1, ±φ).
const ICOSAHEDRON_VERTICES: [[f32; 3]; 12] = [
    [-1.0, PHI, 0.0],
    [1.0, PHI, 0.0],
    [-1.0, -PHI, 0.0],
    [1.0, -PHI, 0.0],
    [0.0, -1.0, PHI],
    [0.0, 1.0, PHI],
    [0.0, -1.0, -PHI],
    [0.0, 1.0, -PHI],
    [PHI, 0.0, -1.0],
    [PHI, 0.0, 1.0],
    [-PHI, 0.0, -1.0],
    [-PHI, 0.0, 1.0],
];

const ICOSAHEDRON_FACES: [[usize; 3]; 20] = [
    [0, 11, 5],
    [0, 5, 1],
    [0, 1, 7],
    [0, 7, 10],
    [0, 10, 11],
    [1, 5, 9],
    [5, 11, 4],
    [11, 10, 2],
    [10, 7, 6],
    [7, 1, 8],
    [3, 9, 4],
    [3, 4, 2],
    [3, 2, 6],
    [3, 6, 8],
    [3, 8, 9],
    [4, 9, 5],
    [2, 4, 11],
    [6, 2, 10],
    [8, 6, 7],
    [9, 8, 1],
];

/// A generated shell of points on a sphere.
#[derive(Clone, Debug)]
pub struct Shell {
    pub center: Vec3,
    /// Radius of the sphere every point lies on.
    pub radius: f32,
    pub frequency: u32,
    /// Largest chord between lattice-adjacent points.
    pub spacing: f32,
    pub points: Vec<Vec3>,
}

/// Identity of a lattice point, shared between faces that contain it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum LatticeKey {
    Vertex(usize),
    /// Edge between vertices `lo < hi`, `step` subdivisions from `lo`.
    Edge(usize, usize, u32),
    Face(usize, u32, u32),
}

fn unit_vertex(i: usize) -> Vec3 {
    let [x, y, z] = ICOSAHEDRON_VERTICES[i];
    Vec3::new(x, y, z).normalized()
}

/// Circumradius of the icosahedron whose insphere has radius `inner`.
pub fn circumradius(inner: f32) -> f32 {
    inner * ICOSAHEDRON_CIRCUM_PER_IN
}

/// Edge length of the bare (frequency 1) icosahedron around `inner`.
pub fn base_edge(inner: f32) -> f32 {
    circumradius(inner) * ICOSAHEDRON_EDGE_PER_CIRCUM
}

/// Unit-sphere position of lattice point `(i, j)` on `face` at frequency `f`:
/// barycentric weights `((f - i - j) / f, i / f, j / f)`.
fn lattice_point(face: usize, f: u32, i: u32, j: u32) -> (LatticeKey, Vec3) {
    let [a, b, c] = ICOSAHEDRON_FACES[face];
    let k = f - i - j;
    let edge_point = |from: usize, to: usize, steps_from: u32| {
        let (lo, hi, step) = if from < to {
            (from, to, steps_from)
        } else {
            (to, from, f - steps_from)
        };
        let p = unit_vertex(lo) + (unit_vertex(hi) - unit_vertex(lo)) * (step as f32 / f as f32);
        (LatticeKey::Edge(lo, hi, step), p.normalized())
    };
    match (k, i, j) {
        (_, 0, 0) => (LatticeKey::Vertex(a), unit_vertex(a)),
        (0, _, 0) => (LatticeKey::Vertex(b), unit_vertex(b)),
        (0, 0, _) => (LatticeKey::Vertex(c), unit_vertex(c)),
        // On edge a-b: i steps from a.
        (_, _, 0) => edge_point(a, b, i),
        // On edge a-c: j steps from a.
        (_, 0, _) => edge_point(a, c, j),
        // On edge b-c: j steps from b.
        (0, _, _) => edge_point(b, c, j),
        _ => {
            let w = 1.0 / f as f32;
            let p = unit_vertex(a) * (k as f32 * w)
                + unit_vertex(b) * (i as f32 * w)
                + unit_vertex(c) * (j as f32 * w);
            (LatticeKey::Face(face, i, j), p.normalized())
        }
    }
}

/// Geodesic shell of the given frequency around a sphere of radius `inner`
/// (the icosahedron's insphere). Points lie on the circumscribing sphere.
pub fn geodesic_shell(center: Vec3, inner: f32, frequency: u32) -> Shell {
    let f = frequency.clamp(1, MAX_FREQUENCY);
    let radius = circumradius(inner);

    let mut seen: FxHashSet<LatticeKey> = FxHashSet::default();
    let mut points = Vec::with_capacity((10 * f * f + 2) as usize);
    let mut spacing = 0.0f32;

    for face in 0..ICOSAHEDRON_FACES.len() {
        for i in 0..=f {
            for j in 0..=(f - i) {
                let (key, p) = lattice_point(face, f, i, j);
                if seen.insert(key) {
                    points.push(center + p * radius);
                }
                // Lattice neighbours (i+1, j), (i, j+1) and the diagonal
                // between them, each edge visited once per face.
                if i + j < f {
                    let (_, right) = lattice_point(face, f, i + 1, j);
                    let (_, up) = lattice_point(face, f, i, j + 1);
                    spacing = spacing
                        .max(p.distance(right) * radius)
                        .max(p.distance(up) * radius)
                        .max(right.distance(up) * radius);
                }
            }
        }
    }

    Shell {
        center,
        radius,
        frequency: f,
        spacing,
        points,
    }
}

/// Lowest-frequency shell around `inner` whose spacing is within
/// `tolerance` of `target`, or the densest allowed shell if none is.
pub fn shell_for_spacing(center: Vec3, inner: f32, target: f32, tolerance: f32) -> Shell {
    let start = (base_edge(inner) / target).ceil().max(1.0) as u32;
    let mut shell = geodesic_shell(center, inner, start);
    while shell.spacing > target + tolerance && shell.frequency < MAX_FREQUENCY {
        shell = geodesic_shell(center, inner, shell.frequency + 1);
    }
    shell
}

/// The 8 vertices of a cube inscribed in the sphere of `radius` around
/// `center`, in (x, y, z) sign order from (-,-,-) to (+,+,+).
pub fn cube_vertices(center: Vec3, radius: f32) -> [Vec3; 8] {
    let h = radius / 3.0f32.sqrt();
    let mut out = [center; 8];
    for (n, v) in out.iter_mut().enumerate() {
        let sx = if n & 4 != 0 { h } else { -h };
        let sy = if n & 2 != 0 { h } else { -h };
        let sz = if n & 1 != 0 { h } else { -h };
        *v = center + Vec3::new(sx, sy, sz);
    }
    out
}
