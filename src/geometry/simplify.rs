//! Quadric error metric simplification by half-edge collapse.
//!
//! A collapse moves one vertex onto a neighbour, so surviving vertices keep
//! their original attributes and no new vertex data has to be synthesised.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use glam::DVec3;

/// Normals of neighbouring triangles must stay within this cosine of their
/// original direction.
const MIN_NORMAL_COSINE: f64 = 0.2;

/// Symmetric 4x4 error quadric, upper triangle.
#[derive(Debug, Clone, Copy, Default)]
struct Quadric([f64; 10]);

impl Quadric {
    fn from_plane(n: DVec3, d: f64) -> Self {
        let (a, b, c) = (n.x, n.y, n.z);
        Self([
            a * a,
            a * b,
            a * c,
            a * d,
            b * b,
            b * c,
            b * d,
            c * c,
            c * d,
            d * d,
        ])
    }

    fn add(&self, other: &Quadric) -> Quadric {
        let mut sum = *self;
        for (s, o) in sum.0.iter_mut().zip(other.0) {
            *s += o;
        }
        sum
    }

    /// Sum of squared distances from `p` to the accumulated planes.
    fn error(&self, p: DVec3) -> f64 {
        let q = &self.0;
        let (x, y, z) = (p.x, p.y, p.z);
        q[0] * x * x
            + 2.0 * q[1] * x * y
            + 2.0 * q[2] * x * z
            + 2.0 * q[3] * x
            + q[4] * y * y
            + 2.0 * q[5] * y * z
            + 2.0 * q[6] * y
            + q[7] * z * z
            + 2.0 * q[8] * z
            + q[9]
    }
}

#[derive(Debug, Clone, Copy)]
struct Collapse {
    cost: f64,
    from: u32,
    to: u32,
    stamps: (u32, u32),
}

impl PartialEq for Collapse {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Collapse {}

impl PartialOrd for Collapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Collapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the heap pops the cheapest collapse first.
        other.cost.total_cmp(&self.cost)
    }
}

struct Collapser {
    positions: Vec<DVec3>,
    quadrics: Vec<Quadric>,
    triangles: Vec<[u32; 3]>,
    alive: Vec<bool>,
    vertex_triangles: Vec<Vec<usize>>,
    locked: Vec<bool>,
    removed: Vec<bool>,
    stamps: Vec<u32>,
    heap: BinaryHeap<Collapse>,
    live: usize,
}

fn normal(a: DVec3, b: DVec3, c: DVec3) -> DVec3 {
    (b - a).cross(c - a)
}

impl Collapser {
    fn new(positions: &[[f32; 3]], indices: &[u32]) -> Self {
        let positions: Vec<DVec3> = positions
            .iter()
            .map(|p| DVec3::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2])))
            .collect();
        let n = positions.len();
        let triangles: Vec<[u32; 3]> = indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();

        let mut quadrics = vec![Quadric::default(); n];
        let mut vertex_triangles = vec![Vec::new(); n];
        let mut edge_uses: HashMap<(u32, u32), u32> = HashMap::new();
        for (t, &tri) in triangles.iter().enumerate() {
            let [a, b, c] = tri.map(|v| positions[v as usize]);
            let plane = normal(a, b, c).normalize_or_zero();
            if plane != DVec3::ZERO {
                let q = Quadric::from_plane(plane, -plane.dot(a));
                for v in tri {
                    quadrics[v as usize] = quadrics[v as usize].add(&q);
                }
            }
            for k in 0..3 {
                let (u, v) = (tri[k], tri[(k + 1) % 3]);
                vertex_triangles[u as usize].push(t);
                *edge_uses.entry((u.min(v), u.max(v))).or_default() += 1;
            }
        }

        // Border and non-manifold edges pin both endpoints. After welding this
        // also covers UV and normal seams, which stay split.
        let mut locked = vec![false; n];
        for (&(u, v), &uses) in &edge_uses {
            if uses != 2 {
                locked[u as usize] = true;
                locked[v as usize] = true;
            }
        }

        let live = triangles.len();
        let mut collapser = Self {
            positions,
            quadrics,
            alive: vec![true; triangles.len()],
            triangles,
            vertex_triangles,
            locked,
            removed: vec![false; n],
            stamps: vec![0; n],
            heap: BinaryHeap::new(),
            live,
        };
        for &(u, v) in edge_uses.keys() {
            collapser.push(u, v);
            collapser.push(v, u);
        }
        collapser
    }

    fn push(&mut self, from: u32, to: u32) {
        let (f, t) = (from as usize, to as usize);
        if self.locked[f] {
            return;
        }
        let cost = self.quadrics[f].add(&self.quadrics[t]).error(self.positions[t]);
        self.heap.push(Collapse {
            cost,
            from,
            to,
            stamps: (self.stamps[f], self.stamps[t]),
        });
    }

    fn live_triangles(&self, v: u32) -> impl Iterator<Item = usize> + '_ {
        self.vertex_triangles[v as usize]
            .iter()
            .copied()
            .filter(|&t| self.alive[t])
    }

    fn neighbours(&self, v: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .live_triangles(v)
            .flat_map(|t| self.triangles[t])
            .filter(|&u| u != v)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Whether moving `from` onto `to` keeps every surviving triangle facing
    /// the same way and non-degenerate.
    fn preserves_orientation(&self, from: u32, to: u32) -> bool {
        let target = self.positions[to as usize];
        self.live_triangles(from)
            .filter(|&t| !self.triangles[t].contains(&to))
            .all(|t| {
                let tri = self.triangles[t];
                let [a, b, c] = tri.map(|v| self.positions[v as usize]);
                let [na, nb, nc] = tri.map(|v| if v == from { target } else { self.positions[v as usize] });
                let before = normal(a, b, c).normalize_or_zero();
                let after = normal(na, nb, nc).normalize_or_zero();
                after != DVec3::ZERO && before.dot(after) > MIN_NORMAL_COSINE
            })
    }

    fn try_collapse(&mut self, collapse: Collapse, target: usize) -> bool {
        let Collapse { from, to, .. } = collapse;
        let shared: Vec<usize> = self
            .live_triangles(from)
            .filter(|&t| self.triangles[t].contains(&to))
            .collect();
        if shared.is_empty() || self.live - shared.len() < target {
            return false;
        }

        // Link condition: the two fans may only meet at the shared triangles.
        let from_ring = self.neighbours(from);
        let common = self
            .neighbours(to)
            .into_iter()
            .filter(|v| from_ring.binary_search(v).is_ok())
            .count();
        if common != shared.len() {
            return false;
        }
        if !self.preserves_orientation(from, to) {
            return false;
        }

        let fan: Vec<usize> = self.live_triangles(from).collect();
        for t in fan {
            if self.triangles[t].contains(&to) {
                self.alive[t] = false;
                self.live -= 1;
            } else {
                for v in self.triangles[t].iter_mut() {
                    if *v == from {
                        *v = to;
                    }
                }
                self.vertex_triangles[to as usize].push(t);
            }
        }
        let (f, t) = (from as usize, to as usize);
        self.removed[f] = true;
        self.vertex_triangles[f].clear();
        self.quadrics[t] = self.quadrics[t].add(&self.quadrics[f]);
        let alive = &self.alive;
        self.vertex_triangles[t].retain(|&tri| alive[tri]);
        self.stamps[t] += 1;

        for n in self.neighbours(to) {
            self.push(n, to);
            self.push(to, n);
        }
        true
    }

    fn run(&mut self, target: usize, max_error: f64) {
        while self.live > target {
            let Some(collapse) = self.heap.pop() else {
                break;
            };
            let (f, t) = (collapse.from as usize, collapse.to as usize);
            if self.removed[f] || self.removed[t] || collapse.stamps != (self.stamps[f], self.stamps[t]) {
                continue;
            }
            if collapse.cost > max_error {
                break;
            }
            self.try_collapse(collapse, target);
        }
    }

    fn into_indices(self) -> Vec<u32> {
        self.triangles
            .iter()
            .zip(&self.alive)
            .filter(|(_, alive)| **alive)
            .flat_map(|(tri, _)| *tri)
            .collect()
    }
}

/// Collapses edges cheapest-first until `target_triangles` remain or the next
/// collapse would cost more than `max_error` (a squared distance).
///
/// Returns the surviving triangles in their original order, still indexing
/// into `positions`. Never returns fewer than `target_triangles` triangles
/// unless the input already had fewer.
pub fn simplify(
    positions: &[[f32; 3]],
    indices: &[u32],
    target_triangles: usize,
    max_error: f64,
) -> Vec<u32> {
    let mut collapser = Collapser::new(positions, indices);
    collapser.run(target_triangles, max_error);
    let before = indices.len() / 3;
    let after = collapser.live;
    log::debug!("simplify: {before} -> {after} triangles (target {target_triangles})");
    collapser.into_indices()
}
