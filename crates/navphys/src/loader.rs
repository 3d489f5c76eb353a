//! Builds a runtime `Mesh` from a polygon soup

use std::collections::HashMap;

use glam::{IVec2, Vec2, Vec3};
use log::{debug, warn};
use navphys_common::{
    np_fail_cond, Bounds2, Error, FixedMapping, FixedPoint, Plane, PolySoup, Result, FP_RANGE,
};

use crate::mesh::{Mesh, MeshData, Narrowing, Poly, Wall};

/// Converts polygon soups into navmeshes.
///
/// Input vertices closer than the weld tolerance (per axis) are merged, so
/// neighbouring polygons that were exported with separate copies of the same
/// corner still end up linked.
#[derive(Debug, Clone, Copy)]
pub struct Loader {
    weld_tolerance: f32,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            weld_tolerance: 0.00001,
        }
    }
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weld_tolerance(mut self, tolerance: f32) -> Self {
        self.weld_tolerance = tolerance.max(0.0);
        self
    }

    pub fn weld_tolerance(&self) -> f32 {
        self.weld_tolerance
    }

    /// Loads a soup. Polygon ids of the result follow soup order.
    pub fn load(&self, soup: &PolySoup) -> Result<Mesh> {
        np_fail_cond!(
            soup.is_empty(),
            Error::InvalidMesh("polygon soup has no vertices or indices".to_string())
        );
        let expected: u64 = soup.poly_vert_counts.iter().map(|&c| c as u64).sum();
        np_fail_cond!(
            expected != soup.indices.len() as u64,
            Error::InvalidMesh(format!(
                "polygon counts expect {expected} indices, buffer holds {}",
                soup.indices.len()
            ))
        );

        let (fverts, mut rings) = self.weld(soup)?;

        let bounds = Bounds2::from_points_xz(fverts.iter())
            .ok_or_else(|| Error::InvalidMesh("no vertices referenced".to_string()))?;
        let mapping = FixedMapping::from_bounds(&bounds)?;
        let verts: Vec<IVec2> = fverts
            .iter()
            .map(|v| mapping.to_fixed(Vec2::new(v.x, v.z)))
            .collect();

        let mut walls = Vec::with_capacity(soup.indices.len());
        let mut polys = Vec::with_capacity(rings.len());
        for (poly_id, ring) in rings.iter_mut().enumerate() {
            let area2 = signed_area2(&verts, ring);
            np_fail_cond!(
                area2 == 0,
                Error::InvalidMesh(format!("polygon {poly_id} has zero area"))
            );
            if area2 < 0 {
                ring.reverse();
            }
            if !is_convex(&verts, ring) {
                warn!("polygon {poly_id} is not convex, movement inside it may misbehave");
            }
            polys.push(build_poly(poly_id as u32, ring, &verts, &fverts, &mut walls)?);
        }

        let links = link_walls(&walls);
        chain_hard_walls(&mut walls, &links);

        let mut narrowings = Vec::with_capacity(soup.narrowings.len());
        for (narrowing_id, desc) in soup.narrowings.iter().enumerate() {
            for &poly_id in &desc.polys {
                let poly = polys.get_mut(poly_id as usize).ok_or_else(|| {
                    Error::InvalidMesh(format!(
                        "narrowing {narrowing_id} names missing polygon {poly_id}"
                    ))
                })?;
                if let Some(existing) = poly.narrowing_id {
                    np_fail_cond!(
                        existing != narrowing_id as u32,
                        Error::InvalidMesh(format!(
                            "polygon {poly_id} is in narrowings {existing} and {narrowing_id}"
                        ))
                    );
                }
                poly.narrowing_id = Some(narrowing_id as u32);
            }
            narrowings.push(Narrowing {
                available: desc.capacity,
            });
        }

        debug!(
            "loaded navmesh: {} verts ({} welded away), {} polys, {} walls, {} linked, {} narrowings",
            verts.len(),
            soup.vertices.len().saturating_sub(verts.len()),
            polys.len(),
            walls.len(),
            links.iter().filter(|l| l.is_some()).count(),
            narrowings.len()
        );

        Mesh::from_data(MeshData {
            verts,
            fverts,
            walls,
            polys,
            links,
            narrowings,
            wall_connections: Vec::new(),
            mapping,
        })
    }

    /// Merges coincident vertices and returns the welded vertex list plus one
    /// ring of welded indices per polygon
    fn weld(&self, soup: &PolySoup) -> Result<(Vec<Vec3>, Vec<Vec<u32>>)> {
        let mut remap: Vec<Option<u32>> = vec![None; soup.vertices.len()];
        let mut fverts: Vec<Vec3> = Vec::new();
        let mut rings = Vec::with_capacity(soup.poly_count());

        for (poly_id, run) in soup.polygons().enumerate() {
            let mut ring: Vec<u32> = Vec::with_capacity(run.len());
            for &index in run {
                let v = *soup.vertices.get(index as usize).ok_or_else(|| {
                    Error::InvalidMesh(format!(
                        "polygon {poly_id} references missing vertex {index}"
                    ))
                })?;
                np_fail_cond!(
                    !v.is_finite(),
                    Error::InvalidMesh(format!("vertex {index} is not finite"))
                );
                let welded = match remap[index as usize] {
                    Some(welded) => welded,
                    None => {
                        let welded = self.find_or_create_vert(&mut fverts, v);
                        remap[index as usize] = Some(welded);
                        welded
                    }
                };
                if ring.last() != Some(&welded) {
                    ring.push(welded);
                }
            }
            while ring.len() > 1 && ring.first() == ring.last() {
                ring.pop();
            }
            np_fail_cond!(
                ring.len() < 3,
                Error::InvalidMesh(format!(
                    "polygon {poly_id} has fewer than 3 distinct vertices"
                ))
            );
            rings.push(ring);
        }

        Ok((fverts, rings))
    }

    fn find_or_create_vert(&self, fverts: &mut Vec<Vec3>, v: Vec3) -> u32 {
        let tolerance = self.weld_tolerance;
        if let Some(existing) = fverts
            .iter()
            .position(|u| (*u - v).abs().max_element() <= tolerance)
        {
            return existing as u32;
        }
        fverts.push(v);
        (fverts.len() - 1) as u32
    }
}

/// Twice the signed XZ area in fixed units, positive for counter-clockwise
fn signed_area2(verts: &[IVec2], ring: &[u32]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let a = verts[ring[i] as usize];
            let b = verts[ring[(i + 1) % n] as usize];
            a.cross_i64(b)
        })
        .sum()
}

fn is_convex(verts: &[IVec2], ring: &[u32]) -> bool {
    let n = ring.len();
    (0..n).all(|i| {
        let a = verts[ring[i] as usize];
        let b = verts[ring[(i + 1) % n] as usize];
        let c = verts[ring[(i + 2) % n] as usize];
        (b - a).cross_i64(c - b) >= 0
    })
}

fn build_poly(
    poly_id: u32,
    ring: &[u32],
    verts: &[IVec2],
    fverts: &[Vec3],
    walls: &mut Vec<Wall>,
) -> Result<Poly> {
    let n = ring.len();
    let first_wall = walls.len() as u32;

    for i in 0..n {
        let vert_a = ring[i];
        let vert_b = ring[(i + 1) % n];
        let wall_vec = verts[vert_b as usize] - verts[vert_a as usize];
        walls.push(Wall {
            vert_a,
            vert_b,
            prev_wall: None,
            next_wall: None,
            wall_vec,
            normal: IVec2::new(wall_vec.y, -wall_vec.x).normalized_to_scale(FP_RANGE as f32),
            poly_id,
        });
    }

    let points: Vec<Vec3> = ring.iter().map(|&v| fverts[v as usize]).collect();
    let (plane, newell) = Plane::from_newell(&points).ok_or_else(|| {
        Error::InvalidMesh(format!("polygon {poly_id} has no supporting plane"))
    })?;
    let plane = if plane.normal.y < 0.0 {
        plane.flipped()
    } else {
        plane
    };

    let sum = ring.iter().fold((0i64, 0i64), |(x, y), &v| {
        let p = verts[v as usize];
        (x + p.x as i64, y + p.y as i64)
    });
    let center = IVec2::new((sum.0 / n as i64) as i32, (sum.1 / n as i64) as i32);
    let center3 = points.iter().copied().sum::<Vec3>() / n as f32;

    Ok(Poly {
        first_wall,
        num_walls: n as u32,
        plane,
        center,
        center3,
        narrowing_id: None,
        area: newell.length() * 0.5,
    })
}

/// Pairs up walls that run along the same edge in opposite directions
fn link_walls(walls: &[Wall]) -> Vec<Option<u32>> {
    let mut edges: HashMap<(u32, u32), Vec<u32>> = HashMap::new();
    for (wall_id, wall) in walls.iter().enumerate() {
        let key = (wall.vert_a.min(wall.vert_b), wall.vert_a.max(wall.vert_b));
        edges.entry(key).or_default().push(wall_id as u32);
    }

    let mut links = vec![None; walls.len()];
    for (edge, shared) in &edges {
        match shared.as_slice() {
            [_] => {}
            &[w0, w1] => {
                let (a, b) = (&walls[w0 as usize], &walls[w1 as usize]);
                if a.poly_id != b.poly_id && a.vert_a == b.vert_b && a.vert_b == b.vert_a {
                    links[w0 as usize] = Some(b.poly_id);
                    links[w1 as usize] = Some(a.poly_id);
                } else {
                    warn!("edge {edge:?} is shared with matching winding, left as a hard wall");
                }
            }
            _ => warn!(
                "edge {edge:?} is shared by {} walls, left as a hard wall",
                shared.len()
            ),
        }
    }
    links
}

/// Connects every hard wall to the hard walls meeting it at either end,
/// preferring walls of the same polygon
fn chain_hard_walls(walls: &mut [Wall], links: &[Option<u32>]) {
    let mut starting_at: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut ending_at: HashMap<u32, Vec<u32>> = HashMap::new();
    for (wall_id, wall) in walls.iter().enumerate() {
        if links[wall_id].is_none() {
            starting_at.entry(wall.vert_a).or_default().push(wall_id as u32);
            ending_at.entry(wall.vert_b).or_default().push(wall_id as u32);
        }
    }

    let pick = |candidates: Option<&Vec<u32>>, wall_id: u32, poly_id: u32| -> Option<u32> {
        let candidates = candidates?;
        candidates
            .iter()
            .copied()
            .filter(|&w| w != wall_id)
            .find(|&w| walls[w as usize].poly_id == poly_id)
            .or_else(|| candidates.iter().copied().find(|&w| w != wall_id))
    };

    let chained: Vec<(Option<u32>, Option<u32>)> = walls
        .iter()
        .enumerate()
        .map(|(wall_id, wall)| {
            if links[wall_id].is_some() {
                return (None, None);
            }
            let wall_id = wall_id as u32;
            (
                pick(ending_at.get(&wall.vert_a), wall_id, wall.poly_id),
                pick(starting_at.get(&wall.vert_b), wall_id, wall.poly_id),
            )
        })
        .collect();

    for (wall, (prev, next)) in walls.iter_mut().zip(chained) {
        wall.prev_wall = prev;
        wall.next_wall = next;
    }
}
