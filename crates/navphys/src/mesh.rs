//! Runtime navmesh: fixed-point polygons, walls and links

use std::ops::Range;

use glam::{IVec2, Vec2, Vec3};
use log::{debug, warn};
use navphys_common::{
    closest_distance_between_segments, lines_intersect_integer, round_to_fixed, Error,
    FixedMapping, FixedPoint, Plane, Result,
};

use crate::{MoveConfig, MAX_MOVE_DEPTH};

/// Directed polygon edge, counter-clockwise around its polygon
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Wall {
    pub vert_a: u32,
    pub vert_b: u32,
    /// Hard wall ending where this one starts
    pub prev_wall: Option<u32>,
    /// Hard wall starting where this one ends
    pub next_wall: Option<u32>,
    /// `vert_b - vert_a`
    pub wall_vec: IVec2,
    /// Outward normal scaled to `FP_RANGE`
    pub normal: IVec2,
    pub poly_id: u32,
}

/// Convex polygon
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Poly {
    pub first_wall: u32,
    pub num_walls: u32,
    /// Supporting plane, normal pointing up
    pub plane: Plane,
    pub center: IVec2,
    pub center3: Vec3,
    pub narrowing_id: Option<u32>,
    /// Surface area in mesh units
    pub area: f32,
}

impl Poly {
    #[inline]
    pub fn walls(&self) -> Range<u32> {
        self.first_wall..self.first_wall.saturating_add(self.num_walls)
    }
}

/// Capacity limit of a group of polygons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Narrowing {
    pub available: u32,
}

/// Raw mesh tables, as produced by the loader or read from disk
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub verts: Vec<IVec2>,
    pub fverts: Vec<Vec3>,
    pub walls: Vec<Wall>,
    pub polys: Vec<Poly>,
    /// Polygon across each wall, `None` for hard walls
    pub links: Vec<Option<u32>>,
    pub narrowings: Vec<Narrowing>,
    /// Hard walls a mover may leave through onto another mesh instance,
    /// sorted
    pub wall_connections: Vec<u32>,
    pub mapping: FixedMapping,
}

/// Result of tracing a straight segment through the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    /// The segment ends inside `poly_id`
    Clear { poly_id: u32 },
    /// The segment hit a hard wall
    Slide {
        poly_id: u32,
        wall_id: u32,
        hit_point: IVec2,
    },
    /// Link traversal went too deep; `hit_point` is a safe stopping point
    Limit { poly_id: u32, hit_point: IVec2 },
}

impl TraceOutcome {
    #[inline]
    pub fn poly_id(&self) -> u32 {
        match *self {
            Self::Clear { poly_id }
            | Self::Slide { poly_id, .. }
            | Self::Limit { poly_id, .. } => poly_id,
        }
    }

    #[inline]
    pub fn is_clear(&self) -> bool {
        matches!(self, Self::Clear { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveResult {
    #[default]
    Ok,
    /// Stopped by the depth ceiling before using all of the velocity
    Limit,
}

/// Where a move ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    pub result: MoveResult,
    pub poly_id: u32,
    pub pos: IVec2,
    /// Hard wall the mover ended up against
    pub wall_id: Option<u32>,
    /// Where the move would have gone past the first connecting wall it
    /// met. `pos` is where it ends if nothing takes it over.
    pub exit: Option<IVec2>,
}

/// Bound on converted coordinates, well inside `i32` so that sums and
/// differences of two of them cannot overflow
const FIXED_LIMIT: i32 = 1 << 28;

#[inline]
fn clamp_fixed(p: IVec2) -> IVec2 {
    p.clamp(IVec2::splat(-FIXED_LIMIT), IVec2::splat(FIXED_LIMIT))
}

/// Working state of `Mesh::resolve_move`
struct MoveState {
    from: IVec2,
    vel: IVec2,
    poly_id: u32,
    hug_wall: Option<u32>,
    depth: u32,
    exit: Option<IVec2>,
}

impl MoveState {
    fn outcome(&self, result: MoveResult, poly_id: u32, pos: IVec2, wall_id: Option<u32>) -> MoveOutcome {
        MoveOutcome {
            result,
            poly_id,
            pos,
            wall_id,
            exit: self.exit,
        }
    }

    fn stop_on(&self, wall_id: u32, pos: IVec2) -> MoveOutcome {
        self.outcome(MoveResult::Ok, self.poly_id, pos, Some(wall_id))
    }
}

/// Navmesh in fixed-point space
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    data: MeshData,
}

impl Mesh {
    /// Wraps mesh tables after checking they are self-consistent
    pub fn from_data(data: MeshData) -> Result<Self> {
        validate(&data)?;
        Ok(Self { data })
    }

    #[inline]
    pub fn data(&self) -> &MeshData {
        &self.data
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.polys.is_empty()
    }

    #[inline]
    pub fn num_polys(&self) -> usize {
        self.data.polys.len()
    }

    #[inline]
    pub fn num_walls(&self) -> usize {
        self.data.walls.len()
    }

    #[inline]
    pub fn num_verts(&self) -> usize {
        self.data.verts.len()
    }

    #[inline]
    pub fn num_narrowings(&self) -> usize {
        self.data.narrowings.len()
    }

    /// # Panics
    ///
    /// Panics if `poly_id` is out of range.
    #[inline]
    pub fn poly(&self, poly_id: u32) -> &Poly {
        &self.data.polys[poly_id as usize]
    }

    #[inline]
    pub fn wall(&self, wall_id: u32) -> &Wall {
        &self.data.walls[wall_id as usize]
    }

    #[inline]
    pub fn vert(&self, vert_id: u32) -> IVec2 {
        self.data.verts[vert_id as usize]
    }

    #[inline]
    pub fn narrowing(&self, narrowing_id: u32) -> &Narrowing {
        &self.data.narrowings[narrowing_id as usize]
    }

    /// Polygon on the other side of a wall
    #[inline]
    pub fn link(&self, wall_id: u32) -> Option<u32> {
        self.data.links[wall_id as usize]
    }

    #[inline]
    pub fn is_hard_wall(&self, wall_id: u32) -> bool {
        self.link(wall_id).is_none()
    }

    /// Whether movers may leave through this wall onto another instance
    #[inline]
    pub fn is_connecting_wall(&self, wall_id: u32) -> bool {
        self.data.wall_connections.binary_search(&wall_id).is_ok()
    }

    pub fn wall_connections(&self) -> &[u32] {
        &self.data.wall_connections
    }

    /// Marks or unmarks a hard wall as connecting.
    ///
    /// Linked walls already lead somewhere and cannot be connecting.
    pub fn set_wall_connection(&mut self, wall_id: u32, connecting: bool) -> Result<()> {
        if wall_id as usize >= self.num_walls() || !self.is_hard_wall(wall_id) {
            return Err(Error::InvalidMesh(format!(
                "wall {wall_id} is not a hard wall of this mesh"
            )));
        }
        let connections = &mut self.data.wall_connections;
        match (connections.binary_search(&wall_id), connecting) {
            (Err(at), true) => connections.insert(at, wall_id),
            (Ok(at), false) => {
                connections.remove(at);
            }
            _ => {}
        }
        debug!("wall {wall_id} connecting: {connecting}");
        Ok(())
    }

    /// Wall closest to the mesh-space segment `from..to`
    pub fn nearest_wall(&self, from: Vec3, to: Vec3) -> Option<u32> {
        (0..self.num_walls() as u32)
            .map(|wall_id| {
                let wall = self.wall(wall_id);
                let a = self.data.fverts[wall.vert_a as usize];
                let b = self.data.fverts[wall.vert_b as usize];
                (wall_id, closest_distance_between_segments(from, to, a, b))
            })
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .map(|(wall_id, _)| wall_id)
    }

    #[inline]
    pub fn mapping(&self) -> &FixedMapping {
        &self.data.mapping
    }

    /// World XZ to fixed point, clamped so far-away points stay safe to
    /// subtract and add
    #[inline]
    pub fn to_fixed(&self, p: Vec2) -> IVec2 {
        clamp_fixed(self.data.mapping.to_fixed(p))
    }

    #[inline]
    pub fn to_float(&self, p: IVec2) -> Vec2 {
        self.data.mapping.to_float(p)
    }

    #[inline]
    pub fn vel_to_fixed(&self, v: Vec2) -> IVec2 {
        clamp_fixed(self.data.mapping.vel_to_fixed(v))
    }

    #[inline]
    pub fn vel_to_float(&self, v: IVec2) -> Vec2 {
        self.data.mapping.vel_to_float(v)
    }

    /// Start and end points of a wall
    #[inline]
    pub fn wall_points(&self, wall_id: u32) -> (IVec2, IVec2) {
        let wall = self.wall(wall_id);
        (self.vert(wall.vert_a), self.vert(wall.vert_b))
    }

    /// Side of `p` relative to a wall: positive inside, zero on the line,
    /// negative outside
    #[inline]
    pub fn wall_cross(&self, wall_id: u32, p: IVec2) -> i64 {
        let wall = self.wall(wall_id);
        wall.wall_vec.cross_i64(p - self.vert(wall.vert_a))
    }

    /// Inclusive containment test
    pub fn poly_contains_point(&self, poly_id: u32, p: IVec2) -> bool {
        self.poly(poly_id)
            .walls()
            .all(|wall_id| self.wall_cross(wall_id, p) >= 0)
    }

    /// First polygon (in index order) containing `p`
    pub fn find_poly_within(&self, p: IVec2) -> Option<u32> {
        (0..self.num_polys() as u32).find(|&poly_id| self.poly_contains_point(poly_id, p))
    }

    /// Polygon whose center is closest to `p`
    pub fn nearest_poly(&self, p: IVec2) -> Option<u32> {
        (0..self.num_polys() as u32).min_by_key(|&poly_id| {
            (self.poly(poly_id).center - p).length_squared_i64()
        })
    }

    /// Surface height at `p` in mesh space.
    ///
    /// Falls back to 0.0 with a warning when the polygon plane is vertical.
    pub fn find_height_on_poly(&self, poly_id: u32, p: IVec2) -> f32 {
        let fp = self.to_float(p);
        match self.poly(poly_id).plane.height_at(fp.x, fp.y) {
            Some(height) => height,
            None => {
                warn!("polygon {poly_id} is vertical, height lookup failed");
                0.0
            }
        }
    }

    /// Sum of all polygon areas
    pub fn total_area(&self) -> f32 {
        self.data.polys.iter().map(|poly| poly.area).sum()
    }

    /// Nearest wall of `poly_id` that the segment leaves through
    fn nearest_crossed_wall(&self, poly_id: u32, from: IVec2, to: IVec2) -> Option<(u32, IVec2)> {
        let mut best: Option<(u32, IVec2, f32)> = None;

        for wall_id in self.poly(poly_id).walls() {
            if self.wall_cross(wall_id, to) >= 0 || self.wall_cross(wall_id, from) < 0 {
                continue;
            }
            let (a, b) = self.wall_points(wall_id);
            let Some(hit) = lines_intersect_integer(a, b, from, to) else {
                continue;
            };
            let dist = from.distancef_to(hit);
            if best.map_or(true, |(_, _, best_dist)| dist < best_dist) {
                best = Some((wall_id, hit, dist));
            }
        }

        best.map(|(wall_id, hit, _)| (wall_id, hit))
    }

    /// Follows the straight segment `from..to` across links starting in
    /// `start_poly` until it ends inside a polygon or meets a hard wall.
    pub fn trace_segment(&self, from: IVec2, to: IVec2, start_poly: u32) -> TraceOutcome {
        let mut poly_id = start_poly;
        let mut depth = 0;

        loop {
            let Some((wall_id, hit_point)) = self.nearest_crossed_wall(poly_id, from, to) else {
                return TraceOutcome::Clear { poly_id };
            };

            let Some(linked) = self.link(wall_id) else {
                return TraceOutcome::Slide {
                    poly_id,
                    wall_id,
                    hit_point,
                };
            };

            if depth >= MAX_MOVE_DEPTH {
                return self.limit_stop(poly_id, linked, hit_point);
            }

            poly_id = linked;
            depth += 1;
        }
    }

    fn limit_stop(&self, poly_id: u32, linked: u32, hit_point: IVec2) -> TraceOutcome {
        if self.poly_contains_point(poly_id, hit_point) {
            TraceOutcome::Limit { poly_id, hit_point }
        } else if self.poly_contains_point(linked, hit_point) {
            TraceOutcome::Limit {
                poly_id: linked,
                hit_point,
            }
        } else {
            TraceOutcome::Limit {
                poly_id,
                hit_point: self.poly(poly_id).center,
            }
        }
    }

    /// Moves from `from` by `vel`, sliding along hard walls.
    ///
    /// `hug_wall` is the wall the mover was already sliding along, if any.
    pub fn resolve_move(
        &self,
        from: IVec2,
        vel: IVec2,
        poly_id: u32,
        hug_wall: Option<u32>,
        config: &MoveConfig,
    ) -> MoveOutcome {
        let mut state = MoveState {
            from,
            vel,
            poly_id,
            hug_wall,
            depth: 0,
            exit: None,
        };

        loop {
            if state.depth >= MAX_MOVE_DEPTH {
                return state.outcome(MoveResult::Limit, state.poly_id, state.from, state.hug_wall);
            }

            let vel_len = state.vel.lengthf();
            if vel_len < config.min_move_length {
                return state.outcome(MoveResult::Ok, state.poly_id, state.from, state.hug_wall);
            }

            if let Some(wall_id) = state.hug_wall {
                let wall = *self.wall(wall_id);
                let outwards = wall.normal.dot_normalized(state.vel);
                if outwards > 0.0 && state.exit.is_none() && self.is_connecting_wall(wall_id) {
                    state.exit = Some(clamp_fixed(state.from + state.vel));
                }
                if outwards > -config.hug_tolerance {
                    if let Some(done) = self.slide_along(&mut state, wall_id, &wall, vel_len) {
                        return done;
                    }
                    continue;
                }
                state.hug_wall = None;
            }

            let to = state.from + state.vel;
            match self.trace_segment(state.from, to, state.poly_id) {
                TraceOutcome::Clear { poly_id } => {
                    return state.outcome(MoveResult::Ok, poly_id, to, None);
                }
                TraceOutcome::Limit { poly_id, hit_point } => {
                    return state.outcome(MoveResult::Limit, poly_id, hit_point, None);
                }
                TraceOutcome::Slide {
                    poly_id,
                    wall_id,
                    hit_point,
                } => {
                    if state.exit.is_none() && self.is_connecting_wall(wall_id) {
                        state.exit = Some(clamp_fixed(to));
                    }
                    state.vel -= hit_point - state.from;
                    state.from = hit_point;
                    state.poly_id = poly_id;
                    state.hug_wall = Some(wall_id);
                    state.depth += 1;
                }
            }
        }
    }

    /// One step of sliding along a hard wall.
    ///
    /// Returns the final outcome when the move ends on this wall, otherwise
    /// hands the remaining velocity over to the neighbouring hard wall.
    fn slide_along(
        &self,
        state: &mut MoveState,
        wall_id: u32,
        wall: &Wall,
        vel_len: f32,
    ) -> Option<MoveOutcome> {
        let (start, end) = self.wall_points(wall_id);
        let wall_len = wall.wall_vec.lengthf();
        let wall_dot = wall.wall_vec.dot_normalized(state.vel);
        let travel = vel_len * wall_dot;
        let fract = (state.from.distancef_to(start) + travel) / wall_len;
        let to = start + round_to_fixed(wall.wall_vec.to_f32() * fract);

        let (corner, neighbour) = if wall_dot >= 0.0 {
            if fract <= 1.0 {
                return Some(state.stop_on(wall_id, to));
            }
            let Some(next) = wall.next_wall else {
                return Some(state.stop_on(wall_id, end));
            };
            (end, next)
        } else {
            if fract >= 0.0 {
                return Some(state.stop_on(wall_id, to));
            }
            let Some(prev) = wall.prev_wall else {
                return Some(state.stop_on(wall_id, start));
            };
            (start, prev)
        };

        state.vel = to - corner;
        state.from = corner;
        if self.is_connecting_wall(neighbour) {
            // the rest of the move is traced, so it can meet the connection
            state.hug_wall = None;
        } else {
            state.poly_id = self.wall(neighbour).poly_id;
            state.hug_wall = Some(neighbour);
        }
        state.depth += 1;
        None
    }

    /// Inward wall normal in mesh float space, on the XZ plane
    pub fn wall_inward_normal(&self, wall_id: u32) -> Vec3 {
        let dir = self.vel_to_float(self.wall(wall_id).wall_vec);
        let inward = Vec2::new(-dir.y, dir.x).normalize_or_zero();
        Vec3::new(inward.x, 0.0, inward.y)
    }
}

fn invalid(msg: String) -> Error {
    Error::InvalidMesh(msg)
}

fn in_fixed_range(p: IVec2) -> bool {
    p.x.unsigned_abs().max(p.y.unsigned_abs()) <= FIXED_LIMIT as u32
}

fn validate_mapping(mapping: &FixedMapping) -> Result<()> {
    let scales = [mapping.to_fixed_scale, mapping.to_float_scale];
    if scales.iter().any(|s| !s.is_finite() || s.x == 0.0 || s.y == 0.0) {
        return Err(invalid(format!("degenerate fixed-point mapping {mapping:?}")));
    }
    if !mapping.to_fixed_offset.is_finite() || !mapping.to_float_offset.is_finite() {
        return Err(invalid(format!("non-finite fixed-point mapping {mapping:?}")));
    }
    Ok(())
}

fn validate(data: &MeshData) -> Result<()> {
    let num_verts = data.verts.len();
    let num_walls = data.walls.len();
    let num_polys = data.polys.len();

    validate_mapping(&data.mapping)?;
    if let Some(vert_id) = data.verts.iter().position(|&v| !in_fixed_range(v)) {
        return Err(invalid(format!("vertex {vert_id} is outside the fixed-point range")));
    }

    if data.fverts.len() != num_verts {
        return Err(invalid(format!(
            "{} float vertices for {num_verts} fixed vertices",
            data.fverts.len()
        )));
    }
    if data.links.len() != num_walls {
        return Err(invalid(format!(
            "{} links for {num_walls} walls",
            data.links.len()
        )));
    }

    for (poly_id, poly) in data.polys.iter().enumerate() {
        let end = poly.first_wall.checked_add(poly.num_walls);
        if poly.num_walls < 3 || end.map_or(true, |end| end as usize > num_walls) {
            return Err(invalid(format!("polygon {poly_id} has a bad wall range")));
        }
        if !in_fixed_range(poly.center) {
            return Err(invalid(format!("polygon {poly_id} center is outside the fixed-point range")));
        }
        let walls = poly.walls();
        if let Some(narrowing_id) = poly.narrowing_id {
            if narrowing_id as usize >= data.narrowings.len() {
                return Err(invalid(format!(
                    "polygon {poly_id} references missing narrowing {narrowing_id}"
                )));
            }
        }
        for wall_id in walls {
            if data.walls[wall_id as usize].poly_id as usize != poly_id {
                return Err(invalid(format!(
                    "wall {wall_id} does not point back to polygon {poly_id}"
                )));
            }
        }
    }

    for (wall_id, wall) in data.walls.iter().enumerate() {
        if wall.vert_a as usize >= num_verts || wall.vert_b as usize >= num_verts {
            return Err(invalid(format!("wall {wall_id} references a missing vertex")));
        }
        if wall.poly_id as usize >= num_polys {
            return Err(invalid(format!("wall {wall_id} references a missing polygon")));
        }
        let chained = [wall.prev_wall, wall.next_wall];
        if chained.iter().flatten().any(|&w| w as usize >= num_walls) {
            return Err(invalid(format!("wall {wall_id} chains to a missing wall")));
        }
        let span = data.verts[wall.vert_b as usize] - data.verts[wall.vert_a as usize];
        if wall.wall_vec != span {
            return Err(invalid(format!(
                "wall {wall_id} vector {} does not match its vertices {span}",
                wall.wall_vec
            )));
        }
        if span == IVec2::ZERO || wall.normal == IVec2::ZERO {
            return Err(invalid(format!("wall {wall_id} is degenerate")));
        }
    }

    let sorted = data.wall_connections.windows(2).all(|w| w[0] < w[1]);
    if !sorted {
        return Err(invalid("wall connections are not sorted and unique".to_string()));
    }
    for &wall_id in &data.wall_connections {
        if wall_id as usize >= num_walls || data.links[wall_id as usize].is_some() {
            return Err(invalid(format!("connection on wall {wall_id}, which is not a hard wall")));
        }
    }

    // adjacency must be symmetric
    for (wall_id, link) in data.links.iter().enumerate() {
        let Some(other) = *link else { continue };
        let Some(other_poly) = data.polys.get(other as usize) else {
            return Err(invalid(format!("wall {wall_id} links to missing polygon {other}")));
        };
        let owner = data.walls[wall_id].poly_id;
        let links_back = other_poly
            .walls()
            .any(|w| data.links[w as usize] == Some(owner));
        if !links_back {
            return Err(invalid(format!(
                "polygon {other} does not link back to polygon {owner}"
            )));
        }
    }

    Ok(())
}
