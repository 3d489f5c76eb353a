//! Small polygon soups used by tests and demos
//!
//! All soups lie on the y = 0 plane and wind counter-clockwise in XZ.

use glam::Vec3;
use navphys_common::PolySoup;

fn soup_from(points: &[(f32, f32)], polys: &[&[u32]]) -> PolySoup {
    let mut soup = PolySoup::new();
    for &(x, z) in points {
        soup.add_vertex(Vec3::new(x, 0.0, z));
    }
    for poly in polys {
        soup.add_polygon(poly);
    }
    soup
}

/// One square from (0, 0) to (size, size)
pub fn single_quad_soup(size: f32) -> PolySoup {
    soup_from(
        &[(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)],
        &[&[0, 1, 2, 3]],
    )
}

/// Two unit squares side by side along X, sharing the edge x = 1
pub fn two_quad_soup() -> PolySoup {
    soup_from(
        &[
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (2.0, 0.0),
            (2.0, 1.0),
        ],
        &[&[0, 1, 2, 3], &[1, 4, 5, 2]],
    )
}

/// L-shaped room: a 3x1 leg along X and a 1x2 leg along Z above its left end
pub fn l_room_soup() -> PolySoup {
    soup_from(
        &[
            (0.0, 0.0),
            (3.0, 0.0),
            (3.0, 1.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (1.0, 3.0),
            (0.0, 3.0),
        ],
        &[&[0, 1, 2, 3, 4], &[4, 3, 5, 6]],
    )
}

/// Two 4x4 rooms joined by a 2x1 corridor; polygon 1 (the corridor) is a
/// narrowing of the given capacity
pub fn corridor_soup(capacity: u32) -> PolySoup {
    let mut soup = soup_from(
        &[
            // left room
            (0.0, 0.0),
            (4.0, 0.0),
            (4.0, 1.5),
            (4.0, 2.5),
            (4.0, 4.0),
            (0.0, 4.0),
            // right room
            (6.0, 0.0),
            (10.0, 0.0),
            (10.0, 4.0),
            (6.0, 4.0),
            (6.0, 2.5),
            (6.0, 1.5),
        ],
        &[
            &[0, 1, 2, 3, 4, 5],
            &[2, 11, 10, 3],
            &[6, 7, 8, 9, 10, 11],
        ],
    );
    soup.add_narrowing(capacity, &[1]);
    soup
}

/// Grid of `cols` x `rows` square cells of side `cell`, cell (c, r) is
/// polygon `r * cols + c`
pub fn grid_soup(cols: u32, rows: u32, cell: f32) -> PolySoup {
    let mut soup = PolySoup::new();
    for r in 0..=rows {
        for c in 0..=cols {
            soup.add_vertex(Vec3::new(c as f32 * cell, 0.0, r as f32 * cell));
        }
    }
    let stride = cols + 1;
    for r in 0..rows {
        for c in 0..cols {
            let a = r * stride + c;
            soup.add_polygon(&[a, a + 1, a + 1 + stride, a + stride]);
        }
    }
    soup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soup_shapes() {
        assert_eq!(single_quad_soup(2.0).poly_count(), 1);
        assert_eq!(two_quad_soup().poly_count(), 2);
        assert_eq!(l_room_soup().poly_count(), 2);
        assert_eq!(corridor_soup(1).narrowings.len(), 1);
        let grid = grid_soup(3, 2, 1.0);
        assert_eq!(grid.poly_count(), 6);
        assert_eq!(grid.vert_count(), 12);
    }
}
