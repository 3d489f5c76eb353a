//! Polygon soup input for the mesh loader
//!
//! A soup is the flat form produced by a baking step: vertex positions, one
//! index buffer holding every polygon's vertex run back to back, and a count
//! per polygon. Optional narrowing declarations mark groups of polygons as a
//! capacity-limited bottleneck.

use crate::{Error, Result};
use glam::Vec3;

#[cfg(feature = "std")]
use std::fs::File;
#[cfg(feature = "std")]
use std::io::{BufRead, BufReader};
#[cfg(feature = "std")]
use std::path::Path;

/// A bottleneck declared over a set of polygons
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NarrowingDesc {
    /// Maximum number of agents allowed inside at once
    pub capacity: u32,
    /// Polygon indices (in soup order) that make up the narrowing
    pub polys: Vec<u32>,
}

/// Raw polygon soup
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolySoup {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub poly_vert_counts: Vec<u32>,
    pub narrowings: Vec<NarrowingDesc>,
}

impl PolySoup {
    /// Creates a new empty soup
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a soup from flat `[x, y, z, ...]` positions, a flat index buffer
    /// and per-polygon vertex counts
    pub fn from_flat(vertices: &[f32], indices: &[u32], poly_vert_counts: &[u32]) -> Result<Self> {
        if vertices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(format!(
                "vertex buffer length {} is not a multiple of 3",
                vertices.len()
            )));
        }

        Ok(Self {
            vertices: vertices
                .chunks_exact(3)
                .map(|c| Vec3::new(c[0], c[1], c[2]))
                .collect(),
            indices: indices.to_vec(),
            poly_vert_counts: poly_vert_counts.to_vec(),
            narrowings: Vec::new(),
        })
    }

    /// Adds a vertex and returns its index
    pub fn add_vertex(&mut self, v: Vec3) -> u32 {
        self.vertices.push(v);
        (self.vertices.len() - 1) as u32
    }

    /// Adds a polygon from vertex indices and returns its index
    pub fn add_polygon(&mut self, indices: &[u32]) -> u32 {
        self.indices.extend_from_slice(indices);
        self.poly_vert_counts.push(indices.len() as u32);
        (self.poly_vert_counts.len() - 1) as u32
    }

    /// Declares a narrowing over existing polygons
    pub fn add_narrowing(&mut self, capacity: u32, polys: &[u32]) {
        self.narrowings.push(NarrowingDesc {
            capacity,
            polys: polys.to_vec(),
        });
    }

    #[inline]
    pub fn vert_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn poly_count(&self) -> usize {
        self.poly_vert_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }

    /// Iterates the index run of every polygon.
    ///
    /// Stops early if the counts claim more indices than the buffer holds.
    pub fn polygons(&self) -> impl Iterator<Item = &[u32]> + '_ {
        let mut start = 0usize;
        self.poly_vert_counts.iter().map_while(move |&count| {
            let end = start + count as usize;
            let run = self.indices.get(start..end)?;
            start = end;
            Some(run)
        })
    }

    /// Loads a soup from an OBJ file
    ///
    /// This method is only available when the `std` feature is enabled.
    #[cfg(feature = "std")]
    pub fn from_obj<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut soup = Self::new();

        for line in reader.lines() {
            let line = line?;
            Self::parse_obj_line(&line, &mut soup)?;
        }

        Ok(soup)
    }

    /// Parses OBJ content from a string
    ///
    /// Faces are kept as n-gons; navmesh polygons are convex and must not be
    /// triangulated.
    ///
    /// # Example
    ///
    /// ```
    /// use navphys_common::PolySoup;
    ///
    /// let obj_content = r#"
    /// v 0.0 0.0 0.0
    /// v 1.0 0.0 0.0
    /// v 1.0 0.0 1.0
    /// v 0.0 0.0 1.0
    /// f 1 2 3 4
    /// "#;
    ///
    /// let soup = PolySoup::from_obj_str(obj_content).unwrap();
    /// assert_eq!(soup.vert_count(), 4);
    /// assert_eq!(soup.poly_count(), 1);
    /// ```
    pub fn from_obj_str(content: &str) -> Result<Self> {
        let mut soup = Self::new();

        for line in content.lines() {
            Self::parse_obj_line(line, &mut soup)?;
        }

        Ok(soup)
    }

    fn parse_obj_line(line: &str, soup: &mut Self) -> Result<()> {
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("v") => {
                let mut coord = |axis: &str| -> Result<f32> {
                    tokens
                        .next()
                        .ok_or_else(|| {
                            Error::InvalidMesh(format!("Invalid vertex: missing {axis} coordinate"))
                        })?
                        .parse::<f32>()
                        .map_err(|_| {
                            Error::InvalidMesh(format!(
                                "Invalid vertex: {axis} coordinate is not a number"
                            ))
                        })
                };
                let x = coord("x")?;
                let y = coord("y")?;
                let z = coord("z")?;
                soup.vertices.push(Vec3::new(x, y, z));
            }
            Some("f") => {
                let mut face = Vec::new();

                for token in tokens {
                    let index_str = token.split('/').next().unwrap_or(token);
                    let index = index_str.parse::<i64>().map_err(|_| {
                        Error::InvalidMesh("Invalid face: vertex index is not a number".to_string())
                    })?;

                    // OBJ indices are 1-based, negative ones count back from the end
                    let resolved = if index < 0 {
                        soup.vertices.len() as i64 + index
                    } else {
                        index - 1
                    };
                    if resolved < 0 || resolved >= soup.vertices.len() as i64 {
                        return Err(Error::InvalidMesh(format!(
                            "Invalid face: vertex index {index} out of range"
                        )));
                    }
                    face.push(resolved as u32);
                }

                if face.len() < 3 {
                    return Err(Error::InvalidMesh(
                        "Invalid face: less than 3 vertices".to_string(),
                    ));
                }

                soup.add_polygon(&face);
            }
            _ => {
                // Skip other lines (normals, texture coordinates, comments, etc.)
            }
        }

        Ok(())
    }

    /// Calculates the axis-aligned bounding box of the soup
    pub fn calculate_bounds(&self) -> (Vec3, Vec3) {
        if self.vertices.is_empty() {
            return (Vec3::ZERO, Vec3::ZERO);
        }

        self.vertices.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(bmin, bmax), v| (bmin.min(*v), bmax.max(*v)),
        )
    }
}
