//! Binary serialization of loaded navmeshes
//!
//! Saves the runtime tables produced by the loader so a mesh can be shipped
//! pre-baked and linked without re-running the loader. All values are
//! little-endian.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{IVec2, Vec2, Vec3};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use navphys_common::{Error, FixedMapping, Plane, Result};

use crate::mesh::{Mesh, MeshData, Narrowing, Poly, Wall};

/// Magic number for mesh files ('NPMS')
pub const NP_MESH_MAGIC: u32 = 0x534D_504E; // 'NPMS' in little-endian

/// Current mesh file version
pub const NP_MESH_VERSION: u32 = 2;

/// Null index value
const NP_NULL_INDEX: u32 = 0xffff_ffff;

const VERT_RECORD_SIZE: usize = 2 * 4 + 3 * 4;
const WALL_RECORD_SIZE: usize = 4 * 4 + 4 * 4 + 2 * 4;
const POLY_RECORD_SIZE: usize = 2 * 4 + 4 * 4 + 2 * 4 + 3 * 4 + 4 + 4;
const NARROWING_RECORD_SIZE: usize = 4;
const CONNECTION_RECORD_SIZE: usize = 4;
const HEADER_SIZE: usize = 7 * 4;
const MAPPING_SIZE: usize = 8 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MeshHeader {
    magic: u32,
    version: u32,
    vert_count: u32,
    wall_count: u32,
    poly_count: u32,
    narrowing_count: u32,
    connection_count: u32,
}

impl MeshHeader {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.vert_count)?;
        writer.write_u32::<LittleEndian>(self.wall_count)?;
        writer.write_u32::<LittleEndian>(self.poly_count)?;
        writer.write_u32::<LittleEndian>(self.narrowing_count)?;
        writer.write_u32::<LittleEndian>(self.connection_count)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let header = Self {
            magic: reader.read_u32::<LittleEndian>()?,
            version: reader.read_u32::<LittleEndian>()?,
            vert_count: reader.read_u32::<LittleEndian>()?,
            wall_count: reader.read_u32::<LittleEndian>()?,
            poly_count: reader.read_u32::<LittleEndian>()?,
            narrowing_count: reader.read_u32::<LittleEndian>()?,
            connection_count: reader.read_u32::<LittleEndian>()?,
        };
        if header.magic != NP_MESH_MAGIC {
            return Err(Error::Format(format!(
                "bad magic 0x{:08x}, expected 0x{NP_MESH_MAGIC:08x}",
                header.magic
            )));
        }
        if header.version != NP_MESH_VERSION {
            return Err(Error::Format(format!(
                "unsupported version {}, expected {NP_MESH_VERSION}",
                header.version
            )));
        }
        Ok(header)
    }

    fn payload_size(&self) -> usize {
        self.vert_count as usize * VERT_RECORD_SIZE
            + self.wall_count as usize * WALL_RECORD_SIZE
            + self.poly_count as usize * POLY_RECORD_SIZE
            + self.narrowing_count as usize * NARROWING_RECORD_SIZE
            + self.connection_count as usize * CONNECTION_RECORD_SIZE
    }
}

fn write_index<W: Write>(writer: &mut W, index: Option<u32>) -> Result<()> {
    writer.write_u32::<LittleEndian>(index.unwrap_or(NP_NULL_INDEX))?;
    Ok(())
}

fn read_index<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    let index = reader.read_u32::<LittleEndian>()?;
    Ok((index != NP_NULL_INDEX).then_some(index))
}

fn write_ivec2<W: Write>(writer: &mut W, v: IVec2) -> Result<()> {
    writer.write_i32::<LittleEndian>(v.x)?;
    writer.write_i32::<LittleEndian>(v.y)?;
    Ok(())
}

fn read_ivec2<R: Read>(reader: &mut R) -> Result<IVec2> {
    Ok(IVec2::new(
        reader.read_i32::<LittleEndian>()?,
        reader.read_i32::<LittleEndian>()?,
    ))
}

fn write_vec2<W: Write>(writer: &mut W, v: Vec2) -> Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    Ok(())
}

fn read_vec2<R: Read>(reader: &mut R) -> Result<Vec2> {
    Ok(Vec2::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)?;
    Ok(())
}

fn read_vec3<R: Read>(reader: &mut R) -> Result<Vec3> {
    Ok(Vec3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

fn write_mapping<W: Write>(writer: &mut W, mapping: &FixedMapping) -> Result<()> {
    write_vec2(writer, mapping.to_fixed_scale)?;
    write_vec2(writer, mapping.to_fixed_offset)?;
    write_vec2(writer, mapping.to_float_scale)?;
    write_vec2(writer, mapping.to_float_offset)?;
    Ok(())
}

fn read_mapping<R: Read>(reader: &mut R) -> Result<FixedMapping> {
    Ok(FixedMapping {
        to_fixed_scale: read_vec2(reader)?,
        to_fixed_offset: read_vec2(reader)?,
        to_float_scale: read_vec2(reader)?,
        to_float_offset: read_vec2(reader)?,
    })
}

impl Wall {
    fn write_to<W: Write>(&self, writer: &mut W, link: Option<u32>) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.vert_a)?;
        writer.write_u32::<LittleEndian>(self.vert_b)?;
        write_index(writer, self.prev_wall)?;
        write_index(writer, self.next_wall)?;
        write_ivec2(writer, self.wall_vec)?;
        write_ivec2(writer, self.normal)?;
        writer.write_u32::<LittleEndian>(self.poly_id)?;
        write_index(writer, link)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<(Self, Option<u32>)> {
        let wall = Self {
            vert_a: reader.read_u32::<LittleEndian>()?,
            vert_b: reader.read_u32::<LittleEndian>()?,
            prev_wall: read_index(reader)?,
            next_wall: read_index(reader)?,
            wall_vec: read_ivec2(reader)?,
            normal: read_ivec2(reader)?,
            poly_id: reader.read_u32::<LittleEndian>()?,
        };
        let link = read_index(reader)?;
        Ok((wall, link))
    }
}

impl Poly {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.first_wall)?;
        writer.write_u32::<LittleEndian>(self.num_walls)?;
        write_vec3(writer, self.plane.normal)?;
        writer.write_f32::<LittleEndian>(self.plane.d)?;
        write_ivec2(writer, self.center)?;
        write_vec3(writer, self.center3)?;
        write_index(writer, self.narrowing_id)?;
        writer.write_f32::<LittleEndian>(self.area)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            first_wall: reader.read_u32::<LittleEndian>()?,
            num_walls: reader.read_u32::<LittleEndian>()?,
            plane: Plane::new(read_vec3(reader)?, reader.read_f32::<LittleEndian>()?),
            center: read_ivec2(reader)?,
            center3: read_vec3(reader)?,
            narrowing_id: read_index(reader)?,
            area: reader.read_f32::<LittleEndian>()?,
        })
    }
}

/// Serializes a mesh into a byte buffer
pub fn save_mesh_to_binary(mesh: &Mesh) -> Result<Vec<u8>> {
    let data = mesh.data();
    let header = MeshHeader {
        magic: NP_MESH_MAGIC,
        version: NP_MESH_VERSION,
        vert_count: data.verts.len() as u32,
        wall_count: data.walls.len() as u32,
        poly_count: data.polys.len() as u32,
        narrowing_count: data.narrowings.len() as u32,
        connection_count: data.wall_connections.len() as u32,
    };

    let mut buffer = Vec::with_capacity(HEADER_SIZE + MAPPING_SIZE + header.payload_size());
    header.write_to(&mut buffer)?;
    write_mapping(&mut buffer, &data.mapping)?;

    for (vert, fvert) in data.verts.iter().zip(&data.fverts) {
        write_ivec2(&mut buffer, *vert)?;
        write_vec3(&mut buffer, *fvert)?;
    }
    for (wall, link) in data.walls.iter().zip(&data.links) {
        wall.write_to(&mut buffer, *link)?;
    }
    for poly in &data.polys {
        poly.write_to(&mut buffer)?;
    }
    for narrowing in &data.narrowings {
        buffer.write_u32::<LittleEndian>(narrowing.available)?;
    }
    for &wall_id in &data.wall_connections {
        buffer.write_u32::<LittleEndian>(wall_id)?;
    }

    Ok(buffer)
}

/// Deserializes and validates a mesh
pub fn load_mesh_from_binary(bytes: &[u8]) -> Result<Mesh> {
    let mut cursor = Cursor::new(bytes);
    let header = MeshHeader::read_from(&mut cursor)?;
    let mapping = read_mapping(&mut cursor)?;

    let remaining = bytes.len().saturating_sub(cursor.position() as usize);
    if header.payload_size() > remaining {
        return Err(Error::Format(format!(
            "header promises {} bytes of tables, only {remaining} left",
            header.payload_size()
        )));
    }

    let mut data = MeshData {
        mapping,
        verts: Vec::with_capacity(header.vert_count as usize),
        fverts: Vec::with_capacity(header.vert_count as usize),
        walls: Vec::with_capacity(header.wall_count as usize),
        links: Vec::with_capacity(header.wall_count as usize),
        polys: Vec::with_capacity(header.poly_count as usize),
        narrowings: Vec::with_capacity(header.narrowing_count as usize),
        wall_connections: Vec::with_capacity(header.connection_count as usize),
    };

    for _ in 0..header.vert_count {
        data.verts.push(read_ivec2(&mut cursor)?);
        data.fverts.push(read_vec3(&mut cursor)?);
    }
    for _ in 0..header.wall_count {
        let (wall, link) = Wall::read_from(&mut cursor)?;
        data.walls.push(wall);
        data.links.push(link);
    }
    for _ in 0..header.poly_count {
        data.polys.push(Poly::read_from(&mut cursor)?);
    }
    for _ in 0..header.narrowing_count {
        data.narrowings.push(Narrowing {
            available: cursor.read_u32::<LittleEndian>()?,
        });
    }
    for _ in 0..header.connection_count {
        data.wall_connections.push(cursor.read_u32::<LittleEndian>()?);
    }

    Mesh::from_data(data)
}

/// Writes a mesh to a file
pub fn save_mesh_to_file<P: AsRef<Path>>(mesh: &Mesh, path: P) -> Result<()> {
    std::fs::write(path, save_mesh_to_binary(mesh)?)?;
    Ok(())
}

/// Reads a mesh from a file
pub fn load_mesh_from_file<P: AsRef<Path>>(path: P) -> Result<Mesh> {
    load_mesh_from_binary(&std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::corridor_soup;
    use crate::Loader;

    fn corridor() -> Mesh {
        Loader::new().load(&corridor_soup(2)).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_tables() {
        let mut mesh = corridor();
        let hard = (0..mesh.num_walls() as u32)
            .find(|&w| mesh.is_hard_wall(w))
            .unwrap();
        mesh.set_wall_connection(hard, true).unwrap();
        let bytes = save_mesh_to_binary(&mesh).unwrap();
        let loaded = load_mesh_from_binary(&bytes).unwrap();

        assert_eq!(loaded.data().verts, mesh.data().verts);
        assert_eq!(loaded.data().walls, mesh.data().walls);
        assert_eq!(loaded.data().polys, mesh.data().polys);
        assert_eq!(loaded.data().links, mesh.data().links);
        assert_eq!(loaded.data().narrowings, mesh.data().narrowings);
        assert_eq!(loaded.wall_connections(), &[hard]);
        assert_eq!(loaded.mapping(), mesh.mapping());
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut bytes = save_mesh_to_binary(&corridor()).unwrap();
        let mut bad_magic = bytes.clone();
        bad_magic[0] ^= 0xff;
        assert!(matches!(
            load_mesh_from_binary(&bad_magic),
            Err(Error::Format(_))
        ));

        bytes[4] = 99;
        assert!(matches!(load_mesh_from_binary(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_rejects_truncated_data() {
        let bytes = save_mesh_to_binary(&corridor()).unwrap();
        assert!(load_mesh_from_binary(&bytes[..bytes.len() - 3]).is_err());
        assert!(load_mesh_from_binary(&bytes[..10]).is_err());
    }

    fn rejected(mesh: &Mesh, edit: impl FnOnce(&mut MeshData)) -> bool {
        let mut data = mesh.data().clone();
        edit(&mut data);
        matches!(Mesh::from_data(data), Err(Error::InvalidMesh(_)))
    }

    #[test]
    fn test_rejects_inconsistent_tables() {
        let mesh = corridor();
        assert!(!rejected(&mesh, |_| {}));

        assert!(rejected(&mesh, |d| d.walls[0].vert_a = 10_000));
        // wall ranges past u32::MAX must not wrap into an empty range
        assert!(rejected(&mesh, |d| d.polys[0].first_wall = u32::MAX - 1));
        assert!(rejected(&mesh, |d| d.polys[0].num_walls = u32::MAX));
        assert!(rejected(&mesh, |d| d.walls[0].wall_vec += IVec2::new(1, 0)));
        assert!(rejected(&mesh, |d| {
            d.walls[0].vert_a = d.walls[0].vert_b;
            d.walls[0].wall_vec = IVec2::ZERO;
        }));
        assert!(rejected(&mesh, |d| d.walls[0].normal = IVec2::ZERO));
        assert!(rejected(&mesh, |d| d.verts[0] = IVec2::new(i32::MIN, 0)));
        assert!(rejected(&mesh, |d| d.polys[0].center = IVec2::new(0, i32::MAX)));
        assert!(rejected(&mesh, |d| d.mapping.to_fixed_scale = Vec2::new(0.0, 1.0)));
        assert!(rejected(&mesh, |d| d.mapping.to_float_scale = Vec2::new(f32::NAN, 1.0)));
        assert!(rejected(&mesh, |d| d.mapping.to_float_offset = Vec2::new(f32::INFINITY, 0.0)));
        assert!(rejected(&mesh, |d| d.wall_connections = vec![u32::MAX]));
    }

    #[test]
    fn test_rejects_crafted_wall_range_bytes() {
        let mesh = corridor();
        let mut bytes = save_mesh_to_binary(&mesh).unwrap();
        // first_wall of polygon 0
        let offset = HEADER_SIZE
            + MAPPING_SIZE
            + mesh.num_verts() * VERT_RECORD_SIZE
            + mesh.num_walls() * WALL_RECORD_SIZE;
        bytes[offset..offset + 4].copy_from_slice(&(u32::MAX - 1).to_le_bytes());
        assert!(matches!(
            load_mesh_from_binary(&bytes),
            Err(Error::InvalidMesh(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let mesh = corridor();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corridor.npms");
        save_mesh_to_file(&mesh, &path).unwrap();
        let loaded = load_mesh_from_file(&path).unwrap();
        assert_eq!(loaded.num_polys(), mesh.num_polys());
        assert_eq!(loaded.num_narrowings(), 1);
    }
}
