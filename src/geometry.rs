//! Spatial column values and their decoding to GeoJSON geometry objects.

use serde_json::{json, Value};
use thiserror::Error;

/// A geometry as stored: WKT text or (E)WKB bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Wkt(String),
    Wkb(Vec<u8>),
}

impl Geometry {
    /// Interpret a text value: hex-encoded WKB when it is all hex digits, WKT otherwise.
    pub fn from_text(s: &str) -> Self {
        let t = s.trim();
        if !t.is_empty() && t.len() % 2 == 0 && t.bytes().all(|b| b.is_ascii_hexdigit()) {
            if let Some(bytes) = decode_hex(t) {
                return Geometry::Wkb(bytes);
            }
        }
        Geometry::Wkt(t.to_string())
    }
}

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("malformed WKT at offset {offset}: {message}")]
    Wkt { offset: usize, message: String },
    #[error("malformed WKB: {0}")]
    Wkb(String),
}

/// Turns a stored geometry into its wire representation.
pub trait GeometryDecoder: Send + Sync {
    fn decode(&self, geometry: &Geometry) -> Result<Value, GeometryError>;
}

/// Decodes WKT and WKB into GeoJSON geometry objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct GeoJsonDecoder;

impl GeometryDecoder for GeoJsonDecoder {
    fn decode(&self, geometry: &Geometry) -> Result<Value, GeometryError> {
        let shape = match geometry {
            Geometry::Wkt(text) => WktParser::new(text).parse()?,
            Geometry::Wkb(bytes) => WkbReader::new(bytes).read()?,
        };
        Ok(shape.to_geojson())
    }
}

type Coord = Vec<f64>;

#[derive(Clone, Debug, PartialEq)]
enum Shape {
    Point(Option<Coord>),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
    Collection(Vec<Shape>),
}

impl Shape {
    fn to_geojson(&self) -> Value {
        match self {
            Shape::Point(c) => json!({"type": "Point", "coordinates": c.clone().unwrap_or_default()}),
            Shape::LineString(c) => json!({"type": "LineString", "coordinates": c}),
            Shape::Polygon(c) => json!({"type": "Polygon", "coordinates": c}),
            Shape::MultiPoint(c) => json!({"type": "MultiPoint", "coordinates": c}),
            Shape::MultiLineString(c) => json!({"type": "MultiLineString", "coordinates": c}),
            Shape::MultiPolygon(c) => json!({"type": "MultiPolygon", "coordinates": c}),
            Shape::Collection(members) => json!({
                "type": "GeometryCollection",
                "geometries": members.iter().map(Shape::to_geojson).collect::<Vec<_>>(),
            }),
        }
    }
}

/// Deepest collection nesting accepted by either reader.
const MAX_NESTING: usize = 32;

struct WktParser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> WktParser<'a> {
    fn new(text: &'a str) -> Self {
        WktParser {
            input: text.as_bytes(),
            pos: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<Shape, GeometryError> {
        self.skip_srid()?;
        let shape = self.geometry()?;
        self.skip_ws();
        if self.pos != self.input.len() {
            return Err(self.error("trailing characters"));
        }
        Ok(shape)
    }

    fn error(&self, message: &str) -> GeometryError {
        GeometryError::Wkt {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), GeometryError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn word(&mut self) -> String {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_alphabetic() {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).to_ascii_uppercase()
    }

    fn skip_srid(&mut self) -> Result<(), GeometryError> {
        self.skip_ws();
        let rest = &self.input[self.pos..];
        if rest.len() >= 5 && rest[..5].eq_ignore_ascii_case(b"SRID=") {
            match rest.iter().position(|b| *b == b';') {
                Some(i) => self.pos += i + 1,
                None => return Err(self.error("SRID prefix without ';'")),
            }
        }
        Ok(())
    }

    /// Consumes an optional dimension marker (Z, M, ZM) and the EMPTY keyword.
    /// Returns true when the geometry is empty.
    fn header(&mut self) -> bool {
        let save = self.pos;
        match self.word().as_str() {
            "Z" | "M" | "ZM" => {}
            _ => self.pos = save,
        }
        let save = self.pos;
        if self.word() == "EMPTY" {
            return true;
        }
        self.pos = save;
        false
    }

    fn geometry(&mut self) -> Result<Shape, GeometryError> {
        let kind = self.word();
        let empty = self.header();
        match kind.as_str() {
            "POINT" => {
                if empty {
                    return Ok(Shape::Point(None));
                }
                self.expect(b'(')?;
                let c = self.coord()?;
                self.expect(b')')?;
                Ok(Shape::Point(Some(c)))
            }
            "LINESTRING" => Ok(Shape::LineString(if empty { Vec::new() } else { self.coords()? })),
            "POLYGON" => Ok(Shape::Polygon(if empty { Vec::new() } else { self.rings()? })),
            "MULTIPOINT" => {
                if empty {
                    return Ok(Shape::MultiPoint(Vec::new()));
                }
                self.expect(b'(')?;
                let mut points = Vec::new();
                loop {
                    // Both "MULTIPOINT (1 2, 3 4)" and "MULTIPOINT ((1 2), (3 4))" occur.
                    if self.peek() == Some(b'(') {
                        self.pos += 1;
                        points.push(self.coord()?);
                        self.expect(b')')?;
                    } else {
                        points.push(self.coord()?);
                    }
                    if !self.comma() {
                        break;
                    }
                }
                self.expect(b')')?;
                Ok(Shape::MultiPoint(points))
            }
            "MULTILINESTRING" => Ok(Shape::MultiLineString(if empty { Vec::new() } else { self.rings()? })),
            "MULTIPOLYGON" => {
                if empty {
                    return Ok(Shape::MultiPolygon(Vec::new()));
                }
                self.expect(b'(')?;
                let mut polygons = vec![self.rings()?];
                while self.comma() {
                    polygons.push(self.rings()?);
                }
                self.expect(b')')?;
                Ok(Shape::MultiPolygon(polygons))
            }
            "GEOMETRYCOLLECTION" => {
                if empty {
                    return Ok(Shape::Collection(Vec::new()));
                }
                if self.depth >= MAX_NESTING {
                    return Err(self.error("geometry collections nested too deeply"));
                }
                self.expect(b'(')?;
                self.depth += 1;
                let mut members = vec![self.geometry()?];
                while self.comma() {
                    members.push(self.geometry()?);
                }
                self.depth -= 1;
                self.expect(b')')?;
                Ok(Shape::Collection(members))
            }
            "" => Err(self.error("expected geometry type")),
            other => Err(self.error(&format!("unsupported geometry type {}", other))),
        }
    }

    fn comma(&mut self) -> bool {
        if self.peek() == Some(b',') {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn number(&mut self) -> Result<f64, GeometryError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len()
            && matches!(self.input[self.pos], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| GeometryError::Wkt {
                offset: start,
                message: "expected number".into(),
            })
    }

    fn coord(&mut self) -> Result<Coord, GeometryError> {
        let mut c = vec![self.number()?, self.number()?];
        while c.len() < 4 && !matches!(self.peek(), Some(b',') | Some(b')') | None) {
            c.push(self.number()?);
        }
        Ok(c)
    }

    fn coords(&mut self) -> Result<Vec<Coord>, GeometryError> {
        self.expect(b'(')?;
        let mut out = vec![self.coord()?];
        while self.comma() {
            out.push(self.coord()?);
        }
        self.expect(b')')?;
        Ok(out)
    }

    fn rings(&mut self) -> Result<Vec<Vec<Coord>>, GeometryError> {
        self.expect(b'(')?;
        let mut out = vec![self.coords()?];
        while self.comma() {
            out.push(self.coords()?);
        }
        self.expect(b')')?;
        Ok(out)
    }
}

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

struct WkbReader<'a> {
    input: &'a [u8],
    pos: usize,
    little_endian: bool,
    depth: usize,
}

impl<'a> WkbReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        WkbReader {
            input,
            pos: 0,
            little_endian: true,
            depth: 0,
        }
    }

    fn read(mut self) -> Result<Shape, GeometryError> {
        let shape = self.geometry()?;
        if self.pos != self.input.len() {
            return Err(GeometryError::Wkb("trailing bytes".into()));
        }
        Ok(shape)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], GeometryError> {
        let end = self.pos + N;
        let slice = self
            .input
            .get(self.pos..end)
            .ok_or_else(|| GeometryError::Wkb(format!("unexpected end at byte {}", self.pos)))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, GeometryError> {
        let b = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn f64(&mut self) -> Result<f64, GeometryError> {
        let b = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        })
    }

    fn coord(&mut self, dims: usize) -> Result<Coord, GeometryError> {
        (0..dims).map(|_| self.f64()).collect()
    }

    fn coords(&mut self, dims: usize) -> Result<Vec<Coord>, GeometryError> {
        let n = self.u32()?;
        (0..n).map(|_| self.coord(dims)).collect()
    }

    fn rings(&mut self, dims: usize) -> Result<Vec<Vec<Coord>>, GeometryError> {
        let n = self.u32()?;
        (0..n).map(|_| self.coords(dims)).collect()
    }

    fn members(&mut self) -> Result<Vec<Shape>, GeometryError> {
        if self.depth >= MAX_NESTING {
            return Err(GeometryError::Wkb("geometry collections nested too deeply".into()));
        }
        let n = self.u32()?;
        self.depth += 1;
        let members = (0..n).map(|_| self.geometry()).collect();
        self.depth -= 1;
        members
    }

    fn geometry(&mut self) -> Result<Shape, GeometryError> {
        let [order] = self.take::<1>()?;
        self.little_endian = match order {
            0 => false,
            1 => true,
            other => return Err(GeometryError::Wkb(format!("invalid byte order {}", other))),
        };
        let raw = self.u32()?;
        if raw & EWKB_SRID != 0 {
            self.u32()?;
        }
        let mut dims = 2;
        if raw & EWKB_Z != 0 {
            dims += 1;
        }
        if raw & EWKB_M != 0 {
            dims += 1;
        }
        let code = raw & 0x0FFF_FFFF;
        let (kind, iso_dims) = match code / 1000 {
            0 => (code, 0),
            1 | 2 => (code % 1000, 1),
            3 => (code % 1000, 2),
            _ => return Err(GeometryError::Wkb(format!("unknown geometry type {}", code))),
        };
        dims += iso_dims;

        Ok(match kind {
            1 => {
                let c = self.coord(dims)?;
                if c.iter().all(|v| v.is_nan()) {
                    Shape::Point(None)
                } else {
                    Shape::Point(Some(c))
                }
            }
            2 => Shape::LineString(self.coords(dims)?),
            3 => Shape::Polygon(self.rings(dims)?),
            4 => Shape::MultiPoint(
                self.members()?
                    .into_iter()
                    .filter_map(|m| match m {
                        Shape::Point(c) => c,
                        _ => None,
                    })
                    .collect(),
            ),
            5 => Shape::MultiLineString(
                self.members()?
                    .into_iter()
                    .filter_map(|m| match m {
                        Shape::LineString(c) => Some(c),
                        _ => None,
                    })
                    .collect(),
            ),
            6 => Shape::MultiPolygon(
                self.members()?
                    .into_iter()
                    .filter_map(|m| match m {
                        Shape::Polygon(c) => Some(c),
                        _ => None,
                    })
                    .collect(),
            ),
            7 => Shape::Collection(self.members()?),
            other => return Err(GeometryError::Wkb(format!("unknown geometry type {}", other))),
        })
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
