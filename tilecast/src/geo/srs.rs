//! Spatial reference systems and coordinate conversion.
//!
//! An [`SrsDef`] is a proj-string wrapper; EPSG codes are resolved through
//! the `crs-definitions` database the way slippy-map tooling usually does.
//! Conversions go through [`CsConvertor`], which is constructed once per
//! source/target pair and then applied to many points.
//!
//! Conversion of a single point is fallible by design: points outside a
//! projection's domain are a normal occurrence during sampling and must be
//! reported as an error value, never as a panic.

use super::{Point2, Point3};
use proj4rs::proj::Proj;
use thiserror::Error;

/// Errors raised while building or applying spatial references.
#[derive(Debug, Error)]
pub enum SrsError {
    /// The proj string could not be parsed.
    #[error("invalid SRS definition '{definition}': {message}")]
    InvalidDefinition { definition: String, message: String },

    /// EPSG code missing from the crs-definitions database.
    #[error("unknown EPSG code {0}")]
    UnknownEpsg(u32),

    /// A point could not be transformed (outside projection domain etc.).
    #[error("coordinate transformation failed: {0}")]
    Transform(String),
}

/// A spatial reference system definition held as a proj string.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SrsDef(String);

impl SrsDef {
    /// Wrap a raw proj string.
    pub fn from_proj(proj: impl Into<String>) -> Self {
        Self(proj.into())
    }

    /// Resolve an EPSG code through the crs-definitions database.
    pub fn from_epsg(code: u32) -> Result<Self, SrsError> {
        let def = u16::try_from(code)
            .ok()
            .and_then(crs_definitions::from_code)
            .ok_or(SrsError::UnknownEpsg(code))?;
        Ok(Self(def.proj4.to_string()))
    }

    /// Parse either `epsg:NNNN` or a raw proj string.
    pub fn parse(s: &str) -> Result<Self, SrsError> {
        if let Some(code) = s
            .strip_prefix("epsg:")
            .or_else(|| s.strip_prefix("EPSG:"))
        {
            let code = code.parse::<u32>().map_err(|_| SrsError::InvalidDefinition {
                definition: s.to_string(),
                message: "malformed EPSG code".to_string(),
            })?;
            return Self::from_epsg(code);
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Datum-related tokens of this definition (ellipsoid, shifts, grids).
    fn datum_tokens(&self) -> String {
        const KEEP: [&str; 7] = [
            "+datum=", "+ellps=", "+a=", "+b=", "+rf=", "+towgs84=", "+nadgrids=",
        ];
        let tokens: Vec<&str> = self
            .0
            .split_whitespace()
            .filter(|t| KEEP.iter().any(|k| t.starts_with(k)))
            .collect();
        if tokens.is_empty() {
            "+ellps=WGS84".to_string()
        } else {
            tokens.join(" ")
        }
    }

    /// The geographic (lon/lat) system sharing this definition's datum.
    pub fn geographic(&self) -> SrsDef {
        SrsDef(format!("+proj=longlat {} +no_defs", self.datum_tokens()))
    }

    /// A transverse-Mercator projection centered at `(lat0, lon0)` on this
    /// definition's datum.
    pub fn transverse_mercator(&self, lat0: f64, lon0: f64) -> SrsDef {
        SrsDef(format!(
            "+proj=tmerc +lat_0={lat0} +lon_0={lon0} +k=1 +x_0=0 +y_0=0 {} +no_defs",
            self.datum_tokens()
        ))
    }

    /// The same definition with a vertical geoid grid attached.
    pub fn with_geoid(&self, grid: &str) -> SrsDef {
        SrsDef(format!("{} +geoidgrids={grid}", self.0))
    }

    fn to_proj(&self) -> Result<Proj, SrsError> {
        Proj::from_proj_string(&self.0).map_err(|e| SrsError::InvalidDefinition {
            definition: self.0.clone(),
            message: format!("{e:?}"),
        })
    }
}

/// One-way coordinate converter between two spatial reference systems.
pub struct CsConvertor {
    src: Proj,
    dst: Proj,
    src_angular: bool,
    dst_angular: bool,
}

impl CsConvertor {
    pub fn new(src: &SrsDef, dst: &SrsDef) -> Result<Self, SrsError> {
        let src = src.to_proj()?;
        let dst = dst.to_proj()?;
        let src_angular = src.is_latlong();
        let dst_angular = dst.is_latlong();
        Ok(Self {
            src,
            dst,
            src_angular,
            dst_angular,
        })
    }

    /// Transform a 2D point. Failure means "outside projection domain".
    pub fn convert(&self, p: &Point2) -> Result<Point2, SrsError> {
        let p3 = self.convert3(&Point3::new(p.x, p.y, 0.0))?;
        Ok(Point2::new(p3.x, p3.y))
    }

    /// Transform a 3D point; the vertical component rides along.
    pub fn convert3(&self, p: &Point3) -> Result<Point3, SrsError> {
        let mut point = if self.src_angular {
            (p.x.to_radians(), p.y.to_radians(), p.z)
        } else {
            (p.x, p.y, p.z)
        };

        proj4rs::transform::transform(&self.src, &self.dst, &mut point)
            .map_err(|e| SrsError::Transform(format!("{e:?}")))?;

        if !point.0.is_finite() || !point.1.is_finite() {
            return Err(SrsError::Transform("non-finite result".to_string()));
        }

        if self.dst_angular {
            Ok(Point3::new(
                point.0.to_degrees(),
                point.1.to_degrees(),
                point.2,
            ))
        } else {
            Ok(Point3::new(point.0, point.1, point.2))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_parse_epsg() {
        let srs = SrsDef::parse("epsg:4326").unwrap();
        assert!(srs.as_str().contains("+proj=longlat"));
    }

    #[test]
    fn test_parse_proj_string() {
        let srs = SrsDef::parse("+proj=merc +ellps=WGS84").unwrap();
        assert_eq!(srs.as_str(), "+proj=merc +ellps=WGS84");
    }

    #[test]
    fn test_parse_unknown_epsg() {
        assert!(SrsDef::parse("epsg:999999").is_err());
    }

    #[test]
    fn test_convert_identity() {
        let wgs = SrsDef::from_epsg(4326).unwrap();
        let conv = CsConvertor::new(&wgs, &wgs).unwrap();
        let p = conv.convert(&Point2::new(14.4, 50.1)).unwrap();
        assert!((p.x - 14.4).abs() < EPS);
        assert!((p.y - 50.1).abs() < EPS);
    }

    #[test]
    fn test_convert_wgs_to_mercator_origin() {
        let wgs = SrsDef::from_epsg(4326).unwrap();
        let merc = SrsDef::from_epsg(3857).unwrap();
        let conv = CsConvertor::new(&wgs, &merc).unwrap();
        let p = conv.convert(&Point2::new(0.0, 0.0)).unwrap();
        assert!(p.x.abs() < EPS);
        assert!(p.y.abs() < EPS);
    }

    #[test]
    fn test_convert_roundtrip() {
        let wgs = SrsDef::from_epsg(4326).unwrap();
        let merc = SrsDef::from_epsg(3857).unwrap();
        let fwd = CsConvertor::new(&wgs, &merc).unwrap();
        let back = CsConvertor::new(&merc, &wgs).unwrap();

        let p0 = Point2::new(14.4, 50.1);
        let p1 = fwd.convert(&p0).unwrap();
        let p2 = back.convert(&p1).unwrap();
        assert!((p2.x - p0.x).abs() < 1e-8);
        assert!((p2.y - p0.y).abs() < 1e-8);
    }

    #[test]
    fn test_geographic_of_mercator() {
        let merc = SrsDef::from_epsg(3857).unwrap();
        let geo = merc.geographic();
        assert!(geo.as_str().starts_with("+proj=longlat"));
        // usable as conversion target
        let conv = CsConvertor::new(&merc, &geo).unwrap();
        let p = conv.convert(&Point2::new(0.0, 0.0)).unwrap();
        assert!(p.x.abs() < EPS);
    }

    #[test]
    fn test_transverse_mercator_center_maps_to_origin() {
        let wgs = SrsDef::from_epsg(4326).unwrap();
        let tm = wgs.transverse_mercator(50.1, 14.4);
        let conv = CsConvertor::new(&wgs, &tm).unwrap();
        let p = conv.convert(&Point2::new(14.4, 50.1)).unwrap();
        assert!(p.x.abs() < 1e-3);
        assert!(p.y.abs() < 1e-3);
    }

    #[test]
    fn test_transverse_mercator_meter_scale() {
        // one degree of latitude is ~111 km in a tangent tmerc
        let wgs = SrsDef::from_epsg(4326).unwrap();
        let tm = wgs.transverse_mercator(0.0, 0.0);
        let conv = CsConvertor::new(&wgs, &tm).unwrap();
        let p = conv.convert(&Point2::new(0.0, 1.0)).unwrap();
        assert!((p.y - 110_574.0).abs() < 1_000.0, "got {}", p.y);
    }
}
