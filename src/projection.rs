//! Reprojection of municipal geometry into the map CRS.
//!
//! The map is drawn in UTM zone 12N on GRS80 (the EPSG:4485 layout), which
//! the zoom-window bounds are expressed in. Sources can be plain lon/lat,
//! INEGI's Lambert Conformal Conic (EPSG:6372), or already projected.

use geo::{Coord, MapCoords, MultiPolygon};
use serde::Deserialize;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

// GRS80
const SEMI_MAJOR: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_222_101;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceCrs {
    /// Longitude/latitude in degrees.
    Geographic,
    /// EPSG:6372, the projection INEGI ships its national frameworks in.
    #[default]
    InegiLambert,
    /// Already in the map CRS.
    Utm12n,
}

fn eccentricity() -> f64 {
    (FLATTENING * (2.0 - FLATTENING)).sqrt()
}

/// Transverse Mercator forward projection (Krüger series to third order).
#[derive(Debug, Clone, Copy)]
pub struct TransverseMercator {
    central_meridian: f64,
    scale: f64,
    false_easting: f64,
    false_northing: f64,
    rectifying_radius: f64,
    alpha: [f64; 3],
    e: f64,
}

impl TransverseMercator {
    pub fn utm_north(zone: u8) -> Self {
        let central_meridian = (f64::from(zone) * 6.0 - 183.0).to_radians();
        let n = FLATTENING / (2.0 - FLATTENING);
        let n2 = n * n;
        let n3 = n2 * n;
        Self {
            central_meridian,
            scale: 0.9996,
            false_easting: 500_000.0,
            false_northing: 0.0,
            rectifying_radius: SEMI_MAJOR / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            e: eccentricity(),
        }
    }

    /// Degrees in, metres out.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let dlambda = lon.to_radians() - self.central_meridian;

        let sin_phi = phi.sin();
        let t = (sin_phi.atanh() - self.e * (self.e * sin_phi).atanh()).sinh();
        let xi_p = t.atan2(dlambda.cos());
        let eta_p = (dlambda.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, alpha) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        (
            self.false_easting + self.scale * self.rectifying_radius * eta,
            self.false_northing + self.scale * self.rectifying_radius * xi,
        )
    }
}

/// Two-standard-parallel Lambert Conformal Conic, inverse direction only.
#[derive(Debug, Clone, Copy)]
pub struct LambertConformalConic {
    n: f64,
    af: f64,
    rho0: f64,
    lon0: f64,
    false_easting: f64,
    false_northing: f64,
    e: f64,
}

impl LambertConformalConic {
    pub fn inegi() -> Self {
        Self::new(17.5, 29.5, 12.0, -102.0, 2_500_000.0, 0.0)
    }

    pub fn new(lat1: f64, lat2: f64, lat0: f64, lon0: f64, false_easting: f64, false_northing: f64) -> Self {
        let e = eccentricity();
        let m = |phi: f64| phi.cos() / (1.0 - e * e * phi.sin().powi(2)).sqrt();
        let t = |phi: f64| {
            let es = e * phi.sin();
            (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
        };

        let (p1, p2, p0) = (lat1.to_radians(), lat2.to_radians(), lat0.to_radians());
        let n = (m(p1).ln() - m(p2).ln()) / (t(p1).ln() - t(p2).ln());
        let af = SEMI_MAJOR * m(p1) / (n * t(p1).powf(n));
        Self {
            n,
            af,
            rho0: af * t(p0).powf(n),
            lon0: lon0.to_radians(),
            false_easting,
            false_northing,
            e,
        }
    }

    /// Metres in, degrees out.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.false_easting;
        let dy = self.rho0 - (y - self.false_northing);
        let rho = dx.hypot(dy).copysign(self.n);
        let theta = dx.atan2(dy);

        let t = (rho / self.af).powf(1.0 / self.n);
        let lon = theta / self.n + self.lon0;

        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..15 {
            let es = self.e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0)).atan();
            if (next - phi).abs() < 1e-12 {
                phi = next;
                break;
            }
            phi = next;
        }

        (lon.to_degrees(), phi.to_degrees())
    }
}

/// Converts source coordinates into the map CRS.
#[derive(Debug, Clone, Copy)]
pub struct Reprojector {
    source: SourceCrs,
    lcc: LambertConformalConic,
    utm: TransverseMercator,
}

impl Reprojector {
    pub fn new(source: SourceCrs) -> Self {
        Self {
            source,
            lcc: LambertConformalConic::inegi(),
            utm: TransverseMercator::utm_north(12),
        }
    }

    pub fn project(&self, c: Coord<f64>) -> Coord<f64> {
        let (x, y) = match self.source {
            SourceCrs::Utm12n => return c,
            SourceCrs::Geographic => self.utm.forward(c.x, c.y),
            SourceCrs::InegiLambert => {
                let (lon, lat) = self.lcc.inverse(c.x, c.y);
                self.utm.forward(lon, lat)
            }
        };
        Coord { x, y }
    }

    /// Lon/lat straight into the map CRS, whatever the source was.
    pub fn project_geographic(&self, lon: f64, lat: f64) -> Coord<f64> {
        let (x, y) = self.utm.forward(lon, lat);
        Coord { x, y }
    }

    pub fn project_polygon(&self, polygon: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        polygon.map_coords(|c| self.project(c))
    }
}
