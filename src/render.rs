use crate::data::Dataset;
use crate::error::DashboardError;
use crate::palette::{self, ColorScale, Rgb, BUCKETS};
use crate::types::{AggregatedRate, MunicipalityKey};
use geo::{BoundingRect, Coord, MultiPolygon, Rect};
use std::collections::HashMap;
use std::str::FromStr;

const TITLE_BAND: f64 = 60.0;
const LEGEND_BAND: f64 = 130.0;
const MARGIN: f64 = 10.0;
const LABEL_FONT: f64 = 20.0;

const STATE_STROKE: &str = "grey";
const MUNICIPAL_STROKE: &str = "lightgrey";

/// The national map and the three metropolitan zooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapView {
    National,
    ValleDeMexico,
    Guadalajara,
    Monterrey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub text: &'static str,
    pub x: f64,
    pub y: f64,
}

impl MapView {
    pub const ALL: [MapView; 4] = [
        MapView::National,
        MapView::ValleDeMexico,
        MapView::Guadalajara,
        MapView::Monterrey,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            MapView::National => "mexico",
            MapView::ValleDeMexico => "valle-de-mexico",
            MapView::Guadalajara => "guadalajara",
            MapView::Monterrey => "monterrey",
        }
    }

    pub fn subheading(&self) -> &'static str {
        match self {
            MapView::National => "México",
            MapView::ValleDeMexico => "Área metropolitana del Valle de México",
            MapView::Guadalajara => "Área metropolitana de Guadalajara",
            MapView::Monterrey => "Área metropolitana de Monterrey",
        }
    }

    /// Fixed crop in map CRS metres. `None` means the full extent.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let rect = |x: (f64, f64), y: (f64, f64)| {
            Rect::new(Coord { x: x.0, y: y.0 }, Coord { x: x.1, y: y.1 })
        };
        match self {
            MapView::National => None,
            MapView::ValleDeMexico => Some(rect((1.71e6, 1.82e6), (2.14e6, 2.22e6))),
            MapView::Guadalajara => Some(rect((1.225e6, 1.37e6), (2.25e6, 2.38e6))),
            MapView::Monterrey => Some(rect((1.51e6, 1.64e6), (2.83e6, 2.93e6))),
        }
    }

    pub fn labels(&self) -> Vec<Label> {
        match self {
            MapView::National => Vec::new(),
            MapView::ValleDeMexico => vec![
                Label { text: "EdoMex", x: 1.79e6, y: 2.15e6 },
                Label { text: "CDMX", x: 1.755e6, y: 2.1575e6 },
            ],
            MapView::Guadalajara => vec![Label { text: "Jalisco", x: 1.23e6, y: 2.255e6 }],
            MapView::Monterrey => {
                let (l, u) = (1.51e6, 1.64e6);
                let (bottom, top) = (2.83e6, 2.93e6);
                let y = 0.1 * top + 0.9 * bottom;
                vec![
                    Label { text: "Nuevo León", x: 0.85 * u + 0.15 * l, y },
                    Label { text: "Coahuila", x: 0.15 * u + 0.85 * l, y },
                ]
            }
        }
    }
}

impl FromStr for MapView {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let slug = s.trim_end_matches(".svg");
        MapView::ALL
            .into_iter()
            .find(|v| v.slug() == slug)
            .ok_or_else(|| DashboardError::UnknownView(s.to_string()))
    }
}

/// Maps map-CRS coordinates onto the drawing area, stretching to fill it.
#[derive(Debug, Clone, Copy)]
struct Viewport {
    bounds: Rect<f64>,
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl Viewport {
    fn to_px(&self, c: Coord<f64>) -> (f64, f64) {
        let (min, max) = (self.bounds.min(), self.bounds.max());
        let sx = if max.x > min.x { (c.x - min.x) / (max.x - min.x) } else { 0.5 };
        let sy = if max.y > min.y { (c.y - min.y) / (max.y - min.y) } else { 0.5 };
        (self.left + sx * self.width, self.top + (1.0 - sy) * self.height)
    }

    fn overlaps(&self, other: &Rect<f64>) -> bool {
        let (a_min, a_max) = (self.bounds.min(), self.bounds.max());
        let (b_min, b_max) = (other.min(), other.max());
        a_min.x <= b_max.x && b_min.x <= a_max.x && a_min.y <= b_max.y && b_min.y <= a_max.y
    }

    /// SVG path data for a polygon, or `None` when it is out of view.
    fn path(&self, polygon: &MultiPolygon<f64>) -> Option<String> {
        if !polygon.bounding_rect().is_some_and(|r| self.overlaps(&r)) {
            return None;
        }
        let mut d = String::new();
        for poly in polygon {
            let rings = std::iter::once((poly.exterior(), true))
                .chain(poly.interiors().iter().map(|r| (r, false)));
            for (ring, exterior) in rings {
                let mut points: Vec<(f64, f64)> = Vec::with_capacity(ring.0.len());
                for c in ring.coords() {
                    let p = self.to_px(*c);
                    // Collapse vertices that land on the same output pixel.
                    if let Some(last) = points.last() {
                        if (p.0 - last.0).abs() < 0.5 && (p.1 - last.1).abs() < 0.5 {
                            continue;
                        }
                    }
                    points.push(p);
                }
                if points.len() < 3 {
                    // A sub-pixel municipality still gets one pixel; a sub-pixel hole is dropped.
                    if let (true, Some((x, y))) = (exterior, points.first()) {
                        d.push_str(&format!("M{x:.1},{y:.1}h1v1h-1Z"));
                    }
                    continue;
                }
                for (i, (x, y)) in points.iter().enumerate() {
                    let cmd = if i == 0 { 'M' } else { 'L' };
                    d.push_str(&format!("{cmd}{x:.1},{y:.1}"));
                }
                d.push('Z');
            }
        }
        (!d.is_empty()).then_some(d)
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn title(crime: &str) -> String {
    format!("{crime} por cada 100 mil habitantes")
}

fn extent<'a>(polygons: impl Iterator<Item = &'a MultiPolygon<f64>>) -> Rect<f64> {
    polygons
        .filter_map(|p| p.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                Coord { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                Coord { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
            )
        })
        .unwrap_or_else(|| Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }))
}

/// Geometry joined with one query's rates, ready to draw any view.
pub struct MapScene<'a> {
    dataset: &'a Dataset,
    crime: String,
    /// Rate per municipality feature, aligned with `dataset.municipalities`.
    fills: Vec<Option<f64>>,
    scale: Option<ColorScale>,
    colors: [Rgb; BUCKETS],
    no_data_color: Option<String>,
    extent: Rect<f64>,
}

impl<'a> MapScene<'a> {
    /// `rates` are the floor-filtered rows; municipalities missing from them render as no data.
    pub fn new(
        dataset: &'a Dataset,
        crime: &str,
        rates: &[AggregatedRate],
        no_data_color: Option<String>,
    ) -> Self {
        let by_key: HashMap<MunicipalityKey, f64> = rates
            .iter()
            .filter_map(|r| r.rate_per_100k.map(|rate| (r.key, rate)))
            .collect();
        let fills: Vec<Option<f64>> = dataset
            .municipalities
            .iter()
            .map(|m| by_key.get(&m.key).copied())
            .collect();
        let scale = ColorScale::from_values(fills.iter().flatten().copied());

        Self {
            dataset,
            crime: crime.to_string(),
            fills,
            scale,
            colors: palette::ramp(),
            no_data_color,
            extent: extent(dataset.municipalities.iter().map(|m| &m.polygon)),
        }
    }

    pub fn scale(&self) -> Option<ColorScale> {
        self.scale
    }

    pub fn fill_color(&self, rate: Option<f64>) -> Option<String> {
        match (rate, self.scale) {
            (Some(rate), Some(scale)) => Some(self.colors[scale.bucket(rate)].to_string()),
            _ => self.no_data_color.clone(),
        }
    }

    pub fn render(&self, view: MapView, width: u32, height: u32) -> String {
        let (width, height) = (f64::from(width), f64::from(height));
        let viewport = Viewport {
            bounds: view.bounds().unwrap_or(self.extent),
            left: MARGIN,
            top: TITLE_BAND,
            width: (width - LEGEND_BAND - MARGIN).max(1.0),
            height: (height - TITLE_BAND - MARGIN).max(1.0),
        };

        let mut svg = format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" style="background:white">
<defs><clipPath id="map-area"><rect x="{x:.1}" y="{y:.1}" width="{vw:.1}" height="{vh:.1}"/></clipPath></defs>
"##,
            w = width,
            h = height,
            x = viewport.left,
            y = viewport.top,
            vw = viewport.width,
            vh = viewport.height,
        );

        svg.push_str("<g clip-path=\"url(#map-area)\">\n");

        svg.push_str(&format!(r#"<g class="states" fill="none" stroke="{STATE_STROKE}" stroke-width="1">"#));
        svg.push('\n');
        for state in &self.dataset.states {
            if let Some(d) = viewport.path(&state.polygon) {
                svg.push_str(&format!(r#"<path d="{d}"/>"#));
            }
        }
        svg.push_str("</g>\n");

        svg.push_str(&format!(
            r#"<g class="municipalities" fill="none" stroke="{MUNICIPAL_STROKE}" stroke-width="1" stroke-opacity="0.2">"#
        ));
        svg.push('\n');
        for m in &self.dataset.municipalities {
            if let Some(d) = viewport.path(&m.polygon) {
                svg.push_str(&format!(r#"<path d="{d}"/>"#));
            }
        }
        svg.push_str("</g>\n");

        svg.push_str(r#"<g class="choropleth" stroke="none" fill-rule="evenodd">"#);
        svg.push('\n');
        for (m, rate) in self.dataset.municipalities.iter().zip(&self.fills) {
            let Some(color) = self.fill_color(*rate) else {
                continue;
            };
            if let Some(d) = viewport.path(&m.polygon) {
                svg.push_str(&format!(
                    r#"<path id="m{key}" fill="{color}" d="{d}"/>"#,
                    key = m.key,
                ));
            }
        }
        svg.push_str("</g>\n</g>\n");

        svg.push_str(&format!(
            r#"<text x="{x:.1}" y="{y:.1}" text-anchor="middle" font-family="sans-serif" font-size="28">{t}</text>"#,
            x = viewport.left + viewport.width / 2.0,
            y = TITLE_BAND * 0.65,
            t = escape_xml(&title(&self.crime)),
        ));

        if let Some(scale) = self.scale() {
            self.write_legend(&mut svg, &scale, width - LEGEND_BAND + 20.0, &viewport);
        }

        for label in view.labels() {
            write_label(&mut svg, &label, &viewport);
        }

        svg.push_str("</svg>\n");
        svg
    }

    fn write_legend(&self, svg: &mut String, scale: &ColorScale, x: f64, viewport: &Viewport) {
        let bar_width = 20.0;
        let step = viewport.height / BUCKETS as f64;
        let bottom = viewport.top + viewport.height;

        svg.push_str(r#"<g class="legend" font-family="sans-serif" font-size="12">"#);
        for (i, color) in self.colors.iter().enumerate() {
            svg.push_str(&format!(
                r#"<rect x="{x:.1}" y="{y:.1}" width="{bar_width}" height="{h:.1}" fill="{color}"/>"#,
                y = bottom - (i + 1) as f64 * step,
                h = step,
            ));
        }
        svg.push_str(&format!(
            r#"<rect x="{x:.1}" y="{y:.1}" width="{bar_width}" height="{h:.1}" fill="none" stroke="black" stroke-width="0.5"/>"#,
            y = viewport.top,
            h = viewport.height,
        ));
        for edge in (0..=BUCKETS).step_by(2) {
            let y = bottom - edge as f64 * step;
            svg.push_str(&format!(
                r#"<text x="{tx:.1}" y="{ty:.1}">{v:.1}</text>"#,
                tx = x + bar_width + 6.0,
                ty = y + 4.0,
                v = scale.bucket_edge(edge),
            ));
        }
        svg.push_str("</g>\n");
    }
}

fn write_label(svg: &mut String, label: &Label, viewport: &Viewport) {
    let (x, y) = viewport.to_px(Coord { x: label.x, y: label.y });
    let pad = LABEL_FONT * 0.5;
    // Rough advance width for a sans-serif face.
    let text_width = label.text.chars().count() as f64 * LABEL_FONT * 0.6;
    svg.push_str(&format!(
        r#"<g class="label" opacity="0.9"><rect x="{rx:.1}" y="{ry:.1}" width="{rw:.1}" height="{rh:.1}" rx="6" fill="white" fill-opacity="0.5" stroke="black"/><text x="{x:.1}" y="{y:.1}" font-family="sans-serif" font-size="{LABEL_FONT}" fill="black">{t}</text></g>"#,
        rx = x - pad,
        ry = y - LABEL_FONT - pad * 0.5,
        rw = text_width + 2.0 * pad,
        rh = LABEL_FONT + 2.0 * pad,
        t = escape_xml(label.text),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MunicipalGeometry, StateOutline};
    use geo::{polygon, Polygon};

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]])
    }

    /// Two municipalities inside the Valle de México crop, one in Monterrey's.
    fn dataset() -> Dataset {
        let municipalities = vec![
            MunicipalGeometry { key: MunicipalityKey::new(9, 2), id: "09002".into(), polygon: square(1.75e6, 2.16e6, 10_000.0) },
            MunicipalGeometry { key: MunicipalityKey::new(15, 33), id: "15033".into(), polygon: square(1.78e6, 2.17e6, 10_000.0) },
            MunicipalGeometry { key: MunicipalityKey::new(19, 39), id: "19039".into(), polygon: square(1.57e6, 2.87e6, 10_000.0) },
        ];
        let states = vec![StateOutline { state_code: 9, polygon: square(1.75e6, 2.16e6, 10_000.0) }];
        Dataset { municipalities, states, ..Dataset::default() }
    }

    fn rate(key: MunicipalityKey, value: f64) -> AggregatedRate {
        AggregatedRate {
            key,
            summed_count: 0,
            total_population: Some(200_000),
            rate_per_100k: Some(value),
        }
    }

    #[test]
    fn views_parse_from_slugs() {
        assert_eq!("valle-de-mexico.svg".parse::<MapView>().unwrap(), MapView::ValleDeMexico);
        assert_eq!("mexico".parse::<MapView>().unwrap(), MapView::National);
        assert!(matches!("tijuana".parse::<MapView>(), Err(DashboardError::UnknownView(_))));
    }

    #[test]
    fn monterrey_labels_sit_near_the_bottom_corners() {
        let labels = MapView::Monterrey.labels();
        assert_eq!(labels[0].text, "Nuevo León");
        assert!((labels[0].x - 1.6205e6).abs() < 1.0);
        assert!((labels[1].x - 1.5295e6).abs() < 1.0);
        assert!((labels[0].y - 2.84e6).abs() < 1.0);
    }

    #[test]
    fn national_map_has_title_fill_and_legend_but_no_labels() {
        let data = dataset();
        let rates = [rate(MunicipalityKey::new(9, 2), 6.0), rate(MunicipalityKey::new(19, 39), 20.0)];
        let scene = MapScene::new(&data, "Robo a negocio", &rates, None);
        let svg = scene.render(MapView::National, 1600, 800);

        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Robo a negocio por cada 100 mil habitantes"));
        assert!(svg.contains(r##"id="m09002" fill="#fff5f0""##));
        assert!(svg.contains(r##"id="m19039" fill="#000000""##));
        // No rate and no configured no-data colour: left unfilled.
        assert!(!svg.contains(r#"id="m15033""#));
        assert!(svg.contains(r#"class="legend""#));
        assert!(!svg.contains(r#"class="label""#));
    }

    #[test]
    fn zoom_crops_to_its_window_and_draws_only_its_labels() {
        let data = dataset();
        let rates = [rate(MunicipalityKey::new(9, 2), 6.0), rate(MunicipalityKey::new(19, 39), 20.0)];
        let scene = MapScene::new(&data, "Homicidio", &rates, Some("#cccccc".into()));

        let valle = scene.render(MapView::ValleDeMexico, 800, 600);
        assert!(valle.contains(r#"id="m09002""#));
        assert!(valle.contains(r##"id="m15033" fill="#cccccc""##));
        assert!(!valle.contains(r#"id="m19039""#));
        assert!(valle.contains(">EdoMex</text>"));
        assert!(valle.contains(">CDMX</text>"));
        assert!(!valle.contains("Jalisco"));

        let monterrey = scene.render(MapView::Monterrey, 800, 600);
        assert!(monterrey.contains(r#"id="m19039""#));
        assert!(monterrey.contains(">Nuevo León</text>"));
        assert!(!monterrey.contains("EdoMex"));
    }

    #[test]
    fn no_rates_means_no_legend() {
        let data = dataset();
        let scene = MapScene::new(&data, "Extorsión", &[], None);
        assert!(scene.scale().is_none());
        let svg = scene.render(MapView::National, 400, 300);
        assert!(!svg.contains(r#"class="legend""#));
        assert!(svg.contains(r#"class="states""#));
    }

    #[test]
    fn titles_are_escaped() {
        let data = dataset();
        let scene = MapScene::new(&data, "Robo <con> violencia & más", &[], None);
        let svg = scene.render(MapView::National, 400, 300);
        assert!(svg.contains("Robo &lt;con&gt; violencia &amp; más"));
    }

    #[test]
    fn out_of_view_polygons_are_skipped() {
        let viewport = Viewport {
            bounds: Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1000.0, y: 1000.0 }),
            left: 0.0,
            top: 0.0,
            width: 100.0,
            height: 100.0,
        };
        assert!(viewport.path(&square(5000.0, 5000.0, 100.0)).is_none());
        let d = viewport.path(&square(100.0, 100.0, 100.0)).unwrap();
        assert!(d.starts_with("M10.0,90.0"));
        assert!(d.ends_with('Z'));
    }

    #[test]
    fn sub_pixel_municipality_keeps_one_pixel() {
        let viewport = Viewport {
            bounds: Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1000.0, y: 1000.0 }),
            left: 0.0,
            top: 0.0,
            width: 100.0,
            height: 100.0,
        };
        assert_eq!(viewport.path(&square(10.0, 10.0, 1.0)).as_deref(), Some("M1.0,99.0h1v1h-1Z"));

        // A hole below one pixel is dropped, the shell is kept.
        let shell = square(100.0, 100.0, 100.0).0[0].exterior().clone();
        let hole = square(150.0, 150.0, 1.0).0[0].exterior().clone();
        let d = viewport.path(&MultiPolygon::new(vec![Polygon::new(shell, vec![hole])])).unwrap();
        assert_eq!(d.matches('M').count(), 1);
        assert!(!d.contains("h1v1"));
    }

    #[test]
    fn small_municipality_stays_on_the_national_map() {
        let mut data = dataset();
        data.municipalities.push(MunicipalGeometry {
            key: MunicipalityKey::new(20, 1),
            id: "20001".into(),
            polygon: square(2.0e6, 2.0e6, 50.0),
        });
        let rates = [rate(MunicipalityKey::new(20, 1), 12.0), rate(MunicipalityKey::new(9, 2), 6.0)];
        let scene = MapScene::new(&data, "Robo", &rates, None);
        let svg = scene.render(MapView::National, 1600, 800);
        assert!(svg.contains(r#"id="m20001""#));
    }
}
