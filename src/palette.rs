use std::fmt;

/// ColorBrewer "Reds", nine classes, light to dark.
const REDS: [Rgb; 9] = [
    Rgb(0xff, 0xf5, 0xf0),
    Rgb(0xfe, 0xe0, 0xd2),
    Rgb(0xfc, 0xbb, 0xa1),
    Rgb(0xfc, 0x92, 0x72),
    Rgb(0xfb, 0x6a, 0x4a),
    Rgb(0xef, 0x3b, 0x2c),
    Rgb(0xcb, 0x18, 0x1d),
    Rgb(0xa5, 0x0f, 0x15),
    Rgb(0x67, 0x00, 0x0d),
];

pub const RED_SHADES: usize = 12;
/// Twelve reds plus two escalation colours for the extremes.
pub const BUCKETS: usize = RED_SHADES + 2;
const ESCALATION: [Rgb; 2] = [Rgb(0x3a, 0x00, 0x00), Rgb(0x00, 0x00, 0x00)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8
}

/// Samples the Reds scheme at `t` in `[0, 1]`, interpolating linearly between classes.
fn reds(t: f64) -> Rgb {
    let pos = t.clamp(0.0, 1.0) * (REDS.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(REDS.len() - 1);
    let frac = pos - lo as f64;
    let (a, b) = (REDS[lo], REDS[hi]);
    Rgb(lerp(a.0, b.0, frac), lerp(a.1, b.1, frac), lerp(a.2, b.2, frac))
}

/// The 14-bucket ramp used for the choropleth fill.
pub fn ramp() -> [Rgb; BUCKETS] {
    let mut colors = [Rgb(0, 0, 0); BUCKETS];
    for (i, c) in colors.iter_mut().take(RED_SHADES).enumerate() {
        *c = reds(i as f64 / (RED_SHADES - 1) as f64);
    }
    colors[RED_SHADES..].copy_from_slice(&ESCALATION);
    colors
}

/// Linear normalization between the smallest and largest rendered value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub min: f64,
    pub max: f64,
}

impl ColorScale {
    /// `None` when there is nothing finite to scale.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<Self>, v| match acc {
                None => Some(Self { min: v, max: v }),
                Some(s) => Some(Self { min: s.min.min(v), max: s.max.max(v) }),
            })
    }

    pub fn bucket(&self, value: f64) -> usize {
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0;
        }
        let norm = ((value - self.min) / span).clamp(0.0, 1.0);
        ((norm * BUCKETS as f64) as usize).min(BUCKETS - 1)
    }

    /// Value at the lower edge of a bucket; `BUCKETS` gives the maximum.
    pub fn bucket_edge(&self, bucket: usize) -> f64 {
        self.min + (self.max - self.min) * bucket as f64 / BUCKETS as f64
    }
}
