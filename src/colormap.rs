use std::{fmt, str::FromStr};

use image::Rgb;
use serde::{Deserialize, Serialize};

/// Perceptual color ramp applied to the 0-255 heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorRamp {
    /// Blue → cyan → yellow → red.
    #[default]
    Jet,
    /// Green (low) → yellow → red (high).
    GreenRed,
}

impl ColorRamp {
    pub fn color(self, value: u8) -> Rgb<u8> {
        let t = value as f32 / 255.0;
        let (r, g, b) = match self {
            Self::Jet => (
                channel(1.5 - (4.0 * t - 3.0).abs()),
                channel(1.5 - (4.0 * t - 2.0).abs()),
                channel(1.5 - (4.0 * t - 1.0).abs()),
            ),
            Self::GreenRed => {
                let r = if t < 0.5 { 2.0 * t } else { 1.0 };
                let g = if t < 0.5 { 1.0 } else { 2.0 * (1.0 - t) };
                (channel(r), channel(g), 0)
            }
        };
        Rgb([r, g, b])
    }
}

fn channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl fmt::Display for ColorRamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Jet => "jet",
            Self::GreenRed => "green_red",
        })
    }
}

impl FromStr for ColorRamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jet" => Ok(Self::Jet),
            "green_red" | "green-red" => Ok(Self::GreenRed),
            other => Err(format!(
                "invalid color ramp '{other}'; expected 'jet' or 'green_red'"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jet_runs_cool_to_hot() {
        let Rgb([r_lo, _, b_lo]) = ColorRamp::Jet.color(0);
        let Rgb([r_hi, _, b_hi]) = ColorRamp::Jet.color(255);
        assert!(b_lo > r_lo);
        assert!(r_hi > b_hi);
    }

    #[test]
    fn test_green_red_endpoints() {
        assert_eq!(ColorRamp::GreenRed.color(0), Rgb([0, 255, 0]));
        assert_eq!(ColorRamp::GreenRed.color(255), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_parse_round_trip() {
        for ramp in [ColorRamp::Jet, ColorRamp::GreenRed] {
            assert_eq!(ramp.to_string().parse::<ColorRamp>(), Ok(ramp));
        }
        assert!("viridis".parse::<ColorRamp>().is_err());
    }
}
