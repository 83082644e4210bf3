const HUE: f64 = 221.0;
const SATURATION: f64 = 83.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeatColor {
    Neutral { dark: bool },
    Hsl { h: f64, s: f64, l: f64 },
}

impl HeatColor {
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            HeatColor::Neutral { dark: true } => (31, 41, 55),
            HeatColor::Neutral { dark: false } => (255, 255, 255),
            HeatColor::Hsl { h, s, l } => hsl_to_rgb(h, s / 100.0, l / 100.0),
        }
    }

    pub fn is_light(self) -> bool {
        let (r, g, b) = self.rgb();
        let luma = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        luma > 140.0
    }
}

// Light mode goes 95% -> 45% lightness as cost rises, dark mode 20% -> 55%.
// Credits (value <= 0) sit outside the positive range and render neutral.
pub fn heatmap_color(value: f64, min: f64, max: f64, dark: bool) -> HeatColor {
    if value <= 0.0 || max == min {
        return HeatColor::Neutral { dark };
    }
    let percentage = ((value - min) / (max - min)).clamp(0.0, 1.0);
    let l = if dark {
        20.0 + percentage * 35.0
    } else {
        95.0 - percentage * 50.0
    };
    HeatColor::Hsl {
        h: HUE,
        s: SATURATION,
        l,
    }
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let l = l.clamp(0.0, 1.0);
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = (h / 60.0).rem_euclid(6.0);
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u8 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    let to_byte = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (to_byte(r1), to_byte(g1), to_byte(b1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_neutral_regardless_of_range() {
        assert_eq!(
            heatmap_color(0.0, 0.0, 100.0, false),
            heatmap_color(0.0, 5.0, 100.0, false)
        );
        assert_eq!(
            heatmap_color(0.0, 5.0, 100.0, false),
            HeatColor::Neutral { dark: false }
        );
    }

    #[test]
    fn flat_range_is_neutral() {
        for x in [1.0, 10.0, 250.0] {
            assert_eq!(
                heatmap_color(x, 10.0, 10.0, false),
                HeatColor::Neutral { dark: false }
            );
        }
        assert_eq!(heatmap_color(10.0, 10.0, 10.0, true).rgb(), (31, 41, 55));
    }

    fn lightness(color: HeatColor) -> f64 {
        match color {
            HeatColor::Hsl { h, s, l } => {
                assert_eq!((h, s), (HUE, SATURATION));
                l
            }
            HeatColor::Neutral { .. } => panic!("expected a scaled colour"),
        }
    }

    #[test]
    fn light_mode_darkens_with_cost() {
        assert_eq!(lightness(heatmap_color(10.0, 10.0, 110.0, false)), 95.0);
        assert_eq!(lightness(heatmap_color(110.0, 10.0, 110.0, false)), 45.0);
        assert_eq!(lightness(heatmap_color(60.0, 10.0, 110.0, false)), 70.0);
    }

    #[test]
    fn dark_mode_lightens_with_cost() {
        assert_eq!(lightness(heatmap_color(10.0, 10.0, 110.0, true)), 20.0);
        assert_eq!(lightness(heatmap_color(110.0, 10.0, 110.0, true)), 55.0);
    }

    #[test]
    fn credits_render_neutral_and_lightness_stays_in_range() {
        assert_eq!(
            heatmap_color(-25.0, 10.0, 110.0, false),
            HeatColor::Neutral { dark: false }
        );
        assert_eq!(
            heatmap_color(-25.0, 10.0, 110.0, true),
            HeatColor::Neutral { dark: true }
        );
        // below the positive minimum, e.g. a partial credit month
        assert_eq!(lightness(heatmap_color(5.0, 10.0, 110.0, false)), 95.0);
        assert_eq!(lightness(heatmap_color(500.0, 10.0, 110.0, true)), 55.0);
    }

    #[test]
    fn rgb_conversion_is_blue_dominant() {
        let (r, g, b) = heatmap_color(110.0, 10.0, 110.0, false).rgb();
        assert!(b > g && g > r);
        assert_eq!(HeatColor::Neutral { dark: false }.rgb(), (255, 255, 255));
        assert!(HeatColor::Neutral { dark: false }.is_light());
        assert!(!HeatColor::Neutral { dark: true }.is_light());
    }
}
