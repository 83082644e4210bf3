use crate::heatmap::{heatmap_color, HeatColor};
use ratatui::style::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub dark: bool,
}

impl Palette {
    pub fn new(dark: bool) -> Self {
        Self { dark }
    }

    pub fn text(self) -> Color {
        if self.dark {
            Color::White
        } else {
            Color::Black
        }
    }

    pub fn accent(self) -> Color {
        if self.dark {
            Color::Cyan
        } else {
            Color::Indexed(25)
        }
    }

    pub fn muted(self) -> Color {
        if self.dark {
            Color::DarkGray
        } else {
            Color::Gray
        }
    }

    pub fn header(self) -> Color {
        if self.dark {
            Color::Yellow
        } else {
            Color::Indexed(130)
        }
    }

    pub fn increase(self) -> Color {
        if self.dark {
            Color::Red
        } else {
            Color::Indexed(124)
        }
    }

    pub fn decrease(self) -> Color {
        if self.dark {
            Color::Green
        } else {
            Color::Indexed(22)
        }
    }

    pub fn bar(self) -> Color {
        if self.dark {
            Color::Blue
        } else {
            Color::Indexed(25)
        }
    }

    pub fn forecast(self) -> Color {
        if self.dark {
            Color::Magenta
        } else {
            Color::Indexed(90)
        }
    }

    pub fn heat(self, value: f64, min: f64, max: f64) -> (Color, Color) {
        let color = heatmap_color(value, min, max, self.dark);
        let (r, g, b) = color.rgb();
        let fg = if color.is_light() {
            Color::Black
        } else {
            Color::White
        };
        (Color::Rgb(r, g, b), fg)
    }

    pub fn neutral(self) -> Color {
        let (r, g, b) = HeatColor::Neutral { dark: self.dark }.rgb();
        Color::Rgb(r, g, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_cells_use_neutral_background() {
        let dark = Palette::new(true);
        assert_eq!(dark.heat(0.0, 1.0, 10.0).0, Color::Rgb(31, 41, 55));
        let light = Palette::new(false);
        assert_eq!(light.heat(0.0, 1.0, 10.0), (Color::Rgb(255, 255, 255), Color::Black));
    }

    #[test]
    fn light_mode_peak_gets_light_text() {
        let light = Palette::new(false);
        let (_, fg) = light.heat(10.0, 1.0, 10.0);
        assert_eq!(fg, Color::White);
    }
}
