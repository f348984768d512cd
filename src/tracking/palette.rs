use image::Rgba;

/// Opacity of every class colour in the overlay
pub const OVERLAY_ALPHA: u8 = 100;

/// Fixed class-index to colour mapping
///
/// Colours follow the PASCAL VOC colormap: the bits of the class index are
/// spread across the high bits of the red, green and blue channels. Class 0
/// is black, class 1 dark red, class 2 dark green, and so on; the rule is
/// deterministic for any class count and distinct for indices below 2^24.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: Vec<Rgba<u8>>,
}

impl Palette {
    pub fn new(num_classes: usize) -> Self {
        Self::with_alpha(num_classes, OVERLAY_ALPHA)
    }

    pub fn with_alpha(num_classes: usize, alpha: u8) -> Self {
        let colors = (0..num_classes)
            .map(|class| {
                let [r, g, b] = voc_color(class as u32);
                Rgba([r, g, b, alpha])
            })
            .collect();
        Self { colors }
    }

    pub fn from_colors(colors: Vec<Rgba<u8>>) -> Self {
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn colors(&self) -> &[Rgba<u8>] {
        &self.colors
    }

    pub fn color(&self, class: usize) -> Option<Rgba<u8>> {
        self.colors.get(class).copied()
    }
}

fn voc_color(class: u32) -> [u8; 3] {
    let mut rgb = [0u8; 3];
    let mut bits = class;
    for shift in (0..8).rev() {
        for (channel, value) in rgb.iter_mut().enumerate() {
            *value |= (((bits >> channel) & 1) as u8) << shift;
        }
        bits >>= 3;
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn first_classes_match_voc_colormap() {
        let palette = Palette::new(21);
        let rgb = |class| {
            let c = palette.color(class).unwrap();
            [c[0], c[1], c[2]]
        };

        assert_eq!(rgb(0), [0, 0, 0]);
        assert_eq!(rgb(1), [128, 0, 0]);
        assert_eq!(rgb(2), [0, 128, 0]);
        assert_eq!(rgb(3), [128, 128, 0]);
        assert_eq!(rgb(7), [128, 128, 128]);
        assert_eq!(rgb(8), [64, 0, 0]);
        assert_eq!(rgb(15), [192, 128, 128]);
        assert_eq!(rgb(16), [0, 64, 0]);
        assert_eq!(rgb(20), [0, 64, 128]);
    }

    #[test]
    fn background_is_semi_transparent_black() {
        assert_eq!(Palette::new(21).color(0), Some(Rgba([0, 0, 0, OVERLAY_ALPHA])));
        assert_eq!(Palette::new(3).color(0), Palette::new(150).color(0));
    }

    #[test]
    fn colors_are_distinct_and_sized_to_class_count() {
        let palette = Palette::new(256);
        assert_eq!(palette.len(), 256);
        assert_eq!(palette.color(256), None);

        let unique: HashSet<_> = (0..256).map(|c| palette.color(c).unwrap().0).collect();
        assert_eq!(unique.len(), 256);
    }
}
