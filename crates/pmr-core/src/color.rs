// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Power-to-colour mapping for the waterfall.

/// Power mapped to the bottom of the colour scale.
pub const COLOR_LO_DB: f32 = -95.0;
/// Power mapped to the top of the colour scale.
pub const COLOR_HI_DB: f32 = -30.0;

/// Blue level at the noise floor; keeps the floor a dark navy rather than black.
const BLUE_FLOOR: f32 = 64.0;

/// One waterfall pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Self = Self { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

fn ramp(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Map a power in dB to a colour.
///
/// `x = clamp((db - lo) / (hi - lo), 0, 1)`, then red, green and blue are
/// independent clamped ramps of `x`: navy at the floor, green in the
/// middle, yellow at the top. Red and green never decrease and blue never
/// increases as power rises.
pub fn color_of(db: f32, lo: f32, hi: f32) -> Rgb {
    let x = (db - lo) / (hi - lo);
    let x = if x.is_nan() { 0.0 } else { ramp(x) };

    Rgb {
        r: (ramp(3.0 * x - 1.0) * 255.0) as u8,
        g: (ramp(3.0 * x) * 255.0) as u8,
        b: (ramp(1.0 - 3.0 * x) * BLUE_FLOOR) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturates_below_lo() {
        let floor = color_of(COLOR_LO_DB, COLOR_LO_DB, COLOR_HI_DB);
        assert_eq!(floor, Rgb::new(0, 0, 64));
        for db in [-200.0, -120.0, -95.5, f32::NEG_INFINITY] {
            assert_eq!(color_of(db, COLOR_LO_DB, COLOR_HI_DB), floor);
        }
    }

    #[test]
    fn test_saturates_above_hi() {
        let top = color_of(COLOR_HI_DB, COLOR_LO_DB, COLOR_HI_DB);
        assert_eq!(top, Rgb::new(255, 255, 0));
        for db in [-29.0, 0.0, 40.0, f32::INFINITY] {
            assert_eq!(color_of(db, COLOR_LO_DB, COLOR_HI_DB), top);
        }
    }

    #[test]
    fn test_channels_monotonic() {
        let mut prev = color_of(COLOR_LO_DB, COLOR_LO_DB, COLOR_HI_DB);
        let mut db = COLOR_LO_DB;
        while db <= COLOR_HI_DB {
            let c = color_of(db, COLOR_LO_DB, COLOR_HI_DB);
            assert!(c.r >= prev.r, "red fell at {db}");
            assert!(c.g >= prev.g, "green fell at {db}");
            assert!(c.b <= prev.b, "blue rose at {db}");
            prev = c;
            db += 0.05;
        }
    }

    #[test]
    fn test_midpoint_is_green_yellow() {
        let mid = color_of(-62.5, COLOR_LO_DB, COLOR_HI_DB);
        assert_eq!(mid.g, 255);
        assert!(mid.r > 100 && mid.r < 160);
        assert_eq!(mid.b, 0);
    }

    #[test]
    fn test_nan_maps_to_floor() {
        assert_eq!(color_of(f32::NAN, COLOR_LO_DB, COLOR_HI_DB), Rgb::new(0, 0, 64));
    }
}
