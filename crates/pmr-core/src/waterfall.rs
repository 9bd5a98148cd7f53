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

//! Scrolling waterfall history.
//!
//! Rows are stored in a ring: `write_index` holds the newest row and logical
//! row `i` lives at physical row `(write_index + i) % height`. A push colours
//! the frame into the slot that held the oldest row and moves `write_index`
//! back by one, so no rows are copied.

use crate::color::{color_of, Rgb, COLOR_HI_DB, COLOR_LO_DB};
use crate::error::{Error, Result};

/// Owned snapshot of a waterfall, row 0 newest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaterfallImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Rgb>,
}

impl WaterfallImage {
    pub fn row(&self, index: usize) -> &[Rgb] {
        let start = index * self.width;
        &self.pixels[start..start + self.width]
    }

    pub fn pixel(&self, x: usize, y: usize) -> Rgb {
        self.pixels[y * self.width + x]
    }

    /// Packed `r, g, b` bytes in row-major order, for texture upload.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|p| [p.r, p.g, p.b]).collect()
    }
}

#[derive(Debug, Clone)]
pub struct WaterfallBuffer {
    width: usize,
    height: usize,
    pixels: Vec<Rgb>,
    write_index: usize,
    lo_db: f32,
    hi_db: f32,
    rows_pushed: u64,
}

impl WaterfallBuffer {
    /// A `width` bins by `height` rows history, initially black.
    ///
    /// # Panics
    ///
    /// Panics if either dimension is zero.
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "waterfall dimensions must be non-zero");
        Self {
            width,
            height,
            pixels: vec![Rgb::BLACK; width * height],
            write_index: 0,
            lo_db: COLOR_LO_DB,
            hi_db: COLOR_HI_DB,
            rows_pushed: 0,
        }
    }

    /// Override the dB range mapped onto the colour scale.
    pub fn with_color_range(mut self, lo_db: f32, hi_db: f32) -> Self {
        self.lo_db = lo_db;
        self.hi_db = hi_db;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Total rows accepted since construction.
    pub fn rows_pushed(&self) -> u64 {
        self.rows_pushed
    }

    /// Colour `frame` and insert it as the newest row, evicting the oldest.
    ///
    /// A frame whose length differs from the width is rejected and the
    /// history is left as it was.
    pub fn push_row(&mut self, frame: &[f32]) -> Result<()> {
        if frame.len() != self.width {
            return Err(Error::FrameLength {
                expected: self.width,
                got: frame.len(),
            });
        }

        let slot = (self.write_index + self.height - 1) % self.height;
        let start = slot * self.width;
        for (pixel, &db) in self.pixels[start..start + self.width].iter_mut().zip(frame) {
            *pixel = color_of(db, self.lo_db, self.hi_db);
        }
        self.write_index = slot;
        self.rows_pushed += 1;
        Ok(())
    }

    /// Logical row `index`, 0 being the newest.
    ///
    /// # Panics
    ///
    /// Panics if `index >= height`.
    pub fn row(&self, index: usize) -> &[Rgb] {
        assert!(index < self.height, "row {index} out of range");
        let start = ((self.write_index + index) % self.height) * self.width;
        &self.pixels[start..start + self.width]
    }

    pub fn render(&self) -> WaterfallImage {
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for i in 0..self.height {
            pixels.extend_from_slice(self.row(i));
        }
        WaterfallImage {
            width: self.width,
            height: self.height,
            pixels,
        }
    }

    /// Reset to an all-black history.
    pub fn clear(&mut self) {
        self.pixels.fill(Rgb::BLACK);
        self.write_index = 0;
        self.rows_pushed = 0;
    }
}
