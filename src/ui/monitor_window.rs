//! Monitor window: gain, waterfall and one strip per channel.
//!
//! The window owns the running [`Scanner`] and a [`RefreshLoop`]. Each UI
//! frame it lets the refresh loop tick if due, uploads the waterfall as a
//! texture when a new row arrived, and turns widget changes into writes on
//! the scanner's channel controls.

use crate::config::GAIN_RANGE;
use crate::refresh::{MonitorDisplay, RefreshLoop};
use crate::sdr::Scanner;
use egui::{Color32, ColorImage, TextureHandle, TextureOptions};
use pmr_core::channel::{SQUELCH_RANGE, VOLUME_RANGE};
use pmr_core::WaterfallBuffer;
use std::time::Instant;

/// Width of one channel strip in points
const STRIP_WIDTH: f32 = 52.0;
/// Height of the vertical sliders in points
const SLIDER_HEIGHT: f32 = 110.0;

/// What the refresh loop last delivered, waiting to be drawn.
#[derive(Debug, Default)]
struct DisplayState {
    levels: Vec<u8>,
    pending_image: Option<ColorImage>,
}

impl MonitorDisplay for DisplayState {
    fn show_levels(&mut self, levels: &[u8]) {
        self.levels.clear();
        self.levels.extend_from_slice(levels);
    }

    fn show_waterfall(&mut self, waterfall: &WaterfallBuffer) {
        let image = waterfall.render();
        self.pending_image = Some(ColorImage::from_rgb(
            [image.width, image.height],
            &image.to_rgb_bytes(),
        ));
    }
}

/// The main monitor view.
pub struct MonitorWindow {
    scanner: Scanner,
    refresh: RefreshLoop,
    display: DisplayState,
    waterfall_texture: Option<TextureHandle>,
    /// Gain slider value in dB
    gain_db: f64,
    source_label: String,
    audio_label: String,
}

impl std::fmt::Debug for MonitorWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorWindow")
            .field("scanner", &self.scanner)
            .field("gain_db", &self.gain_db)
            .finish_non_exhaustive()
    }
}

impl MonitorWindow {
    pub fn new(scanner: Scanner, refresh: RefreshLoop, source_label: String, audio_label: String) -> Self {
        let gain_db = scanner.gain();
        Self {
            scanner,
            refresh,
            display: DisplayState::default(),
            waterfall_texture: None,
            gain_db,
            source_label,
            audio_label,
        }
    }

    /// Current gain slider value in dB.
    pub fn gain_db(&self) -> f64 {
        self.gain_db
    }

    /// Tick the refresh loop if due and upload a new waterfall texture.
    fn update_display(&mut self, ctx: &egui::Context) {
        self.refresh
            .tick_if_due(Instant::now(), &self.scanner, &mut self.display);

        if let Some(image) = self.display.pending_image.take() {
            if let Some(tex) = &mut self.waterfall_texture {
                tex.set(image, TextureOptions::NEAREST);
            } else {
                self.waterfall_texture =
                    Some(ctx.load_texture("waterfall", image, TextureOptions::NEAREST));
            }
        }
    }

    /// Render the window.
    pub fn render(&mut self, ctx: &egui::Context) {
        self.update_display(ctx);

        egui::TopBottomPanel::top("monitor_header").show(ctx, |ui| {
            self.render_header(ui);
        });

        egui::TopBottomPanel::bottom("channel_strips")
            .resizable(false)
            .show(ctx, |ui| {
                self.render_strips(ui);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_waterfall(ui);
        });

        ctx.request_repaint_after(self.refresh.until_due(Instant::now()));
    }

    fn render_header(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Gain:");
            if ui
                .add(egui::Slider::new(&mut self.gain_db, GAIN_RANGE).suffix(" dB"))
                .changed()
            {
                self.scanner.set_gain(self.gain_db);
            }

            ui.separator();

            ui.label("RF scale:");
            let mut rf_scale = self.refresh.rf_scale();
            let rf_speed = rf_scale * 0.01;
            if ui
                .add(
                    egui::DragValue::new(&mut rf_scale)
                        .speed(rf_speed)
                        .range(1.0..=1.0e9),
                )
                .on_hover_text("Multiplier from raw RF power to the level bars")
                .changed()
            {
                self.refresh.set_rf_scale(rf_scale);
            }

            ui.separator();

            if ui.button("Unsolo").clicked() {
                self.scanner.set_solo(None);
            }

            ui.separator();

            if self.scanner.is_running() {
                ui.label("🟢 Running");
            } else {
                ui.label(egui::RichText::new("🔴 Stopped").color(Color32::from_rgb(220, 50, 50)));
            }
        });

        let plan = self.scanner.plan();
        let rates = self.scanner.rates();
        let (read, dropped) = self.scanner.source_stats();
        ui.horizontal(|ui| {
            ui.label(&self.source_label);
            ui.separator();
            ui.label(format!("Center: {:.4} MHz", plan.center_frequency() / 1e6));
            ui.separator();
            ui.label(format!("Rate: {:.2} MS/s", rates.sample_rate / 1e6));
            ui.separator();
            ui.label(format!("Audio: {}", self.audio_label));
            ui.separator();
            ui.label(format!("Samples: {read} ({dropped} dropped)"));
            ui.separator();
            ui.label(format!("Rows: {}", self.refresh.waterfall().rows_pushed()));
        });
    }

    fn render_waterfall(&mut self, ui: &mut egui::Ui) {
        let size = ui.available_size();
        let (rect, _response) = ui.allocate_exact_size(size, egui::Sense::hover());

        let Some(texture) = &self.waterfall_texture else {
            ui.painter().rect_filled(rect, 0.0, Color32::BLACK);
            ui.painter().text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "Waiting for spectrum...",
                egui::FontId::proportional(14.0),
                Color32::GRAY,
            );
            return;
        };

        // Newest row is at the top of the texture.
        ui.painter().image(
            texture.id(),
            rect,
            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            Color32::WHITE,
        );

        let channels = self.scanner.plan().len().max(1);
        let stroke = egui::Stroke::new(1.0, Color32::from_rgba_unmultiplied(255, 255, 255, 60));
        for k in 1..channels {
            let x = rect.left() + rect.width() * k as f32 / channels as f32;
            ui.painter()
                .line_segment([egui::pos2(x, rect.top()), egui::pos2(x, rect.bottom())], stroke);
        }
    }

    fn render_strips(&mut self, ui: &mut egui::Ui) {
        let solo = self.scanner.channels().solo();
        let mut solo_request = None;

        egui::ScrollArea::horizontal().show(ui, |ui| {
            ui.horizontal(|ui| {
                for (index, spec) in self.scanner.plan().iter().enumerate() {
                    let Some(control) = self.scanner.channel(index) else {
                        continue;
                    };
                    let level = self.display.levels.get(index).copied().unwrap_or(0);

                    ui.allocate_ui(egui::vec2(STRIP_WIDTH, 0.0), |ui| {
                        ui.vertical_centered(|ui| {
                            ui.label(egui::RichText::new(format!("{}", index + 1)).strong());
                            ui.label(
                                egui::RichText::new(format!("{:.4}", spec.frequency / 1e6))
                                    .small()
                                    .color(Color32::GRAY),
                            );

                            ui.add(
                                egui::ProgressBar::new(f32::from(level) / 100.0)
                                    .desired_width(STRIP_WIDTH - 8.0)
                                    .fill(level_color(level)),
                            );

                            ui.horizontal(|ui| {
                                ui.spacing_mut().slider_width = SLIDER_HEIGHT;
                                let mut squelch = control.squelch();
                                if ui
                                    .add(
                                        egui::Slider::new(&mut squelch, SQUELCH_RANGE)
                                            .vertical()
                                            .show_value(false),
                                    )
                                    .on_hover_text(format!("Squelch {squelch:.0} dB"))
                                    .changed()
                                {
                                    control.set_squelch(squelch);
                                }

                                let mut volume = control.volume();
                                if ui
                                    .add(
                                        egui::Slider::new(&mut volume, VOLUME_RANGE)
                                            .vertical()
                                            .show_value(false),
                                    )
                                    .on_hover_text(format!("Volume {:.0}%", volume * 100.0))
                                    .changed()
                                {
                                    control.set_volume(volume);
                                }
                            });

                            ui.horizontal(|ui| {
                                let mut muted = control.is_muted();
                                if ui.toggle_value(&mut muted, "M").changed() {
                                    control.set_muted(muted);
                                }

                                let mut soloed = solo == Some(index);
                                if ui.toggle_value(&mut soloed, "S").changed() {
                                    solo_request = Some(soloed.then_some(index));
                                }
                            });
                        });
                    });
                }
            });
        });

        if let Some(request) = solo_request {
            self.scanner.set_solo(request);
        }
    }
}

/// Green below half scale, amber to 80, red above.
fn level_color(level: u8) -> Color32 {
    match level {
        0..=49 => Color32::from_rgb(0, 180, 0),
        50..=79 => Color32::from_rgb(255, 180, 0),
        _ => Color32::from_rgb(220, 50, 50),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_color_bands() {
        assert_eq!(level_color(0), Color32::from_rgb(0, 180, 0));
        assert_eq!(level_color(65), Color32::from_rgb(255, 180, 0));
        assert_eq!(level_color(100), Color32::from_rgb(220, 50, 50));
    }

    #[test]
    fn test_display_state_converts_waterfall() {
        let mut waterfall = WaterfallBuffer::new(4, 3);
        waterfall.push_row(&[-20.0; 4]).unwrap();

        let mut display = DisplayState::default();
        display.show_levels(&[1, 2, 3]);
        display.show_waterfall(&waterfall);

        assert_eq!(display.levels, vec![1, 2, 3]);
        let image = display.pending_image.unwrap();
        assert_eq!(image.size, [4, 3]);
        assert_eq!(image.pixels[0], Color32::from_rgb(255, 255, 0));
        assert_eq!(image.pixels[4], Color32::BLACK);
    }
}
