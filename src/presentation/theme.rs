use crate::domain::models::{DeviceState, MessageSeverity};
use eframe::egui;

pub struct BrutalistPalette {
    pub bg: egui::Color32,
    pub fg: egui::Color32,
    pub stroke: egui::Color32,
    pub accent_yellow: egui::Color32,
    pub accent_green: egui::Color32,
    pub accent_cyan: egui::Color32,
    pub accent_red: egui::Color32,
    pub accent_blue: egui::Color32,
}

impl BrutalistPalette {
    pub fn new(is_dark: bool) -> Self {
        if is_dark {
            Self {
                bg: egui::Color32::from_rgb(25, 25, 25),
                fg: egui::Color32::WHITE,
                stroke: egui::Color32::WHITE,
                accent_yellow: egui::Color32::from_rgb(255, 200, 0),
                accent_green: egui::Color32::from_rgb(0, 255, 127),
                accent_cyan: egui::Color32::from_rgb(0, 255, 255),
                accent_red: egui::Color32::from_rgb(255, 80, 80),
                accent_blue: egui::Color32::from_rgb(120, 120, 255),
            }
        } else {
            Self {
                bg: egui::Color32::from_rgb(245, 245, 245),
                fg: egui::Color32::BLACK,
                stroke: egui::Color32::BLACK,
                accent_yellow: egui::Color32::from_rgb(255, 220, 0),
                accent_green: egui::Color32::from_rgb(0, 255, 100),
                accent_cyan: egui::Color32::from_rgb(0, 200, 255),
                accent_red: egui::Color32::from_rgb(255, 50, 50),
                accent_blue: egui::Color32::from_rgb(50, 50, 255),
            }
        }
    }

    /// Text color of a feedback line.
    pub fn severity(&self, severity: MessageSeverity) -> egui::Color32 {
        match severity {
            MessageSeverity::Info => self.fg,
            MessageSeverity::Success => egui::Color32::from_rgb(0, 150, 0),
            MessageSeverity::Warning => egui::Color32::from_rgb(200, 150, 0),
            MessageSeverity::Error => self.accent_red,
        }
    }

    /// Banner (background, text) colors for a device state.
    pub fn device_state(&self, state: DeviceState) -> (egui::Color32, egui::Color32) {
        match state {
            DeviceState::Ready => (self.accent_green, egui::Color32::BLACK),
            DeviceState::Connected => (self.accent_cyan, egui::Color32::BLACK),
            DeviceState::Connecting | DeviceState::ServiceDiscovering => {
                (self.accent_yellow, egui::Color32::BLACK)
            }
            DeviceState::Disconnected => (egui::Color32::from_gray(100), egui::Color32::WHITE),
        }
    }
}

pub fn configure_neubrutalism(ctx: &egui::Context, is_dark: bool) {
    let mut style = (*ctx.style()).clone();
    let palette = BrutalistPalette::new(is_dark);

    style
        .text_styles
        .iter_mut()
        .for_each(|(text_style, font_id)| {
            font_id.size = match text_style {
                egui::TextStyle::Heading => 26.0,
                egui::TextStyle::Body => 15.0,
                egui::TextStyle::Button => 15.0,
                egui::TextStyle::Monospace => 13.0,
                _ => font_id.size,
            };
        });

    style.spacing.item_spacing = egui::vec2(10.0, 10.0);
    style.spacing.button_padding = egui::vec2(14.0, 8.0);

    let widgets = &mut style.visuals.widgets;
    widgets.noninteractive.bg_stroke = egui::Stroke::new(2.0, palette.stroke);
    widgets.noninteractive.rounding = egui::Rounding::ZERO;
    widgets.noninteractive.fg_stroke = egui::Stroke::new(1.0, palette.fg);
    widgets.noninteractive.bg_fill = palette.bg;

    widgets.inactive.bg_stroke = egui::Stroke::new(2.0, palette.stroke);
    widgets.inactive.rounding = egui::Rounding::ZERO;
    widgets.inactive.bg_fill = if is_dark {
        egui::Color32::from_gray(30)
    } else {
        egui::Color32::WHITE
    };
    widgets.inactive.fg_stroke = egui::Stroke::new(1.0, palette.fg);

    widgets.hovered.bg_stroke = egui::Stroke::new(2.5, palette.stroke);
    widgets.hovered.rounding = egui::Rounding::ZERO;
    widgets.hovered.bg_fill = palette.accent_yellow;
    widgets.hovered.fg_stroke = egui::Stroke::new(1.0, egui::Color32::BLACK);

    widgets.active.bg_stroke = egui::Stroke::new(3.0, palette.stroke);
    widgets.active.rounding = egui::Rounding::ZERO;
    widgets.active.bg_fill = palette.accent_green;
    widgets.active.fg_stroke = egui::Stroke::new(1.0, egui::Color32::BLACK);

    style.visuals.selection.stroke = egui::Stroke::new(1.0, palette.stroke);
    style.visuals.selection.bg_fill = palette.accent_cyan;
    style.visuals.hyperlink_color = palette.accent_blue;

    style.visuals.window_rounding = egui::Rounding::ZERO;
    style.visuals.window_stroke = egui::Stroke::new(2.0, palette.stroke);
    style.visuals.window_fill = palette.bg;
    style.visuals.panel_fill = palette.bg;
    style.visuals.override_text_color = Some(palette.fg);

    ctx.set_style(style);
}
