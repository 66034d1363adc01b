use crate::domain::feedback::DisplaySink;
use crate::domain::models::{FeedbackMessage, MessageSeverity};
use crate::domain::settings::BleBackend;
use crate::presentation::app::SampleApp;
use crate::presentation::components::Components;
use eframe::egui;
use tracing::{error, info};

pub fn render(app: &mut SampleApp, ui: &mut egui::Ui) {
    Components::heading(ui, "Settings");
    ui.add_space(20.0);

    let settings_mut = app.settings.get_mut();

    Components::brutalist_card(ui, "Discovery", |ui| {
        ui.horizontal(|ui| {
            ui.label("Device Name Filter:");
            ui.text_edit_singleline(&mut settings_mut.device_name_filter);
        });
        ui.label(
            egui::RichText::new("Empty announces every device. All devices are cached.")
                .italics()
                .size(12.0),
        );

        ui.horizontal(|ui| {
            ui.label("Backend:");
            ui.radio_value(&mut settings_mut.backend, BleBackend::Native, "Native");
            ui.radio_value(&mut settings_mut.backend, BleBackend::Mock, "Mock");
        });
    });

    ui.add_space(10.0);

    Components::brutalist_card(ui, "Device Profile", |ui| {
        let profile = &mut settings_mut.device_profile;
        egui::Grid::new("ble_uuids")
            .spacing([10.0, 10.0])
            .show(ui, |ui| {
                ui.label("Service:");
                ui.text_edit_singleline(&mut profile.service_uuid);
                ui.end_row();
                ui.label("Command:");
                ui.text_edit_singleline(&mut profile.command_char_uuid);
                ui.end_row();
                ui.label("Sensor:");
                ui.text_edit_singleline(&mut profile.sensor_char_uuid);
                ui.end_row();
            });

        ui.checkbox(&mut profile.require_sensor, "Require Sensor Characteristic");

        ui.horizontal(|ui| {
            ui.label("Discovery Retries:");
            ui.add(egui::Slider::new(&mut profile.discovery_retries, 0..=20));
        });
        ui.horizontal(|ui| {
            ui.label("Retry Delay (ms):");
            ui.add(egui::Slider::new(
                &mut profile.discovery_retry_delay_ms,
                50..=5000,
            ));
        });
    });

    ui.add_space(10.0);

    Components::brutalist_card(ui, "Logging", |ui| {
        ui.horizontal(|ui| {
            ui.label("Verbosity Level:");
            egui::ComboBox::from_id_salt("log_level")
                .selected_text(&settings_mut.log_settings.level)
                .show_ui(ui, |ui| {
                    for level in &["trace", "debug", "info", "warn", "error"] {
                        ui.selectable_value(
                            &mut settings_mut.log_settings.level,
                            level.to_string(),
                            *level,
                        );
                    }
                });
        });

        ui.checkbox(
            &mut settings_mut.log_settings.console_logging_enabled,
            "Console Logs",
        );
        ui.checkbox(
            &mut settings_mut.log_settings.file_logging_enabled,
            "File Logs",
        );

        if settings_mut.log_settings.file_logging_enabled {
            ui.indent("file_logs", |ui| {
                ui.horizontal(|ui| {
                    ui.label("Save Path:");
                    ui.text_edit_singleline(&mut settings_mut.log_settings.log_dir);
                });
                ui.horizontal(|ui| {
                    ui.label("Rotation:");
                    egui::ComboBox::from_id_salt("log_rot")
                        .selected_text(&settings_mut.log_settings.rotation)
                        .show_ui(ui, |ui| {
                            for rot in &["daily", "hourly", "never"] {
                                ui.selectable_value(
                                    &mut settings_mut.log_settings.rotation,
                                    rot.to_string(),
                                    *rot,
                                );
                            }
                        });
                });
            });
        }
    });

    ui.add_space(10.0);

    ui.label(
        egui::RichText::new("Changes take effect after a restart.")
            .italics()
            .size(12.0),
    );
    if ui.button("Save Settings").clicked() {
        let message = match app.settings.save() {
            Ok(()) => {
                info!("Settings saved to {}", app.settings.path().display());
                FeedbackMessage::new("Settings saved", MessageSeverity::Success)
            }
            Err(e) => {
                error!("Failed to save settings: {}", e);
                FeedbackMessage::new(format!("Failed to save settings: {}", e), MessageSeverity::Error)
            }
        };
        app.view.append_line(message);
        app.view.scroll_to_bottom();
    }
}
