use crate::domain::command::{Command, CommandId};
use crate::domain::models::BluetoothCommand;
use crate::presentation::app::SampleApp;
use crate::presentation::components::Components;
use crate::presentation::theme::BrutalistPalette;
use eframe::egui;

pub fn render(app: &mut SampleApp, ui: &mut egui::Ui) {
    Components::heading(ui, "BLE Device Sample");
    ui.add_space(20.0);

    ui_enumeration_panel(app, ui);
    ui.add_space(15.0);

    ui_device_panel(app, ui);
    ui.add_space(15.0);

    ui_feedback_panel(app, ui);
}

fn ui_enumeration_panel(app: &mut SampleApp, ui: &mut egui::Ui) {
    Components::brutalist_card(ui, "Devices", |ui| {
        ui.horizontal(|ui| {
            if app.view.is_enumerating {
                if ui.button("Stop Enumeration").clicked() {
                    app.dispatch(BluetoothCommand::StopEnumeration);
                }
                ui.spinner();
            } else if ui.button("Enumerate").clicked() {
                app.dispatch(BluetoothCommand::StartEnumeration);
            }
            ui.label(format!("{} cached", app.view.devices.len()));
        });

        if app.view.devices.is_empty() {
            return;
        }

        ui.separator();
        let devices = app.view.devices.clone();
        egui::ScrollArea::vertical()
            .id_salt("device_list")
            .max_height(160.0)
            .show(ui, |ui| {
                for device in devices {
                    let selected = app.view.selected.as_deref() == Some(device.id.as_str());
                    let text = format!("{}  [{}]", device.name, device.state.label());
                    if ui
                        .selectable_label(selected, text)
                        .on_hover_text(device.id.as_str())
                        .clicked()
                        && !selected
                    {
                        app.select_device(device.id);
                    }
                }
            });
    });
}

fn ui_device_panel(app: &mut SampleApp, ui: &mut egui::Ui) {
    let palette = BrutalistPalette::new(app.is_dark_mode);
    let selected = app.view.selected_device().cloned();

    Components::brutalist_card(ui, "Selected Device", |ui| {
        let Some(device) = selected else {
            ui.label("Select a device from the list.");
            return;
        };

        let (bg, fg) = palette.device_state(device.state);
        Components::status_banner(
            ui,
            &format!("{}: {}", device.name, device.state.label()),
            bg,
            fg,
        );
        ui.add_space(10.0);

        ui.horizontal(|ui| {
            if ui.button("Connect").clicked() {
                app.dispatch(BluetoothCommand::Connect);
            }
            if ui.button("Connect Services").clicked() {
                app.dispatch(BluetoothCommand::ConnectServices);
            }
            if ui.button("Disconnect").clicked() {
                app.dispatch(BluetoothCommand::Disconnect);
            }
        });

        ui.horizontal(|ui| {
            for id in [CommandId::MoveLeft, CommandId::MoveRight, CommandId::GetBattery] {
                if ui.button(id.label()).clicked() {
                    app.dispatch(BluetoothCommand::Send(Command::for_id(id)));
                }
            }
            if ui.button("Do Something").clicked() {
                app.dispatch(BluetoothCommand::CustomCommand);
            }
        });

        if let Some((id, value)) = &app.view.last_sensor_value {
            if *id == device.id {
                ui.separator();
                ui.label(format!("Sensor: {:02X?}", value));
            }
        }
    });
}

fn ui_feedback_panel(app: &mut SampleApp, ui: &mut egui::Ui) {
    let palette = BrutalistPalette::new(app.is_dark_mode);
    let scroll = app.view.log.take_scroll_request();

    Components::brutalist_card(ui, "Feedback", |ui| {
        egui::ScrollArea::vertical()
            .id_salt("feedback_log")
            .max_height(260.0)
            .auto_shrink([false, true])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in app.view.log.lines() {
                    Components::log_line(ui, &palette, line);
                }
                if scroll {
                    ui.scroll_to_cursor(Some(egui::Align::BOTTOM));
                }
            });
    });
}
