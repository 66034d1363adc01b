mod domain;
mod infrastructure;
mod presentation;

use eframe::egui;

fn main() -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([820.0, 720.0])
            .with_title("BLE Device Sample"),
        ..Default::default()
    };

    eframe::run_native(
        "BLE Device Sample",
        options,
        Box::new(|cc| Ok(Box::new(presentation::app::SampleApp::new(cc)))),
    )
}
