#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod ui;

use anyhow::Result;
use facefit::config::AppConfig;
use gpui::Application;

fn main() -> Result<()> {
    env_logger::init();

    let config = AppConfig::load();
    let photo = std::env::args().nth(1).or_else(|| config.photo.clone());

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, config, photo) {
                log::error!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}
