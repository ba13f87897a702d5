use std::{sync::Arc, time::Instant};

use facefit::{
    TryOnSession,
    anchor::FitConfig,
    catalog::Product,
    config::AppConfig,
    snapshot::DirectorySink,
};
use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, Render,
    RenderImage, SharedString, Styled, StyledImage, TitlebarOptions, Window, WindowOptions, div,
    img, px,
};
use gpui_component::{
    Root,
    button::{Button, ButtonVariants},
    h_flex,
    tag::Tag,
    v_flex,
};
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

mod main_view;
mod render_util;

const SCALE_STEP: f32 = 0.05;
const SCALE_RANGE: (f32, f32) = (0.5, 1.5);
const OFFSET_STEP: f32 = 4.0;
const OFFSET_RANGE: (f32, f32) = (-80.0, 40.0);

pub fn launch_ui(app: &mut App, config: AppConfig, photo: Option<String>) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some("FaceFit".into()),
            ..Default::default()
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| AppView::new(config, photo));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

struct AppView {
    session: TryOnSession,
    catalog: Vec<Product>,
    photo: Option<String>,
    default_fit: FitConfig,
    snapshots: DirectorySink,
    latest_image: Option<Arc<RenderImage>>,
    notice: Option<Notice>,
}

enum Notice {
    Saved(String),
    Failed(String),
}

impl AppView {
    fn new(config: AppConfig, photo: Option<String>) -> Self {
        let mut session = TryOnSession::from_config(&config);
        if let Some(first) = config.catalog.first() {
            session.select_product(first);
        }
        if let Err(err) = session.start_camera() {
            log::warn!("starting without camera: {err}");
            if let Some(photo) = &photo {
                session.use_photo(photo);
            }
        }

        Self {
            session,
            catalog: config.catalog.clone(),
            photo,
            default_fit: config.fit.clone(),
            snapshots: DirectorySink::new(config.snapshots.directory.clone()),
            latest_image: None,
            notice: None,
        }
    }

    fn toggle_source(&mut self) {
        if self.session.is_camera_active() {
            match self.photo.clone() {
                Some(photo) => self.session.use_photo(&photo),
                None => self.session.stop_camera(),
            }
        } else if let Err(err) = self.session.start_camera() {
            log::warn!("camera unavailable: {err}");
        }
    }

    fn step_scale(&mut self, direction: f32) {
        let base = self.default_fit.scale;
        let fit = self.session.fit_mut();
        fit.scale = (fit.scale + direction * SCALE_STEP)
            .clamp(base * SCALE_RANGE.0, base * SCALE_RANGE.1);
    }

    fn step_offset(&mut self, direction: f32) {
        let fit = self.session.fit_mut();
        fit.offset_y = (fit.offset_y + direction * OFFSET_STEP).clamp(OFFSET_RANGE.0, OFFSET_RANGE.1);
    }

    fn reset_fit(&mut self) {
        let fit = self.session.fit_mut();
        fit.scale = self.default_fit.scale;
        fit.offset_x = self.default_fit.offset_x;
        fit.offset_y = self.default_fit.offset_y;
    }

    fn save_snapshot(&mut self) {
        self.notice = Some(match self.session.save_snapshot(&self.snapshots) {
            Ok(location) => Notice::Saved(location),
            Err(err) => {
                log::warn!("snapshot failed: {err}");
                Notice::Failed(err.to_string())
            }
        });
    }
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        if self.session.tick(Instant::now()).is_some() {
            cx.defer_in(window, |_, _, cx| {
                cx.notify();
            });
            if let Some(image) = render_util::surface_to_image(self.session.surface()) {
                self.replace_latest_image(image, window, cx);
            }
        }

        self.render_main(cx)
    }
}

impl Drop for AppView {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}
