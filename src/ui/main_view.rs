use super::{
    AnyElement, AppView, Arc, Button, ButtonVariants, Context, IntoElement, Notice, ObjectFit,
    ParentElement, RenderImage, SharedString, Styled, StyledImage, Tag, Window, div, h_flex, img,
    px, v_flex,
};
use facefit::TrackingPhase;

impl AppView {
    pub(super) fn render_main(&mut self, cx: &mut Context<'_, Self>) -> AnyElement {
        let status = self.session.status();
        let surface = self.session.surface();
        let (surface_w, surface_h) = (surface.width() as f32, surface.height() as f32);

        let preview: AnyElement = if let Some(image) = &self.latest_image {
            img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .rounded_lg()
                .into_any_element()
        } else {
            div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(gpui::rgb(0x8b95a5))
                .child("Starting preview...")
                .into_any_element()
        };

        let badge = match &status.tracking {
            TrackingPhase::FaceFound => Tag::success().rounded_full().child(status.headline()),
            TrackingPhase::ModelsUnavailable(_) => {
                Tag::danger().rounded_full().child(status.headline())
            }
            _ => Tag::secondary().rounded_full().child(status.headline()),
        };

        let mut errors = v_flex().gap_1();
        if let Some(err) = &status.camera_error {
            errors = errors.child(Tag::danger().child(format!("Camera: {err}")));
        }
        if let Some(err) = &status.asset_error {
            errors = errors.child(Tag::danger().child(err.to_string()));
        }
        match &self.notice {
            Some(Notice::Saved(location)) => {
                errors = errors.child(Tag::success().child(format!("Saved {location}")));
            }
            Some(Notice::Failed(reason)) => {
                errors = errors.child(Tag::danger().child(format!("Snapshot failed: {reason}")));
            }
            None => {}
        }

        let selected_id = self.session.selected_product().map(|p| p.id.clone());
        let mut picker = v_flex().gap_2().child(
            div()
                .text_xs()
                .text_color(gpui::rgb(0xa0aab8))
                .child("Frames"),
        );
        for (idx, product) in self.catalog.iter().enumerate() {
            let button = Button::new(SharedString::from(format!("product-{}", product.id)))
                .label(product.name.clone())
                .w_full()
                .on_click(cx.listener(move |this, _, _, cx| {
                    if let Some(product) = this.catalog.get(idx).cloned() {
                        this.session.select_product(&product);
                    }
                    cx.notify();
                }));
            picker = picker.child(if selected_id.as_deref() == Some(product.id.as_str()) {
                button.primary()
            } else {
                button.outline()
            });
        }

        let source_label = if status.camera_active {
            "Use photo"
        } else {
            "Use camera"
        };
        let fit = self.session.fit();
        let controls = v_flex()
            .gap_2()
            .child(
                Button::new(SharedString::from("source-toggle"))
                    .outline()
                    .label(source_label)
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.toggle_source();
                        cx.notify();
                    })),
            )
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        Button::new(SharedString::from("scale-down"))
                            .ghost()
                            .label("-")
                            .on_click(cx.listener(|this, _, _, cx| {
                                this.step_scale(-1.0);
                                cx.notify();
                            })),
                    )
                    .child(
                        div()
                            .text_xs()
                            .text_color(gpui::rgb(0xa0aab8))
                            .child(format!("Size {:.0}%", fit.scale * 100.0)),
                    )
                    .child(
                        Button::new(SharedString::from("scale-up"))
                            .ghost()
                            .label("+")
                            .on_click(cx.listener(|this, _, _, cx| {
                                this.step_scale(1.0);
                                cx.notify();
                            })),
                    ),
            )
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        Button::new(SharedString::from("offset-up"))
                            .ghost()
                            .label("↑")
                            .on_click(cx.listener(|this, _, _, cx| {
                                this.step_offset(-1.0);
                                cx.notify();
                            })),
                    )
                    .child(
                        div()
                            .text_xs()
                            .text_color(gpui::rgb(0xa0aab8))
                            .child(format!("Height {:+.0}px", fit.offset_y)),
                    )
                    .child(
                        Button::new(SharedString::from("offset-down"))
                            .ghost()
                            .label("↓")
                            .on_click(cx.listener(|this, _, _, cx| {
                                this.step_offset(1.0);
                                cx.notify();
                            })),
                    ),
            )
            .child(
                Button::new(SharedString::from("fit-reset"))
                    .ghost()
                    .label("Reset fit")
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.reset_fit();
                        cx.notify();
                    })),
            )
            .child(
                Button::new(SharedString::from("snapshot"))
                    .primary()
                    .label("Save snapshot")
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.save_snapshot();
                        cx.notify();
                    })),
            );

        let preview_width = 720.0_f32;
        let preview_height = preview_width * surface_h / surface_w.max(1.0);
        let preview_card = v_flex()
            .gap_2()
            .child(
                div()
                    .w(px(preview_width))
                    .h(px(preview_height))
                    .overflow_hidden()
                    .rounded_lg()
                    .bg(gpui::rgb(0x000000))
                    .child(preview),
            )
            .child(h_flex().gap_2().items_center().child(badge))
            .child(errors);

        h_flex()
            .size_full()
            .gap_4()
            .p_4()
            .items_start()
            .bg(gpui::rgb(0x1a2332))
            .child(preview_card)
            .child(
                v_flex()
                    .w(px(220.0))
                    .gap_4()
                    .child(picker)
                    .child(controls),
            )
            .into_any_element()
    }

    pub(super) fn replace_latest_image(
        &mut self,
        new_image: Arc<RenderImage>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        if let Some(old_image) = self.latest_image.replace(new_image) {
            // The sprite atlas keeps every texture until it is dropped explicitly.
            cx.drop_image(old_image, Some(window));
        }
    }
}
