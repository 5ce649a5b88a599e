//! Software-projected rendering of the engine's frame plan.
//!
//! The engine plans the passes; the view walks them in order and draws
//! exactly what each one names. With the 2D draw API the pre-pass
//! capture becomes the layer already on screen, and the core's
//! translucent triangles stand in for sampling it.

use nannou::prelude::*;
use stemviz_engine::FramePlan;

use crate::Model;

const BACKGROUND: Srgb<u8> = BLACK;

pub fn view(app: &App, model: &Model, frame: Frame) {
    let draw = app.draw();
    draw.background().color(BACKGROUND);

    if let Some(plan) = &model.plan {
        let rect = app.window_rect();
        let scene = model.engine.scene();

        for pass in plan.passes() {
            if pass.particles {
                draw_particles(&draw, plan, rect, scene);
            }
            if pass.smoke {
                draw_smoke(&draw, plan, rect, scene);
            }
            if pass.core {
                draw_core(&draw, plan, rect, scene);
            }
            if let Some((color, opacity)) = pass.wash {
                draw.rect()
                    .wh(rect.wh())
                    .color(srgba(color.x, color.y, color.z, opacity * 0.8));
            }
        }

        draw_hud(&draw, rect, model);
    }

    draw.to_frame(app, &frame).unwrap();
}

/// World position -> screen point plus a perspective size divisor.
fn project(plan: &FramePlan, rect: Rect, world: glam::Vec3) -> Option<(Point2, f32)> {
    let clip = plan.projection * plan.view * world.extend(1.0);
    if clip.w <= 0.0 {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    if !(-1.0..=1.0).contains(&ndc.z) {
        return None;
    }
    let point = pt2(ndc.x * rect.w() * 0.5, ndc.y * rect.h() * 0.5);
    Some((point, 1.0 / clip.w))
}

fn draw_particles(draw: &Draw, plan: &FramePlan, rect: Rect, scene: &stemviz_engine::SceneDirector) {
    for strip in scene.pool().trails() {
        let len = strip.points.len();
        let color = strip.color;
        let points = strip.points.iter().enumerate().filter_map(|(i, p)| {
            let (screen, _) = project(plan, rect, *p)?;
            // Fade front-to-back along the trail
            let alpha = 0.4 * (i as f32 + 1.0) / len as f32;
            Some((screen, srgba(color.x, color.y, color.z, alpha)))
        });
        draw.polyline()
            .weight(strip.thickness.min(6.0))
            .points_colored(points);
    }

    for inst in scene.pool().instances() {
        let world = glam::Vec3::from_array(inst.position);
        if let Some((screen, scale)) = project(plan, rect, world) {
            let radius = (inst.size * scale * rect.h() * 0.02).clamp(0.3, 30.0);
            draw.ellipse().xy(screen).radius(radius).color(srgba(
                inst.color[0],
                inst.color[1],
                inst.color[2],
                inst.life * 0.9,
            ));
        }
    }
}

fn draw_smoke(draw: &Draw, plan: &FramePlan, rect: Rect, scene: &stemviz_engine::SceneDirector) {
    for p in scene.core().smoke() {
        if let Some((screen, scale)) = project(plan, rect, p.pos) {
            let radius = (p.size * scale * rect.h() * 0.05).clamp(0.5, 40.0);
            draw.ellipse().xy(screen).radius(radius).color(srgba(
                p.color.x,
                p.color.y,
                p.color.z,
                p.life * 0.25,
            ));
        }
    }
}

fn draw_core(draw: &Draw, plan: &FramePlan, rect: Rect, scene: &stemviz_engine::SceneDirector) {
    let core = scene.core();
    let position = core.position();
    let scale = core.scale();

    for tri in &core.mesh().triangles {
        let projected: Vec<Point2> = tri
            .iter()
            .filter_map(|v| project(plan, rect, position + *v * scale).map(|(p, _)| p))
            .collect();
        if projected.len() == 3 {
            draw.tri()
                .points(projected[0], projected[1], projected[2])
                .color(srgba(0.9, 0.85, 1.0, 0.12));
        }
    }

    // Glow halo at the body center
    if let Some((screen, view_scale)) = project(plan, rect, position) {
        let radius = (scale * view_scale * rect.h() * 0.2).clamp(2.0, 300.0);
        draw.ellipse()
            .xy(screen)
            .radius(radius)
            .color(srgba(0.95, 0.9, 1.0, 0.08));
    }
}

fn draw_hud(draw: &Draw, rect: Rect, model: &Model) {
    let hud = format!(
        "{:>6.1}s / {:>6.1}s   {:>5.1} fps   [space] play/pause  [arrows] seek",
        model.engine.current_time(),
        model.engine.duration(),
        model.engine.fps(),
    );
    draw.text(&hud)
        .font_size(14)
        .w(rect.w() - 20.0)
        .left_justify()
        .xy(pt2(0.0, rect.bottom() + 16.0))
        .color(srgba(1.0, 1.0, 1.0, 0.6));
}
