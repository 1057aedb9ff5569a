//! Builtin Animation Presets
//!
//! The stock enter/exit/motion templates. Offsets of `±INFINITY` resolve to
//! "fully off-canvas" at resolution time.

use super::{AnimationKind, AnimationPreset, KeyframePos, RelTransform};
use crate::core::US_PER_SEC;

const INF: f64 = f64::INFINITY;

fn offset_x(v: f64) -> RelTransform {
    RelTransform {
        offset_x: Some(v),
        ..Default::default()
    }
}

fn offset_y(v: f64) -> RelTransform {
    RelTransform {
        offset_y: Some(v),
        ..Default::default()
    }
}

fn scale(v: f64) -> RelTransform {
    RelTransform {
        scale: Some(v),
        ..Default::default()
    }
}

fn opacity(v: f64) -> RelTransform {
    RelTransform {
        opacity: Some(v),
        ..Default::default()
    }
}

fn rotate_opacity(deg: f64, op: f64) -> RelTransform {
    RelTransform {
        rotate: Some(deg),
        opacity: Some(op),
        ..Default::default()
    }
}

fn rotate(deg: f64) -> RelTransform {
    RelTransform {
        rotate: Some(deg),
        ..Default::default()
    }
}

fn preset(
    key: &str,
    kind: AnimationKind,
    default_duration: i64,
    template: Vec<(KeyframePos, RelTransform)>,
) -> AnimationPreset {
    AnimationPreset {
        key: key.to_string(),
        kind,
        template,
        default_duration,
        default_iter_count: None,
    }
}

/// Returns the builtin preset set.
pub fn builtin_presets() -> Vec<AnimationPreset> {
    use AnimationKind::{Enter, Exit, Motion};
    use KeyframePos::{From, Percent, To};

    let two_sec = 2 * US_PER_SEC;

    vec![
        // Enter
        preset(
            "fadeIn",
            Enter,
            two_sec,
            vec![(From, opacity(0.0)), (To, opacity(1.0))],
        ),
        preset(
            "slideInLeft",
            Enter,
            two_sec,
            vec![(From, offset_x(-INF)), (To, offset_x(0.0))],
        ),
        preset(
            "slideInRight",
            Enter,
            two_sec,
            vec![(From, offset_x(INF)), (To, offset_x(0.0))],
        ),
        preset(
            "slideInTop",
            Enter,
            two_sec,
            vec![(From, offset_y(-INF)), (To, offset_y(0.0))],
        ),
        preset(
            "slideInBottom",
            Enter,
            two_sec,
            vec![(From, offset_y(INF)), (To, offset_y(0.0))],
        ),
        preset(
            "zoomIn",
            Enter,
            two_sec,
            vec![(From, scale(0.0)), (To, scale(1.0))],
        ),
        preset(
            "rotateIn",
            Enter,
            two_sec,
            vec![(From, rotate_opacity(-180.0, 0.0)), (To, rotate_opacity(0.0, 1.0))],
        ),
        // Exit
        preset(
            "fadeOut",
            Exit,
            two_sec,
            vec![(From, opacity(1.0)), (To, opacity(0.0))],
        ),
        preset(
            "slideOutLeft",
            Exit,
            two_sec,
            vec![(From, offset_x(0.0)), (To, offset_x(-INF))],
        ),
        preset(
            "slideOutRight",
            Exit,
            two_sec,
            vec![(From, offset_x(0.0)), (To, offset_x(INF))],
        ),
        preset(
            "slideOutTop",
            Exit,
            two_sec,
            vec![(From, offset_y(0.0)), (To, offset_y(-INF))],
        ),
        preset(
            "slideOutBottom",
            Exit,
            two_sec,
            vec![(From, offset_y(0.0)), (To, offset_y(INF))],
        ),
        preset(
            "zoomOut",
            Exit,
            two_sec,
            vec![(From, scale(1.0)), (To, scale(0.0))],
        ),
        preset(
            "rotateOut",
            Exit,
            two_sec,
            vec![(From, rotate_opacity(0.0, 1.0)), (To, rotate_opacity(180.0, 0.0))],
        ),
        // Motion
        preset(
            "pulse",
            Motion,
            US_PER_SEC / 5,
            vec![
                (Percent(0), scale(1.0)),
                (Percent(50), scale(1.1)),
                (Percent(100), scale(1.0)),
            ],
        ),
        preset(
            "shake",
            Motion,
            US_PER_SEC / 5,
            vec![
                (Percent(0), offset_x(0.0)),
                (Percent(25), offset_x(-10.0)),
                (Percent(50), offset_x(10.0)),
                (Percent(75), offset_x(-10.0)),
                (Percent(100), offset_x(0.0)),
            ],
        ),
        preset(
            "bounce",
            Motion,
            US_PER_SEC * 4 / 5,
            vec![
                (Percent(0), offset_y(0.0)),
                (Percent(25), offset_y(-50.0)),
                (Percent(50), offset_y(0.0)),
                (Percent(75), offset_y(-25.0)),
                (Percent(100), offset_y(0.0)),
            ],
        ),
        preset(
            "swing",
            Motion,
            US_PER_SEC * 4 / 5,
            vec![
                (Percent(0), rotate(0.0)),
                (Percent(25), rotate(15.0)),
                (Percent(50), rotate(0.0)),
                (Percent(75), rotate(-15.0)),
                (Percent(100), rotate(0.0)),
            ],
        ),
        preset(
            "flash",
            Motion,
            US_PER_SEC,
            vec![
                (Percent(0), opacity(1.0)),
                (Percent(25), opacity(0.0)),
                (Percent(50), opacity(1.0)),
                (Percent(75), opacity(0.0)),
                (Percent(100), opacity(1.0)),
            ],
        ),
    ]
}
