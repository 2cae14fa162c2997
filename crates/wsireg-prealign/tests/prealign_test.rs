use approx::assert_abs_diff_eq;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::{Mutex, OnceLock};
use wsireg_core::{Image, Mask, Point2, RegistrationError};
use wsireg_prealign::{dice_under_transform, prealign, PrealignParams, ShortfallPolicy};

const SIZE: usize = 100;

/// `(thread, level, target, message)` of every record at `warn` or above.
struct CaptureLog(Mutex<Vec<(Option<String>, Level, String, String)>>);

impl Log for CaptureLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let thread = std::thread::current().name().map(str::to_owned);
        self.0.lock().unwrap().push((
            thread,
            record.level(),
            record.target().to_owned(),
            record.args().to_string(),
        ));
    }

    fn flush(&self) {}
}

static CAPTURE: OnceLock<CaptureLog> = OnceLock::new();

fn capture_log() -> &'static CaptureLog {
    let capture = CAPTURE.get_or_init(|| CaptureLog(Mutex::new(Vec::new())));
    let _ = log::set_logger(capture);
    log::set_max_level(LevelFilter::Warn);
    capture
}

/// Records logged by the calling test thread after the first `from` entries.
fn records_since(capture: &CaptureLog, from: usize) -> Vec<(Level, String, String)> {
    let thread = std::thread::current().name().map(str::to_owned);
    capture.0.lock().unwrap()[from..]
        .iter()
        .filter(|(t, ..)| *t == thread)
        .map(|(_, level, target, msg)| (*level, target.clone(), msg.clone()))
        .collect()
}

fn mark(capture: &CaptureLog) -> usize {
    capture.0.lock().unwrap().len()
}

/// Asymmetric L-shaped tissue region.
fn l_mask() -> Mask {
    Mask::from_fn(SIZE, SIZE, |x, y| {
        let stem = (20..40).contains(&x) && (15..80).contains(&y);
        let foot = (20..75).contains(&x) && (60..80).contains(&y);
        stem || foot
    })
}

/// `mask` rotated by +90 degrees about the image centre.
fn rotate_90(mask: &Mask) -> Mask {
    Mask::from_fn(SIZE, SIZE, |x, y| mask.get(SIZE - 1 - y, x))
}

fn gray_for(mask: &Mask) -> Image {
    Image::from_fn(mask.width, mask.height, 1, |x, y, _| {
        if mask.get(x, y) {
            90
        } else {
            235
        }
    })
}

#[test]
fn recovers_quarter_turn() {
    let fixed_mask = l_mask();
    let moving_mask = rotate_90(&fixed_mask);
    let fixed = gray_for(&fixed_mask);
    let moving = gray_for(&moving_mask);

    let res = prealign(
        &fixed.view(),
        &moving.view(),
        &fixed_mask,
        &moving_mask,
        &PrealignParams::default(),
    )
    .unwrap();

    assert_eq!(res.angle_deg, 90.0);
    assert!(res.target_reached);
    assert!(res.dice > 0.99, "dice = {}", res.dice);

    let m = res.transform.to_array();
    assert_abs_diff_eq!(m[0][0], 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(m[0][1], -1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(m[1][0], 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(m[1][1], 0.0, epsilon = 1e-9);
    assert_eq!(m[2], [0.0, 0.0, 1.0]);

    let fc = fixed_mask.centroid().unwrap();
    let mc = res.transform.apply(moving_mask.centroid().unwrap());
    assert_abs_diff_eq!(mc.x, fc.x, epsilon = 1e-9);
    assert_abs_diff_eq!(mc.y, fc.y, epsilon = 1e-9);
}

#[test]
fn identical_masks_give_identity() {
    let mask = l_mask();
    let img = gray_for(&mask);
    let res = prealign(
        &img.view(),
        &img.view(),
        &mask,
        &mask,
        &PrealignParams::default(),
    )
    .unwrap();
    assert_eq!(res.angle_deg, 0.0);
    assert_eq!(res.dice, 1.0);
    assert!(res.transform.max_abs_diff(&wsireg_core::AffineTransform::identity()) < 1e-12);
    assert_eq!(
        dice_under_transform(&mask, &mask, &res.transform).unwrap(),
        1.0
    );
}

/// A bar against a disc of similar area can never overlap well.
fn misaligned_pair() -> (Mask, Mask) {
    let bar = Mask::from_fn(SIZE, SIZE, |x, y| (20..80).contains(&x) && (47..53).contains(&y));
    let disc = Mask::from_fn(SIZE, SIZE, |x, y| {
        let dx = x as f64 - 40.0;
        let dy = y as f64 - 55.0;
        dx * dx + dy * dy <= 110.0
    });
    (bar, disc)
}

#[test]
fn shortfall_warns_but_returns_transform() {
    let (fixed_mask, moving_mask) = misaligned_pair();
    let fixed = gray_for(&fixed_mask);
    let moving = gray_for(&moving_mask);
    let params = PrealignParams {
        dice_overlap: 0.9,
        ..PrealignParams::default()
    };
    let capture = capture_log();
    let start = mark(capture);
    let res = prealign(&fixed.view(), &moving.view(), &fixed_mask, &moving_mask, &params).unwrap();
    assert!(!res.target_reached);

    let warnings: Vec<_> = records_since(capture, start)
        .into_iter()
        .filter(|(level, target, _)| {
            *level == Level::Warn && target.starts_with("wsireg_prealign")
        })
        .collect();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].2.contains("dice overlap 0.900"));
    assert!(res.dice < 0.9);
    assert!(res.dice > 0.0);
    assert_eq!(res.transform.to_array()[2], [0.0, 0.0, 1.0]);
    assert!(res.transform.inverse().is_some());
}

#[test]
fn strict_shortfall_fails() {
    let (fixed_mask, moving_mask) = misaligned_pair();
    let fixed = gray_for(&fixed_mask);
    let moving = gray_for(&moving_mask);
    let params = PrealignParams {
        dice_overlap: 0.9,
        on_shortfall: ShortfallPolicy::Fail,
        ..PrealignParams::default()
    };
    let capture = capture_log();
    let start = mark(capture);
    let err = prealign(&fixed.view(), &moving.view(), &fixed_mask, &moving_mask, &params)
        .unwrap_err();
    assert!(records_since(capture, start).is_empty());
    assert!(matches!(err, RegistrationError::DiceOverlapNotReached { target, .. } if target == 0.9));
}

#[test]
fn input_validation() {
    let mask = l_mask();
    let img = gray_for(&mask);
    let rgb = Image::from_fn(SIZE, SIZE, 3, |_, _, _| 128);
    let empty = Mask::from_fn(SIZE, SIZE, |_, _| false);
    let small = Mask::from_fn(SIZE, SIZE - 1, |_, _| true);
    let params = PrealignParams::default();

    assert!(matches!(
        prealign(&rgb.view(), &img.view(), &mask, &mask, &params),
        Err(RegistrationError::InvalidImageFormat(_))
    ));
    assert!(matches!(
        prealign(&img.view(), &img.view(), &small, &mask, &params),
        Err(RegistrationError::ShapeMismatch { .. })
    ));
    assert_eq!(
        prealign(&img.view(), &img.view(), &empty, &mask, &params).unwrap_err(),
        RegistrationError::MissingForeground("fixed")
    );
    assert_eq!(
        prealign(&img.view(), &img.view(), &mask, &empty, &params).unwrap_err(),
        RegistrationError::MissingForeground("moving")
    );

    for (dice_overlap, rotation_step, name) in [
        (2.0, 10.0, "dice_overlap"),
        (-1.0, 10.0, "dice_overlap"),
        (0.5, 9.0, "rotation_step"),
        (0.5, 21.0, "rotation_step"),
    ] {
        let params = PrealignParams {
            dice_overlap,
            rotation_step,
            ..PrealignParams::default()
        };
        match prealign(&img.view(), &img.view(), &mask, &mask, &params) {
            Err(RegistrationError::InvalidParameter { name: got, .. }) => assert_eq!(got, name),
            other => panic!("expected InvalidParameter for {name}, got {other:?}"),
        }
    }
}

#[test]
fn weighted_centroid_follows_dark_tissue() {
    let mask = Mask::from_fn(SIZE, SIZE, |x, y| (10..90).contains(&x) && (40..60).contains(&y));
    let fixed = Image::from_fn(SIZE, SIZE, 1, |x, _, _| if x < 50 { 0 } else { 255 });
    let moving = Image::from_fn(SIZE, SIZE, 1, |x, _, _| if x < 50 { 0 } else { 255 });
    let params = PrealignParams {
        intensity_weighted_centroid: true,
        ..PrealignParams::default()
    };
    let res = prealign(&fixed.view(), &moving.view(), &mask, &mask, &params).unwrap();
    assert_eq!(res.angle_deg, 0.0);
    let p = res.transform.apply(Point2::new(30.0, 50.0));
    assert_abs_diff_eq!(p.x, 30.0, epsilon = 1e-9);
}
