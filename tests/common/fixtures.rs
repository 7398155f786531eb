use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::geometric_transformations::{Interpolation, Projection, warp};
use imageproc::rect::Rect;
use pcbinspect::BoundingBox;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

pub const BOARD_WIDTH: u32 = 400;
pub const BOARD_HEIGHT: u32 = 300;

/// Flat dark area in the middle of every board, free of texture.
pub const PAD: BoundingBox = BoundingBox {
    x: 120,
    y: 90,
    width: 160,
    height: 120,
};

/// Where `with_defect` paints its patch; well inside `PAD`.
pub const DEFECT: BoundingBox = BoundingBox {
    x: 180,
    y: 125,
    width: 36,
    height: 36,
};

const PAD_LEVEL: u8 = 15;
const SUBSTRATE: Rgb<u8> = Rgb([90, 130, 100]);

fn overlaps_pad(x: i32, y: i32, w: u32, h: u32, margin: i32) -> bool {
    let pad_x0 = PAD.x as i32 - margin;
    let pad_y0 = PAD.y as i32 - margin;
    let pad_x1 = PAD.right() as i32 + margin;
    let pad_y1 = PAD.bottom() as i32 + margin;
    x < pad_x1 && x + w as i32 > pad_x0 && y < pad_y1 && y + h as i32 > pad_y0
}

/// A synthetic board: random components around a flat central pad.
///
/// The same seed always draws the same board.
pub fn synthetic_board(seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut board = RgbImage::from_pixel(BOARD_WIDTH, BOARD_HEIGHT, SUBSTRATE);

    let mut placed = 0;
    while placed < 140 {
        let w = rng.gen_range(6..40);
        let h = rng.gen_range(6..40);
        let x = rng.gen_range(0..(BOARD_WIDTH - w) as i32);
        let y = rng.gen_range(0..(BOARD_HEIGHT - h) as i32);
        if overlaps_pad(x, y, w, h, 6) {
            continue;
        }
        let level = rng.gen_range(60..=255u8);
        let tint = rng.gen_range(0..60u8);
        let color = Rgb([level, level.saturating_sub(tint), level / 2 + tint]);
        draw_filled_rect_mut(&mut board, Rect::at(x, y).of_size(w, h), color);
        placed += 1;
    }

    placed = 0;
    while placed < 40 {
        let r = rng.gen_range(3..10);
        let cx = rng.gen_range(r..BOARD_WIDTH as i32 - r);
        let cy = rng.gen_range(r..BOARD_HEIGHT as i32 - r);
        if overlaps_pad(cx - r, cy - r, 2 * r as u32, 2 * r as u32, 6) {
            continue;
        }
        let level = rng.gen_range(150..=255u8);
        draw_filled_circle_mut(&mut board, (cx, cy), r, Rgb([level, level, level]));
        placed += 1;
    }

    draw_filled_rect_mut(
        &mut board,
        Rect::at(PAD.x as i32, PAD.y as i32).of_size(PAD.width, PAD.height),
        Rgb([PAD_LEVEL, PAD_LEVEL, PAD_LEVEL]),
    );
    board
}

/// Copy of `board` with a bright square painted over `DEFECT`.
pub fn with_defect(board: &RgbImage) -> RgbImage {
    let mut out = board.clone();
    draw_filled_rect_mut(
        &mut out,
        Rect::at(DEFECT.x as i32, DEFECT.y as i32).of_size(DEFECT.width, DEFECT.height),
        Rgb([255, 255, 255]),
    );
    out
}

/// Row-major matrix rotating by `degrees` and scaling by `scale` about the
/// board centre.
pub fn similarity_about_center(degrees: f32, scale: f32) -> [f32; 9] {
    let (cx, cy) = (BOARD_WIDTH as f32 / 2.0, BOARD_HEIGHT as f32 / 2.0);
    let theta = degrees.to_radians();
    let a = scale * theta.cos();
    let b = scale * theta.sin();
    [
        a,
        -b,
        cx - a * cx + b * cy,
        b,
        a,
        cy - b * cx - a * cy,
        0.0,
        0.0,
        1.0,
    ]
}

/// Resample `image` so that the pixel at `p` moves to `transform * p`.
pub fn warp_board(image: &RgbImage, transform: [f32; 9]) -> RgbImage {
    let projection = Projection::from_matrix(transform).expect("invertible transform");
    warp(image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]))
}

pub fn apply_matrix(m: &[f32; 9], (x, y): (f64, f64)) -> (f64, f64) {
    let m: Vec<f64> = m.iter().map(|&v| v as f64).collect();
    let w = m[6] * x + m[7] * y + m[8];
    (
        (m[0] * x + m[1] * y + m[2]) / w,
        (m[3] * x + m[4] * y + m[5]) / w,
    )
}

/// Saves `image` under `dir`, creating intermediate directories.
pub fn save_image(dir: &Path, relative: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create fixture directory");
    }
    image.save(&path).expect("Failed to save fixture image");
    path
}

pub fn dynamic(image: &RgbImage) -> DynamicImage {
    DynamicImage::ImageRgb8(image.clone())
}

/// Mask with the given boxes switched on.
pub fn mask_with_boxes(width: u32, height: u32, boxes: &[BoundingBox]) -> pcbinspect::BinaryMask {
    let mut mask = pcbinspect::BinaryMask::new(width, height);
    for b in boxes {
        for y in b.y..b.bottom() {
            for x in b.x..b.right() {
                mask.set(x, y, true);
            }
        }
    }
    mask
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
