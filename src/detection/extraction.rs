use image::imageops::FilterType;
use image::{DynamicImage, Luma, Rgb};
use imageproc::drawing::{Canvas, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use log::{debug, info};

use crate::config::{EdgePolicy, ExtractionConfig};
use crate::detection::contours;
use crate::error::{InspectionError, Result};
use crate::models::{BinaryMask, BoundingBox, DefectRegion};

const ANNOTATION_RGB: Rgb<u8> = Rgb([255, 0, 0]);
const ANNOTATION_LUMA: Luma<u8> = Luma([255]);

/// Result of cutting defect candidates out of an aligned image.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub annotated: DynamicImage,
    pub regions: Vec<DefectRegion>,
}

/// The crop window for `bbox`, or `None` when the margin policy rejects it.
///
/// The window spans `correction` extra pixels on every side and is clipped
/// to the image at the bottom and right.
pub fn crop_window(
    bbox: &BoundingBox,
    width: u32,
    height: u32,
    config: &ExtractionConfig,
) -> Option<BoundingBox> {
    let c = config.correction;
    if bbox.x < c || bbox.y < c {
        return None;
    }
    let right = bbox.right() + c;
    let bottom = bbox.bottom() + c;
    if config.edge_policy == EdgePolicy::Symmetric && (right > width || bottom > height) {
        return None;
    }
    let (x0, y0) = (bbox.x - c, bbox.y - c);
    let (x1, y1) = (right.min(width), bottom.min(height));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(BoundingBox {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    })
}

/// Draw `thickness` nested outlines around `(x, y)-(x + w, y + h)`.
fn draw_outline<C>(canvas: &mut C, bbox: &BoundingBox, thickness: u32, color: C::Pixel)
where
    C: Canvas,
{
    for i in 0..thickness as i32 {
        let rect = Rect::at(bbox.x as i32 - i, bbox.y as i32 - i)
            .of_size(bbox.width + 1 + 2 * i as u32, bbox.height + 1 + 2 * i as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Turn the blobs of a filtered mask into fixed-size crops and an
/// annotated overview.
///
/// Regions come out in raster order of their first pixel and are numbered
/// from 0 in that order; rejected regions do not consume an index. A mask
/// with no surviving region yields an empty list, not an error.
pub fn extract(
    mask: &BinaryMask,
    aligned: &DynamicImage,
    config: &ExtractionConfig,
) -> Result<Extraction> {
    let (width, height) = (aligned.width(), aligned.height());
    if mask.dimensions() != (width, height) {
        return Err(InspectionError::DimensionMismatch {
            expected: (width, height),
            actual: mask.dimensions(),
        });
    }

    let mut regions = Vec::new();
    let mut boxes = Vec::new();
    for region in contours::find_external_regions(mask) {
        let bbox = region.bbox();
        let Some(window) = crop_window(&bbox, width, height, config) else {
            debug!("extraction: skipping region at {:?}, margin leaves the image", bbox);
            continue;
        };
        let crop = aligned
            .crop_imm(window.x, window.y, window.width, window.height)
            .resize_exact(config.crop_size, config.crop_size, FilterType::Triangle);
        regions.push(DefectRegion {
            id: regions.len(),
            bbox,
            crop,
        });
        boxes.push(bbox);
    }

    let annotated = match aligned {
        DynamicImage::ImageLuma8(gray) => {
            let mut canvas = gray.clone();
            for bbox in &boxes {
                draw_outline(&mut canvas, bbox, config.line_thickness, ANNOTATION_LUMA);
            }
            DynamicImage::ImageLuma8(canvas)
        }
        other => {
            let mut canvas = other.to_rgb8();
            for bbox in &boxes {
                draw_outline(&mut canvas, bbox, config.line_thickness, ANNOTATION_RGB);
            }
            DynamicImage::ImageRgb8(canvas)
        }
    };

    if regions.is_empty() {
        info!("extraction: no defect candidates found");
    } else {
        debug!("extraction: {} defect candidates", regions.len());
    }
    Ok(Extraction { annotated, regions })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(edge_policy: EdgePolicy) -> ExtractionConfig {
        ExtractionConfig {
            edge_policy,
            ..ExtractionConfig::default()
        }
    }

    #[test]
    fn window_adds_margin_on_every_side() {
        let bbox = BoundingBox::from_extent(30, 40, 49, 59);
        let window = crop_window(&bbox, 200, 200, &config(EdgePolicy::TopLeft)).unwrap();
        assert_eq!(window, BoundingBox::from_extent(10, 20, 69, 79));
    }

    #[test]
    fn top_left_margin_is_enforced() {
        let bbox = BoundingBox::from_extent(19, 40, 30, 50);
        assert!(crop_window(&bbox, 200, 200, &config(EdgePolicy::TopLeft)).is_none());
        let bbox = BoundingBox::from_extent(40, 19, 50, 30);
        assert!(crop_window(&bbox, 200, 200, &config(EdgePolicy::TopLeft)).is_none());
    }

    #[test]
    fn bottom_right_is_clipped_under_top_left_policy() {
        let bbox = BoundingBox::from_extent(170, 170, 195, 195);
        let window = crop_window(&bbox, 200, 200, &config(EdgePolicy::TopLeft)).unwrap();
        assert_eq!(window, BoundingBox::from_extent(150, 150, 199, 199));
        assert!(crop_window(&bbox, 200, 200, &config(EdgePolicy::Symmetric)).is_none());
    }
}
