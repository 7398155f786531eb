//! Integration tests for difference, filtering and extraction on
//! already-aligned pairs.
//!
//! Tests cover:
//! - Identical and uniformly re-exposed images yield no defects
//! - A painted patch becomes exactly one region around it
//! - Crop sizes, naming and annotation
//! - Margin policies at the image border

mod common;

use image::{DynamicImage, GrayImage, Luma, Rgb};
use pcbinspect::detection::extraction;
use pcbinspect::{EdgePolicy, ExtractionConfig};

use common::*;

#[test]
fn test_identical_images_have_no_defects() -> anyhow::Result<()> {
    let board = dynamic(&synthetic_board(1));
    let pipeline = DefectPipeline::default();

    let difference = pipeline.compare(&board, &board)?;
    assert!(difference.is_empty());

    let record = pipeline.inspect_aligned(&board, &board, "01_clean_01")?;
    assert!(record.is_empty());
    assert_eq!(record.annotated.width(), BOARD_WIDTH);

    Ok(())
}

#[test]
fn test_exposure_shift_is_not_a_defect() -> anyhow::Result<()> {
    // 1. Darken every channel by a constant
    let board = synthetic_board(2);
    let mut darker = board.clone();
    for p in darker.pixels_mut() {
        *p = Rgb(p.0.map(|c| c.saturating_sub(10)));
    }

    // 2. Inspect; equalization absorbs the global shift
    let record =
        DefectPipeline::default().inspect_aligned(&dynamic(&darker), &dynamic(&board), "shift")?;
    assert!(record.is_empty(), "found {} regions", record.regions.len());

    Ok(())
}

#[test]
fn test_patch_becomes_single_region() -> anyhow::Result<()> {
    init_logging();

    // 1. Paint a defect onto an otherwise identical board
    let reference = synthetic_board(4);
    let test = with_defect(&reference);

    // 2. Inspect without alignment
    let record = DefectPipeline::default().inspect_aligned(
        &dynamic(&test),
        &dynamic(&reference),
        "04_spur_01",
    )?;

    // 3. Exactly one region, hugging the patch
    assert_eq!(record.regions.len(), 1);
    let region = &record.regions[0];
    assert_eq!(region.id, 0);
    assert!(region.bbox.contains(&DEFECT), "bbox {:?}", region.bbox);
    let slack = BoundingBox {
        x: DEFECT.x - 8,
        y: DEFECT.y - 8,
        width: DEFECT.width + 16,
        height: DEFECT.height + 16,
    };
    assert!(slack.contains(&region.bbox), "bbox {:?}", region.bbox);

    // 4. Crop is the configured square and named after the stem
    assert_eq!(region.crop.width(), 32);
    assert_eq!(region.crop.height(), 32);
    assert_eq!(record.crop_filename(region), "04_spur_01_0.jpg");

    // 5. Annotation is red on a colour image
    let annotated = record.annotated.to_rgb8();
    assert_eq!(
        *annotated.get_pixel(region.bbox.x, region.bbox.y),
        Rgb([255, 0, 0])
    );
    assert_eq!(
        *annotated.get_pixel(region.bbox.x - 1, region.bbox.y - 1),
        Rgb([255, 0, 0])
    );

    Ok(())
}

#[test]
fn test_crop_size_follows_config() -> anyhow::Result<()> {
    let reference = synthetic_board(4);
    let test = with_defect(&reference);
    let mut config = InspectionConfig::default();
    config.extraction.crop_size = 48;

    let record = DefectPipeline::new(config)?.inspect_aligned(
        &dynamic(&test),
        &dynamic(&reference),
        "crop",
    )?;

    assert!(!record.regions.is_empty());
    for region in &record.regions {
        assert_eq!((region.crop.width(), region.crop.height()), (48, 48));
    }

    Ok(())
}

#[test]
fn test_regions_too_close_to_top_left_are_skipped() -> anyhow::Result<()> {
    // 1. One blob inside the top margin, one clear of every edge
    let near_edge = BoundingBox { x: 40, y: 5, width: 10, height: 10 };
    let clear = BoundingBox { x: 100, y: 100, width: 12, height: 12 };
    let mask = mask_with_boxes(200, 200, &[near_edge, clear]);
    let aligned = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 200, Luma([80])));

    // 2. Extract
    let result = extraction::extract(&mask, &aligned, &ExtractionConfig::default())?;

    // 3. Only the clear blob survives and it takes index 0
    assert_eq!(result.regions.len(), 1);
    assert_eq!(result.regions[0].id, 0);
    assert_eq!(result.regions[0].bbox, clear);

    // 4. Grayscale input is annotated in white
    assert_eq!(result.annotated.as_luma8().map(|g| g.get_pixel(100, 100)[0]), Some(255));

    Ok(())
}

#[test]
fn test_symmetric_policy_skips_bottom_right() -> anyhow::Result<()> {
    let corner = BoundingBox { x: 185, y: 185, width: 10, height: 10 };
    let mask = mask_with_boxes(200, 200, &[corner]);
    let aligned = DynamicImage::ImageLuma8(GrayImage::new(200, 200));

    let clipped = extraction::extract(&mask, &aligned, &ExtractionConfig::default())?;
    assert_eq!(clipped.regions.len(), 1);
    assert_eq!(clipped.regions[0].crop.width(), 32);

    let symmetric = ExtractionConfig {
        edge_policy: EdgePolicy::Symmetric,
        ..ExtractionConfig::default()
    };
    let skipped = extraction::extract(&mask, &aligned, &symmetric)?;
    assert!(skipped.regions.is_empty());

    Ok(())
}

#[test]
fn test_size_mismatch_is_an_error() {
    let pipeline = DefectPipeline::default();
    let a = DynamicImage::ImageLuma8(GrayImage::new(100, 80));
    let b = DynamicImage::ImageLuma8(GrayImage::new(100, 81));
    let err = pipeline.compare(&a, &b).unwrap_err();
    assert!(matches!(err, InspectionError::DimensionMismatch { .. }));
}
