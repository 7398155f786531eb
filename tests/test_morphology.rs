//! Integration tests for the noise-suppression cascade.
//!
//! Tests cover:
//! - Cascade order and stage kinds
//! - Opening never adds pixels
//! - Speckle removal while solid blobs survive
//! - Filtering an already filtered mask adds nothing
//! - Optional border clearing and small-region removal

mod common;

use pcbinspect::FilterConfig;
use pcbinspect::detection::morphology::{self, Stage};

use common::*;

fn speckled_mask() -> BinaryMask {
    let block = BoundingBox { x: 60, y: 50, width: 24, height: 20 };
    let mut mask = mask_with_boxes(160, 140, &[block]);
    for (x, y) in [(10, 10), (30, 90), (120, 20), (140, 120), (90, 110)] {
        mask.set(x, y, true);
    }
    // Two-pixel scratch
    mask.set(100, 30, true);
    mask.set(101, 30, true);
    mask
}

#[test]
fn test_cascade_runs_in_fixed_order() {
    let stages = morphology::cascade(&FilterConfig::default());
    let names: Vec<_> = stages.iter().map(Stage::name).collect();
    assert_eq!(
        names,
        ["median", "close", "open", "median", "close", "open", "open"]
    );
}

#[test]
fn test_open_stages_only_remove_pixels() {
    let mask = speckled_mask();
    let config = FilterConfig::default();

    let mut input = mask.clone();
    for (stage, output) in morphology::filter_stages(&mask, &config) {
        if let Stage::Open(_) = stage {
            assert!(output.is_subset_of(&input), "{:?} added pixels", stage);
        }
        input = output;
    }
}

#[test]
fn test_speckles_vanish_and_blob_survives() {
    let filtered = morphology::filter(&speckled_mask(), &FilterConfig::default());

    assert!(!filtered.is_set(10, 10));
    assert!(!filtered.is_set(100, 30));
    assert!(filtered.is_set(72, 60));

    let regions = pcbinspect::detection::contours::find_external_regions(&filtered);
    assert_eq!(regions.len(), 1);
}

#[test]
fn test_second_pass_never_adds_pixels() {
    let config = FilterConfig::default();
    let once = morphology::filter(&speckled_mask(), &config);
    let twice = morphology::filter(&once, &config);

    assert!(!once.is_empty());
    assert!(twice.is_subset_of(&once));
}

#[test]
fn test_empty_mask_stays_empty() {
    let mask = BinaryMask::new(64, 48);
    assert!(morphology::filter(&mask, &FilterConfig::default()).is_empty());
}

#[test]
fn test_clear_border_drops_edge_regions() {
    let edge = BoundingBox { x: 0, y: 30, width: 8, height: 8 };
    let near = BoundingBox { x: 70, y: 3, width: 6, height: 6 };
    let inner = BoundingBox { x: 40, y: 40, width: 10, height: 10 };
    let mask = mask_with_boxes(100, 100, &[edge, near, inner]);

    let cleared = morphology::clear_border(&mask, 0);
    assert_eq!(cleared, mask_with_boxes(100, 100, &[near, inner]));

    let cleared = morphology::clear_border(&mask, 5);
    assert_eq!(cleared, mask_with_boxes(100, 100, &[inner]));
}

#[test]
fn test_remove_small_regions_keeps_larger_ones() {
    let small = BoundingBox { x: 5, y: 5, width: 3, height: 3 };
    let large = BoundingBox { x: 30, y: 30, width: 10, height: 10 };
    let mask = mask_with_boxes(60, 60, &[small, large]);

    assert_eq!(
        morphology::remove_small_regions(&mask, 9),
        mask_with_boxes(60, 60, &[large])
    );
    assert_eq!(morphology::remove_small_regions(&mask, 8), mask);
}

#[test]
fn test_post_filters_run_when_configured() {
    let edge = BoundingBox { x: 0, y: 0, width: 30, height: 30 };
    let inner = BoundingBox { x: 60, y: 60, width: 30, height: 30 };
    let mask = mask_with_boxes(140, 140, &[edge, inner]);
    let config = FilterConfig {
        clear_border_radius: Some(0),
        ..FilterConfig::default()
    };

    let filtered = morphology::filter(&mask, &config);
    assert!(!filtered.is_set(10, 10));
    assert!(filtered.is_set(75, 75));
}
