pub mod alignment;
pub mod contours;
pub mod difference;
pub mod extraction;
pub mod features;
pub mod homography;
pub mod morphology;
pub mod preprocessing;

use image::DynamicImage;
use log::info;

use crate::config::InspectionConfig;
use crate::error::Result;
use crate::models::{AlignedImage, BinaryMask, DefectRecord};

/// Intermediate artifacts of one pair, kept for debug output.
#[derive(Debug, Clone)]
pub struct StageOutputs {
    pub aligned: AlignedImage,
    pub difference: BinaryMask,
    pub filtered: BinaryMask,
    pub record: DefectRecord,
}

/// The four-stage inspection of one test/reference pair.
///
/// Holds only configuration; every call works on its arguments alone, so
/// one pipeline can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct DefectPipeline {
    config: InspectionConfig,
}

impl DefectPipeline {
    pub fn new(config: InspectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Warp `test` into the reference's frame.
    pub fn align(&self, test: &DynamicImage, reference: &DynamicImage) -> Result<AlignedImage> {
        Ok(alignment::align(test, reference, &self.config.alignment)?)
    }

    /// Binary mask of structural differences.
    pub fn compare(&self, aligned: &DynamicImage, reference: &DynamicImage) -> Result<BinaryMask> {
        difference::compare(aligned, reference, &self.config.difference)
    }

    /// Denoise a difference mask.
    pub fn filter(&self, mask: &BinaryMask) -> BinaryMask {
        morphology::filter(mask, &self.config.filter)
    }

    /// Crop and annotate the blobs of a filtered mask.
    pub fn extract(
        &self,
        mask: &BinaryMask,
        aligned: &DynamicImage,
        stem: &str,
    ) -> Result<DefectRecord> {
        let extraction = extraction::extract(mask, aligned, &self.config.extraction)?;
        Ok(DefectRecord {
            stem: stem.to_string(),
            annotated: extraction.annotated,
            regions: extraction.regions,
        })
    }

    /// Run all four stages on a pair.
    pub fn inspect(
        &self,
        test: &DynamicImage,
        reference: &DynamicImage,
        stem: &str,
    ) -> Result<DefectRecord> {
        Ok(self.inspect_with_stages(test, reference, stem)?.record)
    }

    /// Run every stage except alignment, for a test image already in the
    /// reference's frame.
    pub fn inspect_aligned(
        &self,
        aligned: &DynamicImage,
        reference: &DynamicImage,
        stem: &str,
    ) -> Result<DefectRecord> {
        let difference = self.compare(aligned, reference)?;
        let filtered = self.filter(&difference);
        self.extract(&filtered, aligned, stem)
    }

    /// Run all four stages and keep the intermediate results.
    pub fn inspect_with_stages(
        &self,
        test: &DynamicImage,
        reference: &DynamicImage,
        stem: &str,
    ) -> Result<StageOutputs> {
        let aligned = self.align(test, reference)?;
        let difference = self.compare(&aligned.image, reference)?;
        let filtered = self.filter(&difference);
        let record = self.extract(&filtered, &aligned.image, stem)?;
        info!(
            "{}: {} defect candidates ({} difference pixels, {} after filtering)",
            stem,
            record.regions.len(),
            difference.count_set(),
            filtered.count_set()
        );
        Ok(StageOutputs {
            aligned,
            difference,
            filtered,
            record,
        })
    }
}
