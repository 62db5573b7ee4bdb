//! Category-keyed lookup tables and confidence adjustment.
//!
//! Everything here is a pure mapping from a category (plus, for the item
//! profile, an index drawn by the caller) to fixed content. The only thing
//! that varies between calls is which item profile is picked.

use crate::models::classify_types::{
    ClassificationDetails, ClassificationResult, EnvironmentalImpact, ImageQuality,
    ImageQualityReport, LightingCondition, RawPrediction, WasteCategory,
};

const POOR_QUALITY_FACTOR: f32 = 0.8;
const LOW_LIGHT_FACTOR: f32 = 0.9;
const MAX_CONFIDENCE: f32 = 99.0;

/// Down-weights a raw 0–100 score for degraded captures and caps it below 100.
pub fn adjust_confidence(raw: f32, report: &ImageQualityReport) -> u8 {
    let mut adjusted = raw;
    if report.quality == ImageQuality::Poor {
        adjusted *= POOR_QUALITY_FACTOR;
    }
    if report.lighting_condition == LightingCondition::Low {
        adjusted *= LOW_LIGHT_FACTOR;
    }
    if !adjusted.is_finite() {
        return 0;
    }
    adjusted.clamp(0.0, MAX_CONFIDENCE).round() as u8
}

/// Source of nearby disposal facility names.
pub trait FacilityLookup: Send + Sync {
    fn nearby_facilities(&self, category: WasteCategory) -> Vec<String>;
}

/// Fixed facility list per category.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticFacilities;

impl FacilityLookup for StaticFacilities {
    fn nearby_facilities(&self, category: WasteCategory) -> Vec<String> {
        let names: &[&str] = match category {
            WasteCategory::Biodegradable => &[
                "Municipal Composting Center",
                "Community Garden Compost Drop-off",
                "Green Waste Transfer Station",
            ],
            WasteCategory::Recyclable => &[
                "City Recycling Center",
                "Supermarket Bottle & Can Return",
                "Materials Recovery Facility",
            ],
            WasteCategory::Hazardous => &[
                "Household Hazardous Waste Facility",
                "Electronics & Battery Collection Point",
                "Pharmacy Medicine Take-back",
            ],
        };
        to_strings(names)
    }
}

pub fn recommendations(category: WasteCategory) -> Vec<String> {
    let items: &[&str] = match category {
        WasteCategory::Biodegradable => &[
            "Place in the green organic waste bin",
            "Add to a home compost pile if available",
            "Remove any plastic packaging or stickers first",
            "Avoid mixing with recyclables or general waste",
        ],
        WasteCategory::Recyclable => &[
            "Rinse the item to remove food residue",
            "Place in the blue recycling bin",
            "Flatten boxes and crush bottles to save space",
            "Check the resin code or local rules for plastics",
        ],
        WasteCategory::Hazardous => &[
            "Do not place in household bins",
            "Take to a hazardous waste collection facility",
            "Keep in the original container with the label intact",
        ],
    };
    to_strings(items)
}

/// Candidate (sub-category, material) pairs; one is picked per result.
pub fn item_profiles(category: WasteCategory) -> &'static [(&'static str, &'static str)] {
    match category {
        WasteCategory::Biodegradable => &[
            ("Food Waste", "Organic Matter"),
            ("Garden Waste", "Plant Material"),
            ("Paper Towel", "Cellulose Fiber"),
            ("Wooden Item", "Untreated Wood"),
        ],
        WasteCategory::Recyclable => &[
            ("Plastic Bottle", "PET Plastic"),
            ("Aluminum Can", "Aluminum"),
            ("Cardboard Box", "Corrugated Cardboard"),
            ("Glass Jar", "Glass"),
        ],
        WasteCategory::Hazardous => &[
            ("Battery", "Lithium-ion"),
            ("Electronic Device", "Mixed E-waste"),
            ("Paint Can", "Solvent-based Paint"),
            ("Fluorescent Bulb", "Mercury-containing Glass"),
        ],
    }
}

/// The profile at `index`, wrapping around the candidate list.
pub fn item_profile(category: WasteCategory, index: usize) -> (&'static str, &'static str) {
    let profiles = item_profiles(category);
    profiles[index % profiles.len()]
}

pub fn environmental_impact(category: WasteCategory) -> EnvironmentalImpact {
    let (co2, energy, water, decomposition) = match category {
        WasteCategory::Biodegradable => (0.5, 0.3, 2.0, "2-6 weeks"),
        WasteCategory::Recyclable => (1.5, 2.5, 15.0, "450+ years if landfilled"),
        WasteCategory::Hazardous => (3.0, 1.2, 50.0, "Does not safely decompose"),
    };
    EnvironmentalImpact {
        co2_saved_kg: co2,
        energy_saved_kwh: energy,
        water_saved_liters: water,
        decomposition_time: decomposition.to_string(),
    }
}

pub fn reduction_tips(category: WasteCategory) -> Vec<String> {
    let items: &[&str] = match category {
        WasteCategory::Biodegradable => &[
            "Plan meals to cut food waste",
            "Store produce properly to extend freshness",
            "Compost scraps instead of binning them",
        ],
        WasteCategory::Recyclable => &[
            "Choose reusable bottles and bags",
            "Buy products with minimal packaging",
            "Prefer refillable containers",
        ],
        WasteCategory::Hazardous => &[
            "Use rechargeable batteries",
            "Pick non-toxic cleaning products",
            "Repair electronics before replacing them",
        ],
    };
    to_strings(items)
}

pub fn alternative_disposal(category: WasteCategory) -> Vec<String> {
    let items: &[&str] = match category {
        WasteCategory::Biodegradable => &[
            "Home composting",
            "Vermicomposting",
            "Community compost programs",
        ],
        WasteCategory::Recyclable => &[
            "Curbside recycling pickup",
            "Deposit return schemes",
            "Upcycling or reuse",
        ],
        WasteCategory::Hazardous => &[
            "Manufacturer take-back programs",
            "Retailer battery and electronics drop-off",
            "Scheduled hazardous waste collection days",
        ],
    };
    to_strings(items)
}

pub fn carbon_footprint_kg(category: WasteCategory) -> f64 {
    match category {
        WasteCategory::Biodegradable => 0.2,
        WasteCategory::Recyclable => 0.8,
        WasteCategory::Hazardous => 2.5,
    }
}

/// Attaches the lookup content for the predicted category.
///
/// A sub-category or material reported by the backend takes precedence over
/// the profile picked by `profile_index`.
pub fn enrich(
    raw: RawPrediction,
    profile_index: usize,
    facilities: &dyn FacilityLookup,
) -> ClassificationResult {
    let category = raw.category;
    let (sub_category, material) = item_profile(category, profile_index);

    ClassificationResult {
        category,
        confidence: raw.confidence,
        processing_time_ms: raw.processing_time_ms,
        image_analysis: raw.image_analysis,
        details: ClassificationDetails {
            sub_category: raw.sub_category.unwrap_or_else(|| sub_category.to_string()),
            material: raw.material.unwrap_or_else(|| material.to_string()),
            recommendations: recommendations(category),
            environmental_impact: environmental_impact(category),
            reduction_tips: reduction_tips(category),
            nearby_facilities: facilities.nearby_facilities(category),
        },
        alternative_disposal: alternative_disposal(category),
        carbon_footprint_kg: carbon_footprint_kg(category),
        backend: raw.backend,
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
