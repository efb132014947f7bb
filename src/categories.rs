//! Fixed categorisation tables: air quality, UV index and fire detection
//! confidence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Air Quality Index category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
    Unknown,
}

impl AqiCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AqiCategory::Good => "good",
            AqiCategory::Moderate => "moderate",
            AqiCategory::UnhealthySensitive => "unhealthy_sensitive",
            AqiCategory::Unhealthy => "unhealthy",
            AqiCategory::VeryUnhealthy => "very_unhealthy",
            AqiCategory::Hazardous => "hazardous",
            AqiCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bounds (inclusive) for good, moderate, unhealthy_sensitive,
/// unhealthy and very_unhealthy; anything above is hazardous.
fn breakpoints(parameter: &str) -> Option<[f64; 5]> {
    match parameter {
        "pm25" => Some([12.0, 35.4, 55.4, 150.4, 250.4]),
        "pm10" => Some([54.0, 154.0, 254.0, 354.0, 424.0]),
        "no2" => Some([53.0, 100.0, 360.0, 649.0, 1249.0]),
        "o3" => Some([54.0, 70.0, 85.0, 105.0, 200.0]),
        _ => None,
    }
}

/// Category for a pollutant concentration
#[must_use]
pub fn calculate_aqi(parameter: &str, value: f64) -> AqiCategory {
    const LEVELS: [AqiCategory; 5] = [
        AqiCategory::Good,
        AqiCategory::Moderate,
        AqiCategory::UnhealthySensitive,
        AqiCategory::Unhealthy,
        AqiCategory::VeryUnhealthy,
    ];

    let Some(bounds) = breakpoints(parameter) else {
        return AqiCategory::Unknown;
    };
    if value.is_nan() {
        return AqiCategory::Unknown;
    }
    bounds
        .iter()
        .zip(LEVELS)
        .find(|(bound, _)| value <= **bound)
        .map_or(AqiCategory::Hazardous, |(_, level)| level)
}

/// Coarse overall category derived from mean PM2.5
#[must_use]
pub fn overall_category_from_pm25(mean_pm25: f64) -> AqiCategory {
    if mean_pm25 <= 12.0 {
        AqiCategory::Good
    } else if mean_pm25 <= 35.4 {
        AqiCategory::Moderate
    } else {
        AqiCategory::UnhealthySensitive
    }
}

/// UV index category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UvCategory {
    Low,
    Moderate,
    High,
    VeryHigh,
    Extreme,
}

impl UvCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UvCategory::Low => "low",
            UvCategory::Moderate => "moderate",
            UvCategory::High => "high",
            UvCategory::VeryHigh => "very_high",
            UvCategory::Extreme => "extreme",
        }
    }

    #[must_use]
    pub fn recommendation(&self) -> &'static str {
        match self {
            UvCategory::Low => "Low risk. Minimal protection required.",
            UvCategory::Moderate => "Moderate risk. Use sunscreen.",
            UvCategory::High => {
                "High risk. Protection required. Use sunscreen and avoid prolonged exposure."
            }
            UvCategory::VeryHigh => {
                "Very high risk. Extra protection required. Avoid midday sun exposure."
            }
            UvCategory::Extreme => "Extreme risk. Avoid sun exposure. Take all precautions.",
        }
    }
}

impl fmt::Display for UvCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[must_use]
pub fn categorize_uv(uv_index: f64) -> UvCategory {
    if uv_index < 3.0 {
        UvCategory::Low
    } else if uv_index < 6.0 {
        UvCategory::Moderate
    } else if uv_index < 8.0 {
        UvCategory::High
    } else if uv_index < 11.0 {
        UvCategory::VeryHigh
    } else {
        UvCategory::Extreme
    }
}

/// Fire detection confidence bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceCategory {
    High,
    Medium,
    Low,
    Unknown,
}

/// Map a raw confidence code to `(category, percent)`.
///
/// VIIRS reports letter codes (`h`, `n`, `l`), MODIS a 0-100 number.
#[must_use]
pub fn categorize_confidence(raw: &str) -> (ConfidenceCategory, u8) {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "high" | "h" => return (ConfidenceCategory::High, 85),
        "nominal" | "n" => return (ConfidenceCategory::Medium, 65),
        "low" | "l" => return (ConfidenceCategory::Low, 35),
        _ => {}
    }

    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => {
            let percent = value.clamp(0.0, 100.0) as u8;
            let category = if value >= 80.0 {
                ConfidenceCategory::High
            } else if value >= 50.0 {
                ConfidenceCategory::Medium
            } else {
                ConfidenceCategory::Low
            };
            (category, percent)
        }
        _ => (ConfidenceCategory::Unknown, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pm25", 12.0, AqiCategory::Good)]
    #[case("pm25", 35.4, AqiCategory::Moderate)]
    #[case("pm25", 55.4, AqiCategory::UnhealthySensitive)]
    #[case("pm25", 150.0, AqiCategory::Unhealthy)]
    #[case("pm25", 250.4, AqiCategory::VeryUnhealthy)]
    #[case("pm25", 500.0, AqiCategory::Hazardous)]
    #[case("pm10", 54.0, AqiCategory::Good)]
    #[case("pm10", 200.0, AqiCategory::UnhealthySensitive)]
    #[case("pm10", 425.0, AqiCategory::Hazardous)]
    #[case("no2", 100.0, AqiCategory::Moderate)]
    #[case("no2", 700.0, AqiCategory::VeryUnhealthy)]
    #[case("o3", 71.0, AqiCategory::UnhealthySensitive)]
    #[case("o3", 105.0, AqiCategory::Unhealthy)]
    #[case("unknown_param", 10.0, AqiCategory::Unknown)]
    fn test_calculate_aqi(#[case] parameter: &str, #[case] value: f64, #[case] expected: AqiCategory) {
        assert_eq!(calculate_aqi(parameter, value), expected);
    }

    #[test]
    fn test_aqi_labels() {
        assert_eq!(calculate_aqi("pm25", 12.0).as_str(), "good");
        assert_eq!(
            serde_json::to_string(&AqiCategory::UnhealthySensitive).unwrap(),
            "\"unhealthy_sensitive\""
        );
    }

    #[test]
    fn test_overall_category() {
        assert_eq!(overall_category_from_pm25(12.0), AqiCategory::Good);
        assert_eq!(overall_category_from_pm25(18.33), AqiCategory::Moderate);
        assert_eq!(overall_category_from_pm25(80.0), AqiCategory::UnhealthySensitive);
    }

    #[rstest]
    #[case(1.0, UvCategory::Low)]
    #[case(4.0, UvCategory::Moderate)]
    #[case(7.0, UvCategory::High)]
    #[case(9.0, UvCategory::VeryHigh)]
    #[case(12.0, UvCategory::Extreme)]
    fn test_categorize_uv(#[case] value: f64, #[case] expected: UvCategory) {
        let category = categorize_uv(value);
        assert_eq!(category, expected);
        assert!(!category.recommendation().is_empty());
    }

    #[rstest]
    #[case("h", ConfidenceCategory::High, 85)]
    #[case("HIGH", ConfidenceCategory::High, 85)]
    #[case("n", ConfidenceCategory::Medium, 65)]
    #[case("low", ConfidenceCategory::Low, 35)]
    #[case("92", ConfidenceCategory::High, 92)]
    #[case("50", ConfidenceCategory::Medium, 50)]
    #[case("12", ConfidenceCategory::Low, 12)]
    #[case("??", ConfidenceCategory::Unknown, 0)]
    fn test_categorize_confidence(
        #[case] raw: &str,
        #[case] category: ConfidenceCategory,
        #[case] percent: u8,
    ) {
        assert_eq!(categorize_confidence(raw), (category, percent));
    }
}
